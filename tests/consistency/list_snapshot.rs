use std::sync::Arc;

use d_store::DeleteOptions;
use d_store::ListOptions;
use d_store::ResourceVersionMatch;
use d_store::Storage;

use crate::common::key;
use crate::common::memory_store;
use crate::common::pod;
use crate::common::test_config;
use crate::common::with_phase;
use crate::common::Pod;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paginated_list_is_consistent_under_concurrent_writes() {
    let store = Arc::new(memory_store(test_config()));
    for i in 0..20 {
        store.create_object(pod("first", &format!("p{i:02}"))).await.unwrap();
    }

    let churn = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                let name = format!("p{i:02}");
                if i % 2 == 0 {
                    store.delete(&key("first", &name), DeleteOptions::default()).await.unwrap();
                } else {
                    store.create_object(pod("first", &format!("{name}-new"))).await.unwrap();
                }
            }
        })
    };

    let mut names = Vec::new();
    let mut continue_token = None;
    let mut list_rv = None;
    loop {
        let page = store
            .list(
                "/pods/first",
                ListOptions {
                    limit: 3,
                    continue_token: continue_token.take(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        match list_rv {
            None => list_rv = Some(page.resource_version),
            Some(rv) => assert_eq!(page.resource_version, rv),
        }
        names.extend(page.items.into_iter().map(|p| p.name));
        match page.continue_token {
            Some(token) => continue_token = Some(token),
            None => break,
        }
    }
    churn.await.unwrap();

    // The concatenated pages equal a single list at the first page's version
    let whole = store
        .list(
            "/pods/first",
            ListOptions {
                resource_version: list_rv.expect("list rv"),
                resource_version_match: ResourceVersionMatch::Exact,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let expected: Vec<_> = whole.items.into_iter().map(|p| p.name).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_exact_list_reconstructs_history() {
    let store = memory_store(test_config());
    let bar = store.create_object(pod("first", "bar")).await.unwrap();
    let baz = store.create_object(pod("first", "baz")).await.unwrap();
    let snapshot_rv = store.current_resource_version();

    store
        .update(&key("first", "bar"), with_phase(&bar, "Running"))
        .await
        .unwrap();
    store.delete(&key("first", "baz"), DeleteOptions::default()).await.unwrap();
    store.create_object(pod("first", "qux")).await.unwrap();

    let list_at = |rv| ListOptions::<Pod> {
        resource_version: rv,
        resource_version_match: ResourceVersionMatch::Exact,
        ..Default::default()
    };

    let then = store.list("/pods/first", list_at(snapshot_rv)).await.unwrap();
    assert_eq!(then.items, vec![bar.clone(), baz]);

    let before_anything = store.list("/pods/first", list_at(1)).await.unwrap();
    assert_eq!(before_anything.items, vec![bar]);

    let now = store.list("/pods/first", ListOptions::default()).await.unwrap();
    let phases: Vec<_> = now.items.iter().map(|p| (p.name.as_str(), p.phase.as_str())).collect();
    assert_eq!(phases, vec![("bar", "Running"), ("qux", "Pending")]);
    assert_eq!(now.resource_version, 5);
}

#[tokio::test]
async fn test_compacted_history_cannot_be_listed() {
    let mut config = test_config();
    config.storage.max_retained_records = 2;
    let store = memory_store(config);
    for i in 0..6 {
        store.create_object(pod("first", &format!("p{i}"))).await.unwrap();
    }

    // Give the watch tailer time to release the trimmed records
    let mut attempts = 0;
    let err = loop {
        match store
            .list(
                "/pods",
                ListOptions {
                    resource_version: 1,
                    resource_version_match: ResourceVersionMatch::Exact,
                    ..Default::default()
                },
            )
            .await
        {
            Err(e) => break e,
            Ok(_) if attempts < 100 => {
                attempts += 1;
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Ok(_) => panic!("history at rv 1 is still retained"),
        }
    };
    assert!(err.is_compacted());
}
