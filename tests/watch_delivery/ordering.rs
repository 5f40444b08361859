use std::sync::Arc;

use d_store::DeleteOptions;
use d_store::Storage;
use d_store::WatchEventType;
use d_store::WatchOptions;
use tracing_test::traced_test;

use crate::common::key;
use crate::common::memory_store;
use crate::common::next_change;
use crate::common::pod;
use crate::common::test_config;
use crate::common::with_phase;
use crate::common::Pod;

fn changes_only() -> WatchOptions<Pod> {
    WatchOptions {
        send_initial_events: Some(false),
        ..Default::default()
    }
}

#[tokio::test]
#[traced_test]
async fn test_resource_versions_are_strictly_increasing_and_gapless() {
    let store = memory_store(test_config());
    let mut all = store.watch("/pods", changes_only()).await.unwrap();
    let mut first = store.watch("/pods/first", changes_only()).await.unwrap();

    let mut first_rvs = Vec::new();
    for round in 0..10 {
        let ns = if round % 2 == 0 { "first" } else { "second" };
        let created = store.create_object(pod(ns, &format!("p{round}"))).await.unwrap();
        let updated = store
            .update(&key(ns, &created.name), with_phase(&created, "Running"))
            .await
            .unwrap();
        let deleted = store
            .delete(&key(ns, &created.name), DeleteOptions::default())
            .await
            .unwrap();
        if ns == "first" {
            first_rvs.extend([created.resource_version, updated.resource_version, deleted.resource_version]);
        }
    }

    let head = store.current_resource_version();
    assert_eq!(head, 30);

    let mut seen = Vec::new();
    while seen.len() < head as usize {
        seen.push(next_change(&mut all).await.resource_version);
    }
    assert_eq!(seen, (1..=head).collect::<Vec<_>>());

    let mut seen_first = Vec::new();
    while seen_first.len() < first_rvs.len() {
        seen_first.push(next_change(&mut first).await.resource_version);
    }
    assert_eq!(seen_first, first_rvs);
}

#[tokio::test]
async fn test_resuming_from_last_seen_version_reproduces_the_tail() {
    let store = memory_store(test_config());
    for i in 0..8 {
        store.create_object(pod("first", &format!("p{i}"))).await.unwrap();
    }

    let watch_from = |rv: u64| WatchOptions::<Pod> {
        resource_version: rv,
        ..Default::default()
    };

    let mut full = store.watch("/pods", watch_from(2)).await.unwrap();
    let mut tail = Vec::new();
    for _ in 0..6 {
        tail.push(next_change(&mut full).await);
    }
    assert_eq!(tail.first().map(|e| e.resource_version), Some(3));

    // Pretend the consumer crashed after the third event
    let resume_at = tail[2].resource_version;
    drop(full);

    let mut resumed = store.watch("/pods", watch_from(resume_at)).await.unwrap();
    let mut replayed = Vec::new();
    for _ in 0..3 {
        replayed.push(next_change(&mut resumed).await);
    }
    assert_eq!(replayed, tail[3..].to_vec());
}

#[tokio::test]
async fn test_deleted_event_carries_the_delete_version() {
    let store = memory_store(test_config());
    let mut stream = store.watch("/pods/first", changes_only()).await.unwrap();

    let mut current = store.create_object(pod("first", "bar")).await.unwrap();
    for i in 0..5 {
        current = store
            .update(&key("first", "bar"), with_phase(&current, &format!("phase-{i}")))
            .await
            .unwrap();
    }
    let deleted = store
        .delete(&key("first", "bar"), DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(deleted.resource_version, 7);

    let mut last = None;
    for _ in 0..7 {
        last = Some(next_change(&mut stream).await);
    }
    let last = last.expect("events");
    assert_eq!(last.event_type, WatchEventType::Deleted);
    assert_eq!(last.resource_version, deleted.resource_version);
    let object = last.object.expect("deleted object");
    assert_eq!(object.resource_version, deleted.resource_version);
    assert_eq!(object.phase, "phase-4");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_namespace_watch_is_isolated_under_concurrent_writes() {
    let store = Arc::new(memory_store(test_config()));
    let mut second = store.watch("/pods/second", changes_only()).await.unwrap();

    let writers: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|ns| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut current = store.create_object(pod(ns, "bar")).await.unwrap();
                for i in 0..20 {
                    current = store
                        .update(&key(ns, "bar"), with_phase(&current, &format!("{ns}-{i}")))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let mut last_rv = 0;
    for _ in 0..21 {
        let event = next_change(&mut second).await;
        assert_eq!(event.key, key("second", "bar"));
        assert!(event.resource_version > last_rv);
        last_rv = event.resource_version;
    }
    assert_eq!(store.current_resource_version(), 42);
}
