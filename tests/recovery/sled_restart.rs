use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use d_store::BackendKind;
use d_store::DeleteOptions;
use d_store::GetOptions;
use d_store::JsonCodec;
use d_store::ListOptions;
use d_store::Storage;
use d_store::Store;
use d_store::WatchEventType;
use d_store::WatchOptions;
use tempfile::tempdir;

use crate::common::key;
use crate::common::key_func;
use crate::common::next_change;
use crate::common::pod;
use crate::common::test_config;
use crate::common::with_phase;
use crate::common::Pod;

/// Opens the sled store at `dir`, waiting for a previous instance to release
/// the database lock.
async fn open_sled(dir: &Path) -> Store<Pod> {
    let mut config = test_config();
    config.storage.backend = BackendKind::Sled;
    config.storage.db_root_dir = dir.to_path_buf();

    let mut attempts = 0;
    loop {
        match Store::open(config.clone(), Arc::new(JsonCodec::<Pod>::new()), key_func()) {
            Ok(store) => return store,
            Err(e) if attempts < 50 => {
                attempts += 1;
                tracing::debug!("sled not released yet: {}", e);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("failed to reopen sled store: {e}"),
        }
    }
}

#[tokio::test]
async fn test_restart_preserves_objects_and_resource_version() {
    let dir = tempdir().unwrap();

    let (bar, rv_before) = {
        let store = open_sled(dir.path()).await;
        let bar = store.create_object(pod("first", "bar")).await.unwrap();
        let baz = store.create_object(pod("first", "baz")).await.unwrap();
        let bar = store
            .update(&key("first", "bar"), with_phase(&bar, "Running"))
            .await
            .unwrap();
        store
            .delete(&key("first", "baz"), DeleteOptions::default())
            .await
            .unwrap();
        assert_eq!(baz.resource_version, 2);
        store.flush().unwrap();
        (bar, store.current_resource_version())
    };
    assert_eq!(rv_before, 4);

    let store = open_sled(dir.path()).await;
    assert_eq!(store.current_resource_version(), rv_before);

    let fetched = store
        .get(&key("first", "bar"), GetOptions::default())
        .await
        .unwrap()
        .expect("bar survives restart");
    assert_eq!(fetched, bar);

    let listed = store.list("/pods", ListOptions::default()).await.unwrap();
    assert_eq!(listed.items, vec![bar]);
    assert_eq!(listed.resource_version, rv_before);

    // Numbering continues where it stopped
    let qux = store.create_object(pod("first", "qux")).await.unwrap();
    assert_eq!(qux.resource_version, rv_before + 1);
}

#[tokio::test]
async fn test_history_before_restart_is_compacted() {
    let dir = tempdir().unwrap();
    {
        let store = open_sled(dir.path()).await;
        for name in ["a", "b", "c"] {
            store.create_object(pod("first", name)).await.unwrap();
        }
        store.flush().unwrap();
    }

    let store = open_sled(dir.path()).await;
    let err = store
        .watch(
            "/pods",
            WatchOptions {
                resource_version: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_compacted());

    // Resuming from the recovered version works
    let mut stream = store
        .watch(
            "/pods",
            WatchOptions {
                resource_version: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store.create_object(pod("first", "d")).await.unwrap();
    let event = next_change(&mut stream).await;
    assert_eq!(event.event_type, WatchEventType::Added);
    assert_eq!(event.resource_version, 4);
}
