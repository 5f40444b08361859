use std::collections::HashSet;
use std::sync::Arc;

use d_store::Storage;
use d_store::WatchEventType;
use d_store::WatchOptions;
use tokio::sync::Barrier;

use crate::common::expect_silence;
use crate::common::key;
use crate::common::memory_store;
use crate::common::next_change;
use crate::common::next_event;
use crate::common::pod;
use crate::common::test_config;
use crate::common::with_phase;

#[tokio::test]
async fn test_cluster_watch_replays_then_bookmarks_then_streams() {
    let store = memory_store(test_config());
    let first = store.create_object(pod("first", "bar")).await.unwrap();
    let second = store.create_object(pod("second", "bar")).await.unwrap();

    let mut stream = store
        .watch(
            "/pods",
            WatchOptions {
                send_initial_events: Some(true),
                allow_watch_bookmarks: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let added = next_event(&mut stream).await;
    assert_eq!(added.event_type, WatchEventType::Added);
    assert_eq!(added.object.as_ref(), Some(&first));

    let added = next_event(&mut stream).await;
    assert_eq!(added.event_type, WatchEventType::Added);
    assert_eq!(added.object.as_ref(), Some(&second));

    let done = next_event(&mut stream).await;
    assert_eq!(done.event_type, WatchEventType::Bookmark);
    assert!(done.initial_events_end);
    assert_eq!(done.resource_version, second.resource_version);

    expect_silence(&mut stream).await;

    store
        .update(&key("first", "bar"), with_phase(&first, "Running"))
        .await
        .unwrap();
    let modified = next_event(&mut stream).await;
    assert_eq!(modified.event_type, WatchEventType::Modified);
    assert_eq!(modified.key, key("first", "bar"));
    assert!(modified.resource_version > second.resource_version);
    assert_eq!(
        modified.prev_object.map(|p| p.phase),
        Some("Pending".to_string())
    );
}

#[tokio::test]
async fn test_initial_events_without_bookmarks_skip_end_marker() {
    let store = memory_store(test_config());
    store.create_object(pod("first", "bar")).await.unwrap();

    let mut stream = store
        .watch(
            "/pods",
            WatchOptions {
                send_initial_events: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(next_event(&mut stream).await.event_type, WatchEventType::Added);
    expect_silence(&mut stream).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_boundary_has_no_gap_and_no_duplicate() {
    const BEFORE: usize = 100;
    const RACING: usize = 50;
    const AFTER: usize = 50;
    const PODS: usize = BEFORE + RACING + AFTER;
    // The consumer only starts reading once the writer is done
    let mut config = test_config();
    config.watch.watcher_buffer_size = 2 * PODS;
    let store = Arc::new(memory_store(config));
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let store = store.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            let create = |i: usize| {
                let store = store.clone();
                async move {
                    store.create_object(pod("race", &format!("p{i:03}"))).await.unwrap();
                }
            };
            for i in 0..BEFORE {
                create(i).await;
            }
            barrier.wait().await;
            // Commits interleave with the subscription
            for i in BEFORE..BEFORE + RACING {
                create(i).await;
                tokio::task::yield_now().await;
            }
            barrier.wait().await;
            for i in BEFORE + RACING..PODS {
                create(i).await;
            }
        })
    };

    barrier.wait().await;
    let mut stream = store
        .watch(
            "/pods/race",
            WatchOptions {
                send_initial_events: Some(true),
                allow_watch_bookmarks: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    barrier.wait().await;
    writer.await.unwrap();

    let mut keys = HashSet::new();
    let snapshot_rv = loop {
        let event = next_event(&mut stream).await;
        if event.initial_events_end {
            break event.resource_version;
        }
        assert!(!event.is_bookmark(), "unexpected bookmark before the snapshot end");
        assert_eq!(event.event_type, WatchEventType::Added);
        assert!(keys.insert(event.key.clone()), "duplicate event for {}", event.key);
    };
    assert!(snapshot_rv >= BEFORE as u64);
    assert!(snapshot_rv <= (BEFORE + RACING) as u64);
    assert_eq!(keys.len() as u64, snapshot_rv);

    let mut last_live_rv = snapshot_rv;
    let mut live = 0;
    while keys.len() < PODS {
        let event = next_change(&mut stream).await;
        assert_eq!(event.event_type, WatchEventType::Added);
        assert!(keys.insert(event.key.clone()), "duplicate event for {}", event.key);
        assert_eq!(event.resource_version, last_live_rv + 1, "gap after the snapshot");
        last_live_rv = event.resource_version;
        live += 1;
    }

    assert!(live >= AFTER);
    assert_eq!(last_live_rv, PODS as u64);
    expect_silence(&mut stream).await;
}
