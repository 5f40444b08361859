use std::time::Duration;

use d_store::Storage;
use d_store::WatchOptions;
use tokio::time::timeout;

use crate::common::memory_store;
use crate::common::next_event;
use crate::common::pod;
use crate::common::test_config;
use crate::common::Pod;

fn progress_watch() -> WatchOptions<Pod> {
    WatchOptions {
        send_initial_events: Some(false),
        progress_notify: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bookmarks_arrive_without_mutations() {
    let store = memory_store(test_config());
    let mut stream = store.watch("/pods", progress_watch()).await.unwrap();

    for _ in 0..3 {
        let event = next_event(&mut stream).await;
        assert!(event.is_bookmark());
        assert_eq!(event.resource_version, 0);
    }
}

#[tokio::test]
async fn test_bookmarks_never_reorder_real_events() {
    let store = memory_store(test_config());
    let mut stream = store.watch("/pods", progress_watch()).await.unwrap();

    for i in 0..20 {
        store.create_object(pod("first", &format!("p{i}"))).await.unwrap();
        if i % 5 == 0 {
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
    }

    let mut last_rv = 0;
    let mut changes = 0;
    let mut bookmarks = 0;
    while changes < 20 {
        let event = next_event(&mut stream).await;
        assert!(event.resource_version >= last_rv);
        if event.is_bookmark() {
            bookmarks += 1;
        } else {
            assert!(event.resource_version > last_rv);
            changes += 1;
        }
        last_rv = event.resource_version;
    }
    assert!(bookmarks > 0);
}

#[tokio::test]
async fn test_allow_watch_bookmarks_alone_does_not_enable_periodic_bookmarks() {
    let store = memory_store(test_config());
    let mut stream = store
        .watch(
            "/pods",
            WatchOptions {
                send_initial_events: Some(false),
                allow_watch_bookmarks: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Several progress intervals pass without a bookmark
    let res = timeout(Duration::from_millis(300), stream.recv()).await;
    assert!(res.is_err());

    // An explicit request still reaches it
    store.request_watch_progress().await.unwrap();
    assert!(next_event(&mut stream).await.is_bookmark());
}
