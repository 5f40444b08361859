use std::time::Duration;

use d_store::CloseReason;
use d_store::Storage;
use d_store::WatchError;
use d_store::WatchOptions;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use crate::common::memory_store;
use crate::common::next_change;
use crate::common::pod;
use crate::common::test_config;
use crate::common::Pod;
use crate::common::EVENT_WAIT_IN_MS;

fn changes_only() -> WatchOptions<Pod> {
    WatchOptions {
        send_initial_events: Some(false),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_cancel_closes_stream_within_bounded_time() {
    let store = memory_store(test_config());
    let cancel = CancellationToken::new();
    let mut stream = store
        .watch(
            "/pods",
            WatchOptions {
                cancel: Some(cancel.clone()),
                ..changes_only()
            },
        )
        .await
        .unwrap();
    assert_eq!(store.active_watchers(), 1);

    cancel.cancel();
    let end = timeout(Duration::from_millis(EVENT_WAIT_IN_MS), stream.next())
        .await
        .expect("stream did not close");
    assert!(end.is_none());
    assert_eq!(stream.close_reason(), Some(CloseReason::Canceled));

    // Later writes are not queued for the closed watch
    assert_eq!(store.active_watchers(), 0);
    for i in 0..50 {
        store.create_object(pod("first", &format!("p{i}"))).await.unwrap();
    }
    assert_eq!(store.active_watchers(), 0);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
#[traced_test]
async fn test_slow_consumer_overflows_alone() {
    let mut config = test_config();
    config.watch.watcher_buffer_size = 4;
    config.watch.stream_buffer_size = 1;
    let store = memory_store(config);

    let mut slow = store.watch("/pods", changes_only()).await.unwrap();
    let mut fast = store.watch("/pods", changes_only()).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut rvs = Vec::new();
        for _ in 0..30 {
            rvs.push(next_change(&mut fast).await.resource_version);
        }
        rvs
    });

    for i in 0..30 {
        store.create_object(pod("first", &format!("p{i}"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let rvs = reader.await.unwrap();
    assert_eq!(rvs, (1..=30).collect::<Vec<_>>());

    // The slow watch delivers what it buffered, then the overflow
    let mut delivered = 0;
    let failure = loop {
        match timeout(Duration::from_millis(EVENT_WAIT_IN_MS), slow.next())
            .await
            .expect("slow stream stalled")
        {
            Some(Ok(_)) => delivered += 1,
            Some(Err(e)) => break e,
            None => panic!("slow stream ended without an error"),
        }
    };
    assert!(delivered < 30);
    assert!(matches!(failure, WatchError::Overflow { capacity: 4, .. }));
    assert!(slow.next().await.is_none());
}

#[tokio::test]
async fn test_dropping_store_stops_watches() {
    let store = memory_store(test_config());
    let mut stream = store.watch("/pods", changes_only()).await.unwrap();

    drop(store);

    let last = timeout(Duration::from_millis(EVENT_WAIT_IN_MS), stream.next())
        .await
        .expect("stream did not close");
    assert!(matches!(last, Some(Err(WatchError::Stopped))));
    assert!(stream.next().await.is_none());
}
