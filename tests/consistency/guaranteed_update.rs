use std::sync::Arc;

use d_store::GetOptions;
use d_store::Storage;
use d_store::UpdateOptions;
use d_store::WatchOptions;

use crate::common::key;
use crate::common::memory_store;
use crate::common::next_change;
use crate::common::pod;
use crate::common::test_config;
use crate::common::with_phase;

const WRITERS: usize = 4;
const INCREMENTS: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_increments_are_never_lost() {
    let mut config = test_config();
    config.watch.watcher_buffer_size = 4 * WRITERS * INCREMENTS;
    let store = Arc::new(memory_store(config));
    store
        .create_object(with_phase(&pod("first", "counter"), "0"))
        .await
        .unwrap();
    let mut stream = store
        .watch(
            &key("first", "counter"),
            WatchOptions {
                send_initial_events: Some(false),
                recursive: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let tasks: Vec<_> = (0..WRITERS)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..INCREMENTS {
                    store
                        .guaranteed_update(
                            &key("first", "counter"),
                            UpdateOptions::default(),
                            Box::new(|current| {
                                let current = current.expect("counter exists");
                                let n: usize = current.phase.parse().expect("numeric phase");
                                Ok(with_phase(&current, &(n + 1).to_string()))
                            }),
                        )
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let total = WRITERS * INCREMENTS;
    let counter = store
        .get(&key("first", "counter"), GetOptions::default())
        .await
        .unwrap()
        .expect("counter");
    assert_eq!(counter.phase, total.to_string());
    assert_eq!(counter.resource_version, total as u64 + 1);

    // Every increment is observed once, in order
    for expected in 1..=total {
        let event = next_change(&mut stream).await;
        let object = event.object.expect("object");
        assert_eq!(object.phase, expected.to_string());
    }
}
