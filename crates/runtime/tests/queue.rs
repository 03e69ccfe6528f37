use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_runtime::{ActionQueue, QueueConfig};
use tokio::time::{Instant, sleep};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Log = Arc<Mutex<Vec<String>>>;

async fn record(log: Log, name: &'static str, delay: Duration) -> &'static str {
    log.lock().unwrap().push(format!("start {name}"));
    sleep(delay).await;
    log.lock().unwrap().push(format!("end {name}"));
    name
}

#[tokio::test(start_paused = true)]
async fn same_key_units_run_one_at_a_time_in_order() {
    init_tracing();
    let queue: ActionQueue = ActionQueue::new(QueueConfig::default());
    let log: Log = Arc::default();

    // Slowest first: without serialization `c` would finish before `a`.
    let mut handles = Vec::new();
    for (name, millis) in [("a", 30), ("b", 10), ("c", 0)] {
        let queue = queue.clone();
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            queue
                .enqueue("game".to_owned(), move || {
                    record(log, name, Duration::from_millis(millis))
                })
                .await
        }));
        // Let the spawned caller reach the queue before the next one.
        sleep(Duration::from_millis(1)).await;
    }

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(outputs, vec!["a", "b", "c"]);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start a", "end a", "start b", "end b", "start c", "end c"]
    );
}

#[tokio::test(start_paused = true)]
async fn different_keys_run_concurrently() {
    init_tracing();
    let queue: ActionQueue = ActionQueue::default();
    let log: Log = Arc::default();
    let started = Instant::now();

    let (left, right) = tokio::join!(
        queue.enqueue("left".to_owned(), {
            let log = Arc::clone(&log);
            move || record(log, "left", Duration::from_millis(50))
        }),
        queue.enqueue("right".to_owned(), {
            let log = Arc::clone(&log);
            move || record(log, "right", Duration::from_millis(50))
        }),
    );

    assert_eq!(left.unwrap(), "left");
    assert_eq!(right.unwrap(), "right");
    assert!(started.elapsed() < Duration::from_millis(90));

    let log = log.lock().unwrap();
    let first_end = log.iter().position(|entry| entry.starts_with("end")).unwrap();
    assert_eq!(first_end, 2, "both units start before either ends: {log:?}");
}

#[tokio::test]
async fn failed_unit_does_not_block_its_key() {
    init_tracing();
    let queue: ActionQueue = ActionQueue::default();

    let failed: Result<u32, String> = queue
        .enqueue("game".to_owned(), || async { Err("rejected".to_owned()) })
        .await
        .unwrap();
    assert_eq!(failed, Err("rejected".to_owned()));

    let next = queue
        .enqueue("game".to_owned(), || async { 7 })
        .await
        .unwrap();
    assert_eq!(next, 7);
}

#[tokio::test]
async fn clones_share_workers() {
    init_tracing();
    let queue: ActionQueue<u64> = ActionQueue::default();
    let other = queue.clone();

    queue.enqueue(1, || async {}).await.unwrap();
    other.enqueue(1, || async {}).await.unwrap();
    other.enqueue(2, || async {}).await.unwrap();

    let mut keys = queue.active_keys();
    keys.sort_unstable();
    assert_eq!(keys, vec![1, 2]);

    other.shutdown().await.unwrap();
    assert!(queue.enqueue(1, || async {}).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn released_key_waits_for_its_draining_worker() {
    init_tracing();
    let queue: ActionQueue = ActionQueue::default();
    let log: Log = Arc::default();
    let key = "g".to_owned();

    let first = {
        let queue = queue.clone();
        let log = Arc::clone(&log);
        let key = key.clone();
        tokio::spawn(async move {
            queue
                .enqueue(key, move || record(log, "a", Duration::from_millis(50)))
                .await
        })
    };
    sleep(Duration::from_millis(1)).await;

    assert!(queue.release(&key));
    let second = {
        let log = Arc::clone(&log);
        queue.enqueue(key.clone(), move || record(log, "b", Duration::from_millis(10)))
    };

    assert_eq!(second.await.unwrap(), "b");
    assert_eq!(first.await.unwrap().unwrap(), "a");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start a", "end a", "start b", "end b"]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_released_workers() {
    init_tracing();
    let queue: ActionQueue = ActionQueue::default();
    let log: Log = Arc::default();

    let pending = {
        let queue = queue.clone();
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            queue
                .enqueue("g".to_owned(), move || record(log, "a", Duration::from_millis(20)))
                .await
        })
    };
    sleep(Duration::from_millis(1)).await;

    assert!(queue.release(&"g".to_owned()));
    queue.shutdown().await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["start a", "end a"]);
    assert_eq!(pending.await.unwrap().unwrap(), "a");
}
