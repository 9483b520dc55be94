use filament::time::{sleep, sleep_until};
use std::time::{Duration, Instant};

#[filament::test]
async fn test_sleep_basic() {
    let start = Instant::now();
    sleep(Duration::from_millis(50)).await;
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(50),
        "Sleep should wait at least the specified duration"
    );
}

#[filament::test]
async fn test_sleep_zero_duration() {
    let start = Instant::now();
    sleep(Duration::from_millis(0)).await;
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_millis(10),
        "Zero duration sleep should be fast"
    );
}

#[filament::test]
async fn test_sleep_until_past_deadline_is_immediate() {
    let start = Instant::now();
    sleep_until(start - Duration::from_millis(5)).await;

    assert!(start.elapsed() < Duration::from_millis(10));
}

#[filament::test]
async fn test_sleep_in_function() {
    let start = Instant::now();
    sleep_and_record(start).await;
}

async fn sleep_and_record(start: Instant) {
    let elapsed_before = start.elapsed();
    sleep(Duration::from_millis(30)).await;
    let elapsed_after = start.elapsed();

    assert!(elapsed_after - elapsed_before >= Duration::from_millis(30));
}

#[filament::test(worker_threads = 2)]
async fn test_sleepers_wake_in_deadline_order() {
    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    let handles: Vec<_> = [60u64, 20, 40]
        .into_iter()
        .map(|ms| {
            let order = order.clone();
            filament::spawn(async move {
                sleep(Duration::from_millis(ms)).await;
                order.lock().unwrap().push(ms);
            })
        })
        .collect();

    for handle in handles {
        handle.await;
    }

    assert_eq!(*order.lock().unwrap(), vec![20, 40, 60]);
}

#[filament::test]
async fn test_many_concurrent_sleeps() {
    let start = Instant::now();

    let handles: Vec<_> = (0..100)
        .map(|i| filament::spawn(async move { sleep(Duration::from_millis(20 + i % 5)).await }))
        .collect();

    for handle in handles {
        handle.await;
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(20));
    assert!(
        elapsed < Duration::from_secs(2),
        "sleeps should overlap, took {elapsed:?}"
    );
}
