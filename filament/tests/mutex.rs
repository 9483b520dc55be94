use filament::sync::Mutex;
use filament::time::sleep;
use std::sync::Arc;
use std::time::Duration;

#[filament::test(worker_threads = 4)]
async fn test_mutex_serializes_increments() {
    let counter = Arc::new(Mutex::new(0u32));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let counter = counter.clone();
            filament::spawn(async move {
                for _ in 0..10 {
                    let mut guard = counter.lock().await;
                    let value = *guard;
                    filament::yield_now().await;
                    *guard = value + 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await;
    }

    assert_eq!(*counter.lock().await, 500);
}

#[filament::test(worker_threads = 1)]
async fn test_mutex_waiters_are_served_in_arrival_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let held = log.lock().await;

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let log = log.clone();
            filament::spawn(async move {
                log.lock().await.push(i);
            })
        })
        .collect();

    // Give every waiter time to queue up in spawn order.
    for _ in 0..3 {
        sleep(Duration::from_millis(10)).await;
    }
    drop(held);

    for handle in handles {
        handle.await;
    }

    assert_eq!(*log.lock().await, vec![0, 1, 2]);
}
