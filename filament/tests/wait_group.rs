mod common;

use common::{CountPolls, wait_until};
use filament::sync::WaitGroup;
use filament::time::sleep;
use filament::{Error, RuntimeBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[filament::test(worker_threads = 4)]
async fn test_wait_returns_after_all_done() {
    let group = WaitGroup::new();
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..8 {
        group.add(1).unwrap();
        let group = group.clone();
        let finished = finished.clone();
        filament::spawn(async move {
            sleep(Duration::from_millis(5 * i)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            group.done().unwrap();
        });
    }

    group.wait().await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 8);
    assert_eq!(group.count(), 0);
}

#[filament::test]
async fn test_wait_on_zero_counter_is_immediate() {
    let group = WaitGroup::new();
    group.wait().await.unwrap();
    assert!(group.wait_timeout(Duration::from_secs(5)).await.unwrap());
}

#[filament::test(worker_threads = 2)]
async fn test_every_waiter_is_released() {
    let group = WaitGroup::new();
    group.add(1).unwrap();

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let group = group.clone();
            filament::spawn(async move { group.wait().await })
        })
        .collect();

    sleep(Duration::from_millis(20)).await;
    group.done().unwrap();

    for waiter in waiters {
        assert!(waiter.await.is_ok());
    }
}

#[filament::test]
async fn test_wait_timeout_expires_while_counter_is_positive() {
    let group = WaitGroup::new();
    group.add(1).unwrap();

    let start = Instant::now();
    let reached = group.wait_timeout(Duration::from_millis(30)).await.unwrap();

    assert!(!reached);
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(group.count(), 1);
}

#[filament::test(worker_threads = 2)]
async fn test_wait_timeout_released_by_zero_transition() {
    let group = WaitGroup::new();
    group.add(1).unwrap();

    {
        let group = group.clone();
        filament::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            group.done().unwrap();
        });
    }

    let start = Instant::now();
    assert!(group.wait_timeout(Duration::from_secs(5)).await.unwrap());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[filament::test]
async fn test_negative_counter_poisons_and_releases_waiters() {
    let group = WaitGroup::new();
    group.add(2).unwrap();

    let plain = {
        let group = group.clone();
        filament::spawn(async move { group.wait().await })
    };
    let timed = {
        let group = group.clone();
        filament::spawn(async move { group.wait_timeout(Duration::from_secs(5)).await })
    };

    sleep(Duration::from_millis(20)).await;

    let err = group.add(-3).unwrap_err();
    assert!(matches!(err, Error::NegativeCounter { current: 2, delta: -3 }));
    assert_eq!(group.count(), 2);

    assert!(matches!(plain.await, Err(Error::Poisoned)));
    assert!(matches!(timed.await, Err(Error::Poisoned)));
    assert!(matches!(group.done(), Err(Error::Poisoned)));
}

#[test]
fn test_waiter_resumes_once_after_the_last_done() {
    let rt = RuntimeBuilder::new().worker_threads(2).build().unwrap();
    let group = WaitGroup::new();
    group.add(3).unwrap();

    let polls = Arc::new(AtomicUsize::new(0));
    let waiter = {
        let group = group.clone();
        let polls = polls.clone();
        rt.spawn(async move { CountPolls::new(group.wait(), polls).await })
    };

    wait_until(|| polls.load(Ordering::SeqCst) == 1);

    group.done().unwrap();
    group.done().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(polls.load(Ordering::SeqCst), 1);
    assert!(!waiter.is_finished());

    group.done().unwrap();
    assert!(waiter.wait_blocking().is_ok());
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}
