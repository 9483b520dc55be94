use filament::sync::WaitGroup;
use filament::time::sleep;
use filament::{Backend, RuntimeBuilder, spawn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_fibers_resume_in_the_order_they_became_runnable() {
    let rt = RuntimeBuilder::new().worker_threads(1).build().unwrap();
    let solo = rt.single_threaded("fifo").unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let order = order.clone();
        solo.spawn(async move {
            let children: Vec<_> = (0..5)
                .map(|i| {
                    let order = order.clone();
                    spawn(async move {
                        order.lock().unwrap().push(i);
                        filament::yield_now().await;
                        order.lock().unwrap().push(i + 10);
                    })
                })
                .collect();

            for child in children {
                child.await;
            }
        })
        .unwrap()
    };

    handle.wait_blocking();
    assert_eq!(
        *order.lock().unwrap(),
        vec![0, 1, 2, 3, 4, 10, 11, 12, 13, 14]
    );
}

#[test]
fn test_wake_from_another_thread_is_not_overtaken_by_later_spawns() {
    let rt = RuntimeBuilder::new().worker_threads(1).build().unwrap();
    let solo = rt.single_threaded("fifo").unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let order = order.clone();
        solo.spawn(async move {
            let group = WaitGroup::new();
            group.add(1).unwrap();

            let woken = {
                let group = group.clone();
                let order = order.clone();
                spawn(async move {
                    group.wait().await.unwrap();
                    order.lock().unwrap().push("woken");
                })
            };

            // Let it park on the group.
            filament::yield_now().await;

            let remote = group.clone();
            thread::spawn(move || remote.done().unwrap()).join().unwrap();

            let spawned = {
                let order = order.clone();
                spawn(async move {
                    order.lock().unwrap().push("spawned");
                })
            };

            woken.await;
            spawned.await;
        })
        .unwrap()
    };

    handle.wait_blocking();
    assert_eq!(*order.lock().unwrap(), vec!["woken", "spawned"]);
}

#[test]
fn test_idle_schedulers_steal_queued_fibers() {
    let rt = RuntimeBuilder::new().worker_threads(1).build().unwrap();
    let pool = rt.parallel("steal", 4, 4).unwrap();

    let handle = pool
        .spawn(async {
            // Blocking bodies keep the spawning scheduler busy.
            let children: Vec<_> = (0..16)
                .map(|_| {
                    spawn(async {
                        thread::sleep(Duration::from_millis(10));
                        thread::current().id()
                    })
                })
                .collect();

            let mut threads = HashSet::new();
            for child in children {
                threads.insert(child.await);
            }
            threads
        })
        .unwrap();

    let threads = handle.wait_blocking();
    assert!(threads.len() > 1, "all 16 fibers ran on one scheduler");
}

#[test]
fn test_retired_schedulers_forward_their_fibers() {
    let rt = RuntimeBuilder::new().worker_threads(1).build().unwrap();
    let pool = rt.parallel("shrink", 1, 4).unwrap();

    let shrunk = Arc::new(AtomicBool::new(false));
    let late = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let shrunk = shrunk.clone();
            let late = late.clone();
            pool.spawn(async move {
                for _ in 0..40 {
                    sleep(Duration::from_millis(2)).await;
                    if shrunk.load(Ordering::SeqCst) {
                        let name = thread::current().name().map(str::to_string);
                        late.lock().unwrap().push(name);
                    }
                }
            })
            .unwrap()
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(pool.resize(1).unwrap(), 1);
    thread::sleep(Duration::from_millis(20));
    shrunk.store(true, Ordering::SeqCst);

    for handle in handles {
        handle.wait_blocking();
    }

    let late = late.lock().unwrap();
    assert!(!late.is_empty());
    assert!(
        late.iter()
            .all(|name| name.as_deref() == Some("filament-shrink-0"))
    );
}

#[test]
fn test_fiber_panic_is_resumed_in_joiner() {
    let rt = RuntimeBuilder::new().worker_threads(2).build().unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        rt.block_on(async {
            let handle = spawn(async {
                if thread::current().name().is_some() {
                    panic!("fiber exploded");
                }
                1
            });
            handle.await
        })
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"fiber exploded"));

    // The runtime survives a panicking fiber.
    assert_eq!(rt.block_on(async { 5 }), 5);
}

#[test]
fn test_portable_poll_backend() {
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .backend(Backend::Poll)
        .build()
        .unwrap();

    let result = rt.block_on(async {
        sleep(Duration::from_millis(10)).await;
        spawn(async { 21 }).await * 2
    });

    assert_eq!(result, 42);
}

#[test]
fn test_builder_rejects_inverted_bounds() {
    let result = RuntimeBuilder::new().min_threads(4).max_threads(2).build();
    assert!(matches!(result, Err(filament::Error::InvalidConfig(_))));
}

#[test]
fn test_default_context_grows_and_shrinks() {
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .min_threads(1)
        .max_threads(3)
        .build()
        .unwrap();

    let context = rt.default_context();
    assert_eq!(context.size(), 2);
    assert_eq!(context.resize(3).unwrap(), 3);
    assert_eq!(context.resize(1).unwrap(), 1);

    let result = rt.block_on(async {
        let handles: Vec<_> = (0..16).map(|i| spawn(async move { i })).collect();
        let mut sum = 0;
        for handle in handles {
            sum += handle.await;
        }
        sum
    });

    assert_eq!(result, (0..16).sum());
}
