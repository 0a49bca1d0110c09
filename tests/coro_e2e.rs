//! Coroutine spawn, yield, external resumption, and completion accounting.

mod common;

use common::{init_test_logging, wait_until, DEADLINE};
use evstrand::{CoroResumer, Engine, StackSize, Strand};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn start(engine: &Engine) -> thread::JoinHandle<evstrand::Result<()>> {
    let engine = engine.clone();
    thread::spawn(move || engine.run())
}

#[test]
fn coroutines_yield_and_complete() {
    init_test_logging();
    let engine = Engine::builder().threads(2).workers(8).build();
    let runner = start(&engine);

    let coroutines = 100;
    let yields_each = 5;
    let resumptions = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    for _ in 0..coroutines {
        let resumptions = Arc::clone(&resumptions);
        let completions = Arc::clone(&completions);
        engine.spawn(move |cx| {
            let home = cx.home_worker();
            for _ in 0..yields_each {
                cx.yield_now();
                assert_eq!(cx.home_worker(), home, "home worker never changes");
                resumptions.fetch_add(1, Ordering::SeqCst);
            }
            completions.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(wait_until(DEADLINE, || {
        completions.load(Ordering::SeqCst) == coroutines
    }));
    assert_eq!(
        resumptions.load(Ordering::SeqCst),
        coroutines * yields_each
    );
    engine.stop();
    runner.join().expect("runner").expect("run");
    assert_eq!(engine.outstanding_events(), 0, "spawn and resume events recycled");
}

#[test]
fn suspended_coroutine_resumes_from_another_thread() {
    init_test_logging();
    let engine = Engine::builder().threads(2).workers(2).build();
    let runner = start(&engine);

    let resumer_slot: Arc<Mutex<Option<CoroResumer>>> = Arc::new(Mutex::new(None));
    let stages = Arc::new(AtomicUsize::new(0));

    {
        let resumer_slot = Arc::clone(&resumer_slot);
        let stages = Arc::clone(&stages);
        engine.spawn(move |cx| {
            stages.fetch_add(1, Ordering::SeqCst);
            *resumer_slot.lock().unwrap() = Some(cx.resumer());
            cx.suspend();
            stages.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(wait_until(DEADLINE, || stages.load(Ordering::SeqCst) == 1));
    // The coroutine is parked; fire its resumer from the test thread.
    let resumer = resumer_slot
        .lock()
        .unwrap()
        .take()
        .expect("coroutine published its resumer");
    thread::sleep(Duration::from_millis(20));
    assert_eq!(stages.load(Ordering::SeqCst), 1, "still suspended");
    resumer.resume();

    assert!(wait_until(DEADLINE, || stages.load(Ordering::SeqCst) == 2));
    engine.stop();
    runner.join().expect("runner").expect("run");
    assert_eq!(engine.outstanding_events(), 0);
}

#[test]
fn strand_spawn_pins_home_worker() {
    init_test_logging();
    let engine = Engine::builder().threads(2).workers(4).build();
    let runner = start(&engine);
    let homes = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..10 {
        let homes = Arc::clone(&homes);
        Strand::new(&engine, 3).spawn(move |cx| {
            homes.lock().unwrap().push(cx.home_worker());
            cx.yield_now();
            homes.lock().unwrap().push(cx.home_worker());
        });
    }

    assert!(wait_until(DEADLINE, || homes.lock().unwrap().len() == 20));
    engine.stop();
    runner.join().expect("runner").expect("run");
    assert!(homes.lock().unwrap().iter().all(|&h| h == 3));
}

#[test]
fn explicit_stack_size_supports_deep_recursion() {
    init_test_logging();
    let engine = Engine::builder().threads(1).workers(1).build();
    let runner = start(&engine);
    let sum = Arc::new(AtomicUsize::new(0));

    fn burn(depth: usize, frame: [u64; 32]) -> usize {
        if depth == 0 {
            frame.len()
        } else {
            burn(depth - 1, frame) + 1
        }
    }

    {
        let sum = Arc::clone(&sum);
        engine.spawn_with_stack(
            move |_cx| {
                let result = burn(2000, [0; 32]);
                sum.store(result, Ordering::SeqCst);
            },
            StackSize::new(4 * 1024 * 1024),
        );
    }

    assert!(wait_until(DEADLINE, || sum.load(Ordering::SeqCst) == 2032));
    engine.stop();
    runner.join().expect("runner").expect("run");
}

#[test]
fn coroutine_posts_interleave_with_strand_events() {
    init_test_logging();
    let engine = Engine::builder().threads(1).workers(1).build();
    let runner = start(&engine);
    let order = Arc::new(Mutex::new(Vec::new()));

    {
        let order = Arc::clone(&order);
        engine.spawn(move |cx| {
            order.lock().unwrap().push("coro-start");
            // Queue an ordinary event on the home strand; yield_now's
            // resumption lands behind it, so it runs before we continue.
            let strand = cx.strand();
            {
                let order = Arc::clone(&order);
                strand.post(move |_| {
                    order.lock().unwrap().push("queued");
                });
            }
            cx.yield_now();
            order.lock().unwrap().push("coro-end");
        });
    }

    assert!(wait_until(DEADLINE, || order.lock().unwrap().len() == 3));
    engine.stop();
    runner.join().expect("runner").expect("run");
    assert_eq!(
        order.lock().unwrap().as_slice(),
        &["coro-start", "queued", "coro-end"]
    );
}
