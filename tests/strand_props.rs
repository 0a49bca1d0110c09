//! Property test: strand FIFO holds across arbitrary batch patterns.

mod common;

use common::{init_test_logging, wait_until, DEADLINE};
use evstrand::{Engine, Strand};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 8,
        ..ProptestConfig::default()
    })]

    /// However submissions are batched and paced, a single producer's
    /// events on one strand run in submission order.
    #[test]
    fn strand_preserves_submission_order(batches in prop::collection::vec(1usize..25, 1..8)) {
        init_test_logging();
        let engine = Engine::builder()
            .threads(2)
            .workers(2)
            .poll_iterations(10)
            .build();
        let runner = {
            let engine = engine.clone();
            thread::spawn(move || engine.run())
        };

        let strand = Strand::new(&engine, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let handled = Arc::new(AtomicUsize::new(0));
        let total: usize = batches.iter().sum();

        let mut seq = 0;
        for batch in &batches {
            for _ in 0..*batch {
                let order = Arc::clone(&order);
                let handled = Arc::clone(&handled);
                let tag = seq;
                strand.post(move |_| {
                    order.lock().unwrap().push(tag);
                    handled.fetch_add(1, Ordering::SeqCst);
                });
                seq += 1;
            }
            // Vary the inter-arrival gap so different idle phases get hit.
            thread::sleep(Duration::from_micros((batch % 3) as u64 * 200));
        }

        prop_assert!(wait_until(DEADLINE, || handled.load(Ordering::SeqCst) == total));
        engine.stop();
        runner.join().expect("runner").expect("run");

        let expected: Vec<usize> = (0..total).collect();
        prop_assert_eq!(order.lock().unwrap().clone(), expected);
    }
}
