//! The workshop: at-most-one drainer per worker.
//!
//! One atomic claim slot per worker. A thread wanting to drain worker `n`
//! swaps the slot to taken with acquire/release ordering; only the thread
//! that observed the available state holds exclusive execution rights.
//! Storing back with release ordering publishes the drain's effects to the
//! next claimant. This replaces per-worker locks: no two threads ever drain
//! the same worker concurrently, which is what keeps the event queue's
//! single-consumer discipline intact.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Claim slots for every worker in the engine.
pub(crate) struct Workshop {
    /// `false` = worker available, `true` = checked out.
    slots: Box<[AtomicBool]>,
}

impl Workshop {
    /// Creates a workshop with every worker available.
    pub(crate) fn new(worker_num: usize) -> Self {
        Self {
            slots: (0..worker_num).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Attempts to check out worker `index`.
    ///
    /// Returns a guard granting exclusive drain rights, or `None` when
    /// another thread holds the worker. The guard stores the worker back on
    /// drop, including during unwinding, so a faulting drain cannot strand
    /// the worker in the taken state.
    pub(crate) fn checkout(&self, index: usize) -> Option<Checkout<'_>> {
        if self.slots[index].swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Checkout {
            workshop: self,
            index,
        })
    }
}

impl fmt::Debug for Workshop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taken = self
            .slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed))
            .count();
        f.debug_struct("Workshop")
            .field("workers", &self.slots.len())
            .field("taken", &taken)
            .finish()
    }
}

/// Exclusive drain rights for one worker.
pub(crate) struct Checkout<'a> {
    workshop: &'a Workshop,
    index: usize,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.workshop.slots[self.index].store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn second_claim_fails_until_release() {
        let shop = Workshop::new(2);
        let claim = shop.checkout(0).expect("first claim");
        assert!(shop.checkout(0).is_none());
        assert!(shop.checkout(1).is_some(), "other slots stay independent");
        drop(claim);
        assert!(shop.checkout(0).is_some());
    }

    #[test]
    fn claim_released_on_unwind() {
        let shop = Arc::new(Workshop::new(1));
        let shop2 = Arc::clone(&shop);
        let result = thread::spawn(move || {
            let _claim = shop2.checkout(0).expect("claim");
            panic!("drain fault");
        })
        .join();
        assert!(result.is_err());
        assert!(shop.checkout(0).is_some(), "slot must be returned on unwind");
    }

    #[test]
    fn contended_claims_grant_exactly_one_holder() {
        let shop = Arc::new(Workshop::new(1));
        let threads = 8;
        let rounds = 500;
        let barrier = Arc::new(Barrier::new(threads));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let shop = Arc::clone(&shop);
                let barrier = Arc::clone(&barrier);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..rounds {
                        if let Some(claim) = shop.checkout(0) {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                            drop(claim);
                        }
                        std::hint::spin_loop();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("claimant should complete");
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
