use std::sync::atomic::{AtomicBool, Ordering};

use crate::Padded;

/// A busy flag whose ownership moves between two threads: the coordinator arms it before waking
/// a worker, the worker releases it once it has finished its share of the work. Waiting for the
/// flag to clear is the coordinator's barrier.
#[derive(Default)]
pub struct Handoff {
    busy: Padded<AtomicBool>,
}

impl Handoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the worker as owing a release.
    pub fn arm(&self) {
        self.busy.store(true, Ordering::Release);
    }

    /// Called by the worker when its work is done. Publishes everything the worker wrote.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spin until the worker releases the flag. Returns the number of spins.
    pub fn wait_idle(&self) -> u64 {
        let mut spins = 0u64;
        let mut iters = 1;
        while self.is_busy() {
            (0..iters).for_each(|_| std::hint::spin_loop());
            iters = (iters * 2).min(64);
            spins += 1;
            if spins % (1 << 16) == 0 {
                std::thread::yield_now();
            }
        }
        spins
    }
}
