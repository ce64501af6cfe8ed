//! Bounded busy-waiting.
//!
//! Real-time threads may not block on primitives with unbounded latency, but they also may not
//! spin forever waiting on a peer that never finishes. [SpinPolicy] names the give-up rule: a
//! wait ends when its condition holds, or when either the spin budget or the wall-clock deadline
//! is exhausted, whichever comes first. Giving up is reported to the caller as
//! [SpinOutcome::TimedOut]; what to do about it (log and continue with stale input) is the
//! caller's contract.
use std::time::{Duration, Instant};

/// How often (in spins) the wall clock is sampled. Reading the clock is cheap but not free, and
/// the common case is that the condition becomes true long before the first sample.
const CLOCK_INTERVAL: u64 = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Hard cap on the number of condition checks.
    pub max_spins: u64,

    /// Optional wall-clock deadline measured from the start of the wait.
    pub deadline: Option<Duration>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpinOutcome {
    Ready { spins: u64 },
    TimedOut { spins: u64, elapsed: Duration },
}

impl SpinPolicy {
    pub const fn new(max_spins: u64, deadline: Option<Duration>) -> Self {
        Self {
            max_spins,
            deadline,
        }
    }

    /// Only bound the wait by the number of checks.
    pub const fn spins(max_spins: u64) -> Self {
        Self::new(max_spins, None)
    }

    /// Spin until `ready` returns true or the policy gives up. The clock starts on the first
    /// failed check, so `elapsed` covers the whole wait.
    pub fn spin_until(&self, mut ready: impl FnMut() -> bool) -> SpinOutcome {
        if ready() {
            return SpinOutcome::Ready { spins: 0 };
        }
        let start = self.deadline.map(|_| Instant::now());
        let elapsed = || start.map(|s| s.elapsed()).unwrap_or_default();
        let mut spins = 0;
        while spins < self.max_spins {
            spins += 1;
            std::hint::spin_loop();
            if ready() {
                return SpinOutcome::Ready { spins };
            }
            if spins % CLOCK_INTERVAL == 0 {
                if let Some(deadline) = self.deadline {
                    let elapsed = elapsed();
                    if elapsed >= deadline {
                        return SpinOutcome::TimedOut { spins, elapsed };
                    }
                }
            }
        }
        SpinOutcome::TimedOut {
            spins,
            elapsed: elapsed(),
        }
    }
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self::new(100_000_000, Some(Duration::from_millis(50)))
    }
}

impl SpinOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{SpinOutcome, SpinPolicy};
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    };

    #[test]
    fn ready_immediately() {
        let outcome = SpinPolicy::spins(10).spin_until(|| true);
        assert_eq!(outcome, SpinOutcome::Ready { spins: 0 });
    }

    #[test]
    fn spin_budget_exhausted() {
        let outcome = SpinPolicy::spins(100).spin_until(|| false);
        assert!(matches!(outcome, SpinOutcome::TimedOut { spins: 100, .. }));
    }

    #[test]
    fn deadline_ends_the_wait() {
        let policy = SpinPolicy::new(u64::MAX, Some(Duration::from_millis(5)));
        let start = Instant::now();
        let outcome = policy.spin_until(|| false);
        assert!(!outcome.is_ready());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn elapsed_covers_the_first_clock_interval() {
        let policy = SpinPolicy::new(u64::MAX, Some(Duration::from_millis(10)));
        let mut calls = 0;
        let outcome = policy.spin_until(|| {
            calls += 1;
            if calls == 2 {
                std::thread::sleep(Duration::from_millis(20));
            }
            false
        });
        let SpinOutcome::TimedOut { spins, elapsed } = outcome else {
            panic!("expected a timeout, got {outcome:?}");
        };
        assert_eq!(spins, super::CLOCK_INTERVAL);
        assert!(elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn observes_other_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let thread = std::thread::spawn({
            let flag = flag.clone();
            move || {
                std::thread::sleep(Duration::from_millis(2));
                flag.store(true, Ordering::Release);
            }
        });
        let policy = SpinPolicy::new(u64::MAX, Some(Duration::from_secs(10)));
        assert!(policy.spin_until(|| flag.load(Ordering::Acquire)).is_ready());
        thread.join().unwrap();
    }
}
