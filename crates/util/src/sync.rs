pub mod handoff;
pub use handoff::Handoff;

pub mod spin;
pub use spin::{SpinOutcome, SpinPolicy};

pub mod spin_lock;
pub use spin_lock::SpinLock;
