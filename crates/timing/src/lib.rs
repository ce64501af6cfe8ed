//! Musical time for the audio callback.
//!
//! A callback covers a fixed number of samples. When a tempo change or a loop restart falls
//! inside it, the callback is cut into up to [MAX_PERIODS] [SamplePeriod]s so that every piece
//! runs at a single tempo over a contiguous beat range. Each period carries its automation
//! ticks, a 1/32 beat grid mapped onto sample offsets.
pub mod period;
pub mod split;
pub mod transport;

pub use period::{AtmTick, MAX_PERIODS, Periods, SamplePeriod, TICKS_PER_BEAT, TickList};
pub use split::{PeriodEvent, Split, split};
pub use transport::{LoopMode, TempoChange, TimingError, Transport};
