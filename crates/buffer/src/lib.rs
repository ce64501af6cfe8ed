//! Pre-allocated sample and event storage for the audio path.
//!
//! - [Arena]: cache-line aligned slab carved into per-channel buffers at startup.
//! - [Audio]: a non-owning, multi-channel view into arena (or caller) memory.
//! - [EventList]: a fixed capacity, tick-ordered list of MIDI or control events.
pub mod audio;
pub mod event;
mod slab;

pub use audio::{Arena, Audio};
pub use event::{ControlEvent, EventList, MidiEvent, MidiKind, Timed};
