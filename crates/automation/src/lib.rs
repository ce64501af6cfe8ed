//! Per-plugin port automation.
//!
//! A song's automation is loaded once into an immutable [Automation] and swapped in whole when
//! it changes. The only state that moves during playback is each port's cursor, which is
//! advanced by the worker rendering the track that owns the plugin.
pub mod curve;
pub mod format;

pub use curve::{AtmPlugin, AtmPoint, AtmPort, Automation};
pub use format::LoadError;
