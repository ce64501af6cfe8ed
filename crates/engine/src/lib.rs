//! The real-time core: a transport, a set of tracks routed into one another and a worker pool
//! rendering them, driven by one audio callback.
//!
//! ## Usage
//!
//! ```rs
//! use cadence_engine::{Engine, Options};
//!
//! let mut engine = Engine::init(Options::from_env()?)?;
//! let control = engine.control();
//! control.insert_plugin(1, 0, 100, Box::new(Sine::new(8, PolyMode::Poly)))?;
//! control.apply("routing|1|0|0|0\n\\\n")?;
//! control.apply("play")?;
//!
//! // In the audio callback.
//! engine.run_callback(&mut output, &midi);
//! ```
mod config;
mod context;
mod control;
mod error;
mod housekeeping;

pub use config::{ConfigError, Options};
pub use context::{Engine, MASTER, TransportSnapshot};
pub use control::ControlHandle;
pub use error::{ControlError, Error};
