pub mod builtin;
pub mod plugin;
pub mod port;
pub mod state;

pub use plugin::{Kind, Plugin, context, for_each_segment};
pub use port::Port;
pub use state::StateError;

/// Widest channel layout a plugin can be connected to.
pub const MAX_CHANNELS: u32 = 8;
