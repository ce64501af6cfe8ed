use crate::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] graph::Error),
    #[error(transparent)]
    Timing(#[from] timing::TimingError),
    #[error(transparent)]
    State(#[from] processor::StateError),
    #[error("no plugin with uid {0}")]
    UnknownPlugin(u32),
}

/// A control message that was rejected. The engine state is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("unknown control key {0:?}")]
    UnknownKey(String),
    #[error("malformed value {value:?} for {key}")]
    Malformed { key: &'static str, value: String },
    #[error(transparent)]
    Timing(#[from] timing::TimingError),
    #[error(transparent)]
    Routing(#[from] graph::RoutingError),
    #[error(transparent)]
    Automation(#[from] automation::LoadError),
    #[error(transparent)]
    Graph(#[from] graph::Error),
    #[error("no plugin with uid {0}")]
    UnknownPlugin(u32),
}
