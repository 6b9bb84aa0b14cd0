use thiserror::Error;

use super::{
    ConfigValidationError, FrameError, InitializationError, ProtocolError, TransportError,
};

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Initialization error: {0}")]
    Init(#[from] InitializationError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl ModbusError {
    pub fn argument(details: impl Into<String>) -> Self {
        ModbusError::InvalidArgument(details.into())
    }

    pub fn unsupported(details: impl Into<String>) -> Self {
        ModbusError::Unsupported(details.into())
    }

    /// True when the failure was a receive timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ModbusError::Transport(TransportError::Timeout { .. })
        )
    }
}

impl From<config::ConfigError> for ModbusError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(ConfigValidationError::config(err.to_string()))
    }
}
