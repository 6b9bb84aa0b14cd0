use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported serial setting: {0}")]
    UnsupportedSerial(String),
}

impl ConfigValidationError {
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config(details.into())
    }

    pub fn unsupported_serial(details: impl Into<String>) -> Self {
        Self::UnsupportedSerial(details.into())
    }
}
