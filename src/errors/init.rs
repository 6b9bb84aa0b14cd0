use thiserror::Error;

/// Failures while bringing up the process-wide logging pipeline.
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Invalid logging {field}: {value:?}")]
    InvalidLoggingSetting { field: &'static str, value: String },

    #[error("Tracing subscriber could not be installed: {details}")]
    SubscriberInstall { details: String },
}

impl InitializationError {
    pub fn invalid_setting(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidLoggingSetting {
            field,
            value: value.into(),
        }
    }

    pub fn subscriber(details: impl Into<String>) -> Self {
        Self::SubscriberInstall {
            details: details.into(),
        }
    }
}
