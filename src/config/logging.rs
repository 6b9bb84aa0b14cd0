use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::errors::InitializationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory for rotated log files; console-only when unset
    pub log_dir: Option<String>,

    /// Enable trace-level logging for frame contents
    pub trace_frames: bool,

    /// Minimum log level for console output
    pub level: String,

    /// Log format (pretty or json)
    pub format: String,

    /// Whether to include source code location in logs
    pub include_location: bool,

    /// Whether to include thread IDs in logs
    pub thread_ids: bool,

    /// Whether to include thread names in logs
    pub thread_names: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: None,
            trace_frames: false,
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
            thread_ids: false,
            thread_names: false,
        }
    }
}

impl Config {
    pub fn get_level_filter(&self) -> LevelFilter {
        match self.level.to_lowercase().as_str() {
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO, // Fallback to INFO if invalid
        }
    }

    pub fn validate(&self) -> Result<(), InitializationError> {
        match self.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(InitializationError::invalid_setting("level", other)),
        }
        match self.format.to_lowercase().as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(InitializationError::invalid_setting("format", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        let config = Config {
            level: "invalid".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_filter() {
        let config = Config {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_level_filter(), LevelFilter::DEBUG);

        let config = Config {
            level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(config.get_level_filter(), LevelFilter::INFO); // fallback
    }
}
