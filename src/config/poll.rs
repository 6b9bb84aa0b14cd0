use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polled-device timer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
        }
    }
}
