use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side TCP peer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            timeout: Duration::from_secs(5),
        }
    }
}
