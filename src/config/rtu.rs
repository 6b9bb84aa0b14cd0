use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, StopBits};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// Window for one request/response exchange
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Read timeout applied to the port itself
    #[serde(with = "humantime_serde")]
    pub serial_timeout: Duration,

    /// Drain time between write completion and TX-enable release
    #[serde(with = "humantime_serde")]
    pub turnaround_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            timeout: Duration::from_secs(5),
            serial_timeout: Duration::from_millis(100),
            turnaround_delay: Duration::ZERO,
        }
    }
}

impl Config {
    pub fn serial_port_info(&self) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            self.device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}
