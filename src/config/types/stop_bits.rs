use serde::{Deserialize, Serialize};

use crate::errors::ConfigValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    One,
    /// Carried in the model; the serial backend cannot configure it.
    OnePointFive,
    Two,
}

impl TryFrom<StopBits> for serialport::StopBits {
    type Error = ConfigValidationError;

    fn try_from(stop_bits: StopBits) -> Result<Self, Self::Error> {
        match stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => Err(ConfigValidationError::unsupported_serial(
                "1.5 stop bits are not supported by the serial backend",
            )),
        }
    }
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

impl std::fmt::Display for StopBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}
