use serde::{Deserialize, Serialize};

use crate::errors::ConfigValidationError;

/// Parity settings of the serial collaborator. `Mark` and `Space` exist in
/// the data model for completeness; the serialport backend cannot provide
/// them, so converting either fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl TryFrom<Parity> for serialport::Parity {
    type Error = ConfigValidationError;

    fn try_from(parity: Parity) -> Result<Self, Self::Error> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark | Parity::Space => Err(ConfigValidationError::unsupported_serial(
                format!("{parity} parity is not supported by the serial backend"),
            )),
        }
    }
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::None => write!(f, "none"),
            Parity::Odd => write!(f, "odd"),
            Parity::Even => write!(f, "even"),
            Parity::Mark => write!(f, "mark"),
            Parity::Space => write!(f, "space"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_parities_convert() {
        assert!(serialport::Parity::try_from(Parity::None).is_ok());
        assert!(serialport::Parity::try_from(Parity::Odd).is_ok());
        assert!(serialport::Parity::try_from(Parity::Even).is_ok());
    }

    #[test]
    fn test_mark_and_space_are_rejected() {
        assert!(serialport::Parity::try_from(Parity::Mark).is_err());
        assert!(serialport::Parity::try_from(Parity::Space).is_err());
    }
}
