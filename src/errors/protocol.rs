use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Exception response returned by the remote device.
///
/// `function` is the original function code (bit 7 already cleared).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device returned exception {code} for function {function:#04X}")]
pub struct ProtocolError {
    pub function: u8,
    pub code: ExceptionCode,
}

impl ProtocolError {
    pub fn new(function: u8, code: ExceptionCode) -> Self {
        Self {
            function: function & 0x7F,
            code,
        }
    }
}
