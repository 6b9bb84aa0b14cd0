/// Modbus exception codes, including the transport-synthetic values some
/// stacks report above 0x63.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetTimeout = 0x0B,
    SendFailed = 100,
    InvalidOffset = 128,
    NotConnected = 253,
    ConnectionLost = 254,
    Timeout = 255,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetTimeout),
            100 => Some(Self::SendFailed),
            128 => Some(Self::InvalidOffset),
            253 => Some(Self::NotConnected),
            254 => Some(Self::ConnectionLost),
            255 => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Lenient variant for wire decoding: unknown codes map to
    /// `SlaveDeviceFailure` instead of being dropped.
    pub fn from_wire(code: u8) -> Self {
        Self::from_u8(code).unwrap_or(Self::SlaveDeviceFailure)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveDeviceFailure => "Slave device failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave device busy",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetTimeout => "Gateway target device failed to respond",
            Self::SendFailed => "Send failed",
            Self::InvalidOffset => "Invalid offset",
            Self::NotConnected => "Not connected",
            Self::ConnectionLost => "Connection lost",
            Self::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X} ({})", self.as_u8(), self.description())
    }
}
