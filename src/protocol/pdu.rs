//! Protocol Data Unit: the function-code-bearing part of a frame,
//! independent of transport. Stack-allocated so frames never hit the heap on
//! the hot path.

use crate::errors::{FrameError, FrameSizeKind};

/// Largest PDU the protocol allows (256-byte ADU minus unit id and CRC).
pub const MAX_PDU_SIZE: usize = 253;

#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() > MAX_PDU_SIZE {
            return Err(FrameError::Size {
                kind: FrameSizeKind::Oversized,
                details: format!("PDU of {} bytes exceeds {}", data.len(), MAX_PDU_SIZE),
                frame_data: None,
            });
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    pub fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.len >= MAX_PDU_SIZE {
            return Err(FrameError::Size {
                kind: FrameSizeKind::PduOverflow,
                details: "PDU buffer full".into(),
                frame_data: None,
            });
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Appends a 16-bit value in wire (big-endian) order.
    pub fn push_u16(&mut self, value: u16) -> Result<(), FrameError> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    pub fn extend(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(FrameError::Size {
                kind: FrameSizeKind::PduOverflow,
                details: format!(
                    "PDU would grow to {} bytes, max is {}",
                    self.len + data.len(),
                    MAX_PDU_SIZE
                ),
                frame_data: None,
            });
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First byte of the PDU, if any.
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ModbusPdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// Incremental PDU construction used by the codec's request builders.
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    pub fn new(function: u8) -> Self {
        let mut pdu = ModbusPdu::new();
        // A single byte always fits into an empty PDU.
        let _ = pdu.push(function);
        Self { pdu }
    }

    pub fn address(mut self, addr: u16) -> Result<Self, FrameError> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    pub fn quantity(mut self, qty: u16) -> Result<Self, FrameError> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    pub fn byte(mut self, b: u8) -> Result<Self, FrameError> {
        self.pdu.push(b)?;
        Ok(self)
    }

    pub fn registers(mut self, values: &[u16]) -> Result<Self, FrameError> {
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    pub fn data(mut self, bytes: &[u8]) -> Result<Self, FrameError> {
        self.pdu.extend(bytes)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        self.pdu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_inspect() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());
        assert_eq!(pdu.function_code(), None);

        pdu.push(0x03).unwrap();
        pdu.push_u16(0x000B).unwrap();
        pdu.push_u16(0x000D).unwrap();

        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x0B, 0x00, 0x0D]);
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());
    }

    #[test]
    fn test_builder_write_multiple() {
        let pdu = PduBuilder::new(0x10)
            .address(0x0100)
            .unwrap()
            .quantity(2)
            .unwrap()
            .byte(4)
            .unwrap()
            .registers(&[0x000A, 0x0102])
            .unwrap()
            .build();

        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x01, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_exception_detection() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));

        let pdu = ModbusPdu::from_slice(&[0x83]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), None);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let result = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]);
        assert!(result.is_err());

        let mut pdu = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0x00).is_err());
        assert!(pdu.extend(&[0x00]).is_err());
        // failed extend leaves the PDU untouched
        assert_eq!(pdu.len(), MAX_PDU_SIZE);
    }
}
