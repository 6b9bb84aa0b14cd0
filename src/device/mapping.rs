//! Declarative projection of a contiguous register window onto a typed
//! mirror field.
//!
//! A mapping pairs a decoder (built-in width/format selection or a custom
//! closure) with a sink closure that deposits the decoded value. The poll
//! tick executes mappings in registration order.

use crate::errors::ModbusError;
use crate::values::{self, WordOrder};

use super::FieldValue;

/// How the raw register window is interpreted. "Little endian" here refers
/// to word order; bytes within each register are always big-endian on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    LittleEndianInteger,
    BigEndianInteger,
    LittleEndianFloat,
    BigEndianFloat,
}

impl SourceFormat {
    fn word_order(self) -> WordOrder {
        match self {
            Self::LittleEndianInteger | Self::LittleEndianFloat => WordOrder::LowWordFirst,
            Self::BigEndianInteger | Self::BigEndianFloat => WordOrder::HighWordFirst,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Self::LittleEndianFloat | Self::BigEndianFloat)
    }
}

pub(crate) enum Decoder {
    Typed {
        format: SourceFormat,
        scale: Option<f64>,
        offset: Option<f64>,
    },
    /// Custom decoders see the raw register window; scale/offset do not
    /// apply.
    Custom(Box<dyn Fn(&[u16]) -> FieldValue + Send + Sync>),
}

type Sink = Box<dyn FnMut(FieldValue) -> Result<(), ModbusError> + Send>;

pub struct Mapping {
    pub(crate) start: u16,
    pub(crate) count: u16,
    pub(crate) decoder: Decoder,
    pub(crate) sink: Sink,
}

impl Mapping {
    /// Starts a mapping over `count` holding registers at `start`.
    pub fn registers(start: u16, count: u16) -> MappingBuilder {
        MappingBuilder {
            start,
            count,
            format: SourceFormat::BigEndianInteger,
            scale: None,
            offset: None,
            custom: None,
        }
    }

    /// True when the decoder needs one of the supported widths.
    pub(crate) fn needs_width_check(&self) -> bool {
        matches!(self.decoder, Decoder::Typed { .. })
    }

    pub(crate) fn apply(&mut self, registers: &[u16]) -> Result<(), ModbusError> {
        let value = match &self.decoder {
            Decoder::Custom(decode) => decode(registers),
            Decoder::Typed {
                format,
                scale,
                offset,
            } => decode_typed(registers, *format)?.scaled(*scale, *offset),
        };
        (self.sink)(value)
    }
}

/// `registers.len()` selects the width: 1, 2 or 4 registers for 16/32/64
/// bits.
fn decode_typed(registers: &[u16], format: SourceFormat) -> Result<FieldValue, ModbusError> {
    let order = format.word_order();

    if format.is_float() {
        return match registers.len() {
            2 => Ok(FieldValue::Float(f64::from(values::to_f32(
                registers, order,
            )?))),
            4 => Ok(FieldValue::Float(values::to_f64(registers, order)?)),
            n => Err(ModbusError::unsupported(format!(
                "Float mapping over {n} registers"
            ))),
        };
    }

    match registers.len() {
        1 => Ok(FieldValue::Integer(i64::from(values::to_i16(registers)?))),
        2 => Ok(FieldValue::Integer(i64::from(values::to_i32(
            registers, order,
        )?))),
        4 => Ok(FieldValue::Integer(values::to_i64(registers, order)?)),
        n => Err(ModbusError::unsupported(format!(
            "Integer mapping over {n} registers"
        ))),
    }
}

pub struct MappingBuilder {
    start: u16,
    count: u16,
    format: SourceFormat,
    scale: Option<f64>,
    offset: Option<f64>,
    custom: Option<Box<dyn Fn(&[u16]) -> FieldValue + Send + Sync>>,
}

impl MappingBuilder {
    pub fn format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Replaces the built-in decoder; the closure receives the raw register
    /// window.
    pub fn decode_with(
        mut self,
        decode: impl Fn(&[u16]) -> FieldValue + Send + Sync + 'static,
    ) -> Self {
        self.custom = Some(Box::new(decode));
        self
    }

    fn build(self, sink: Sink) -> Mapping {
        let decoder = match self.custom {
            Some(decode) => Decoder::Custom(decode),
            None => Decoder::Typed {
                format: self.format,
                scale: self.scale,
                offset: self.offset,
            },
        };
        Mapping {
            start: self.start,
            count: self.count,
            decoder,
            sink,
        }
    }

    /// Finishes the mapping with a sink taking the raw decoded value.
    pub fn into_value(self, mut sink: impl FnMut(FieldValue) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value);
            Ok(())
        }))
    }

    pub fn into_u8(self, mut sink: impl FnMut(u8) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_u8()?);
            Ok(())
        }))
    }

    pub fn into_i16(self, mut sink: impl FnMut(i16) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_i16()?);
            Ok(())
        }))
    }

    pub fn into_i32(self, mut sink: impl FnMut(i32) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_i32()?);
            Ok(())
        }))
    }

    pub fn into_i64(self, mut sink: impl FnMut(i64) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_i64()?);
            Ok(())
        }))
    }

    pub fn into_f32(self, mut sink: impl FnMut(f32) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_f32()?);
            Ok(())
        }))
    }

    pub fn into_f64(self, mut sink: impl FnMut(f64) + Send + 'static) -> Mapping {
        self.build(Box::new(move |value| {
            sink(value.as_f64()?);
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capture<T: Copy + Send + 'static>() -> (Arc<Mutex<Option<T>>>, impl FnMut(T) + Send) {
        let slot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, move |value| {
            *writer.lock().unwrap() = Some(value);
        })
    }

    #[test]
    fn test_single_register_signed() {
        let (slot, sink) = capture::<i16>();
        let mut mapping = Mapping::registers(0, 1).into_i16(sink);

        mapping.apply(&[0xFFFE]).unwrap();
        assert_eq!(*slot.lock().unwrap(), Some(-2));
    }

    #[test]
    fn test_scale_and_offset() {
        let (slot, sink) = capture::<f64>();
        let mut mapping = Mapping::registers(0, 1).scale(0.1).offset(-1.0).into_f64(sink);

        mapping.apply(&[123]).unwrap();
        let value = slot.lock().unwrap().unwrap();
        assert!((value - 11.3).abs() < 1e-9);
    }

    #[test]
    fn test_low_word_first_float() {
        let (slot, sink) = capture::<f32>();
        let mut mapping = Mapping::registers(0, 2)
            .format(SourceFormat::LittleEndianFloat)
            .into_f32(sink);

        // 2.0f32 = 0x40000000, low word first
        mapping.apply(&[0x0000, 0x4000]).unwrap();
        assert_eq!(*slot.lock().unwrap(), Some(2.0));
    }

    #[test]
    fn test_big_endian_32bit_integer() {
        let (slot, sink) = capture::<i32>();
        let mut mapping = Mapping::registers(0, 2)
            .format(SourceFormat::BigEndianInteger)
            .into_i32(sink);

        mapping.apply(&[0x0001, 0x0000]).unwrap();
        assert_eq!(*slot.lock().unwrap(), Some(65536));
    }

    #[test]
    fn test_custom_decoder_skips_scaling() {
        let (slot, sink) = capture::<i64>();
        let mut mapping = Mapping::registers(0, 3)
            .scale(1000.0) // ignored with a custom decoder
            .decode_with(|registers| {
                FieldValue::Integer(
                    crate::values::to_mod10000_48(registers, WordOrder::HighWordFirst)
                        .unwrap_or(0),
                )
            })
            .into_i64(sink);

        mapping.apply(&[0, 1, 2345]).unwrap();
        assert_eq!(*slot.lock().unwrap(), Some(12_345));
    }

    #[test]
    fn test_out_of_range_conversion_fails() {
        let (slot, sink) = capture::<u8>();
        let mut mapping = Mapping::registers(0, 1).into_u8(sink);

        assert!(mapping.apply(&[40_000]).is_err());
        assert_eq!(*slot.lock().unwrap(), None);
    }

    #[test]
    fn test_unsupported_width() {
        let (_, sink) = capture::<i64>();
        let mut mapping = Mapping::registers(0, 3).into_i64(sink);
        assert!(mapping.apply(&[1, 2, 3]).is_err());
    }
}
