//! Decoded mirror-field values and checked narrowing into target types.

use crate::errors::ModbusError;

/// Value produced by a mapping decoder before it lands in a mirror field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    /// Applies `value * scale + offset`. Any scaling promotes the value to
    /// a float.
    pub fn scaled(self, scale: Option<f64>, offset: Option<f64>) -> Self {
        if scale.is_none() && offset.is_none() {
            return self;
        }
        let raw = match self {
            Self::Integer(v) => v as f64,
            Self::Float(v) => v,
        };
        Self::Float(raw * scale.unwrap_or(1.0) + offset.unwrap_or(0.0))
    }

    fn as_checked_integer(self, min: i64, max: i64, target: &str) -> Result<i64, ModbusError> {
        let value = match self {
            Self::Integer(v) => v,
            Self::Float(v) => {
                if !v.is_finite() {
                    return Err(out_of_range(v, target));
                }
                let rounded = v.round();
                if rounded < min as f64 || rounded > max as f64 {
                    return Err(out_of_range(v, target));
                }
                rounded as i64
            }
        };
        if value < min || value > max {
            return Err(out_of_range(value, target));
        }
        Ok(value)
    }

    pub fn as_u8(self) -> Result<u8, ModbusError> {
        Ok(self.as_checked_integer(0, u8::MAX as i64, "u8")? as u8)
    }

    pub fn as_i16(self) -> Result<i16, ModbusError> {
        Ok(self.as_checked_integer(i16::MIN as i64, i16::MAX as i64, "i16")? as i16)
    }

    pub fn as_i32(self) -> Result<i32, ModbusError> {
        Ok(self.as_checked_integer(i32::MIN as i64, i32::MAX as i64, "i32")? as i32)
    }

    pub fn as_i64(self) -> Result<i64, ModbusError> {
        self.as_checked_integer(i64::MIN, i64::MAX, "i64")
    }

    pub fn as_f32(self) -> Result<f32, ModbusError> {
        let value = self.as_f64()?;
        if value.is_finite() && value.abs() > f32::MAX as f64 {
            return Err(out_of_range(value, "f32"));
        }
        Ok(value as f32)
    }

    pub fn as_f64(self) -> Result<f64, ModbusError> {
        Ok(match self {
            Self::Integer(v) => v as f64,
            Self::Float(v) => v,
        })
    }
}

fn out_of_range(value: impl std::fmt::Display, target: &str) -> ModbusError {
    ModbusError::unsupported(format!("Value {value} is not representable as {target}"))
}
