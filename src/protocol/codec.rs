//! Request builders and response parsers for the supported function codes.
//!
//! Builders produce transport-independent PDUs; the RTU/TCP framers add
//! addressing and checksums. Parsers verify the echoed function code and
//! surface exception responses as [`ProtocolError`].

use crate::errors::{FrameError, FrameFormatKind, ModbusError, ProtocolError};

use super::{coils, ExceptionCode, FunctionCode, ModbusPdu, PduBuilder};

/// Register/coil count limit for a single transaction.
pub const MAX_ITEMS_PER_REQUEST: u16 = 125;

/// Wire pattern for switching a single coil ON.
pub const COIL_ON: u16 = 0xFF00;
/// Wire pattern for switching a single coil OFF.
pub const COIL_OFF: u16 = 0x0000;

fn check_count(count: u16, what: &str) -> Result<(), ModbusError> {
    if count == 0 {
        return Err(ModbusError::argument(format!("{what} count must be non-zero")));
    }
    if count > MAX_ITEMS_PER_REQUEST {
        return Err(ModbusError::argument(format!(
            "{what} count {count} exceeds {MAX_ITEMS_PER_REQUEST} per transaction"
        )));
    }
    Ok(())
}

/// Builds a read request for function codes 1-4.
pub fn read_request(
    function: FunctionCode,
    start: u16,
    count: u16,
) -> Result<ModbusPdu, ModbusError> {
    if !matches!(
        function,
        FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters
    ) {
        return Err(ModbusError::argument(format!(
            "{function} is not a read function"
        )));
    }
    check_count(count, "read")?;

    Ok(PduBuilder::new(function.as_u8())
        .address(start)?
        .quantity(count)?
        .build())
}

/// Builds a single-coil write. `pattern` is [`COIL_ON`], [`COIL_OFF`] or a
/// transport-specific ON pattern.
pub fn write_coil_request(address: u16, pattern: u16) -> Result<ModbusPdu, ModbusError> {
    Ok(PduBuilder::new(FunctionCode::WriteSingleCoil.as_u8())
        .address(address)?
        .quantity(pattern)?
        .build())
}

pub fn write_register_request(address: u16, value: u16) -> Result<ModbusPdu, ModbusError> {
    Ok(PduBuilder::new(FunctionCode::WriteSingleRegister.as_u8())
        .address(address)?
        .quantity(value)?
        .build())
}

pub fn write_multiple_coils_request(
    start: u16,
    values: &[bool],
) -> Result<ModbusPdu, ModbusError> {
    check_count(values.len() as u16, "coil")?;

    let packed = coils::pack_coils(values);
    Ok(PduBuilder::new(FunctionCode::WriteMultipleCoils.as_u8())
        .address(start)?
        .quantity(values.len() as u16)?
        .byte(packed.len() as u8)?
        .data(&packed)?
        .build())
}

pub fn write_multiple_registers_request(
    start: u16,
    values: &[u16],
) -> Result<ModbusPdu, ModbusError> {
    check_count(values.len() as u16, "register")?;

    Ok(PduBuilder::new(FunctionCode::WriteMultipleRegisters.as_u8())
        .address(start)?
        .quantity(values.len() as u16)?
        .byte((values.len() * 2) as u8)?
        .registers(values)?
        .build())
}

pub fn report_id_request() -> ModbusPdu {
    PduBuilder::new(FunctionCode::ReportServerId.as_u8()).build()
}

/// Builds a combined write-then-read request (function code 0x17). The
/// response carries the read data only.
pub fn read_write_registers_request(
    read_start: u16,
    read_count: u16,
    write_start: u16,
    values: &[u16],
) -> Result<ModbusPdu, ModbusError> {
    check_count(read_count, "read")?;
    check_count(values.len() as u16, "register")?;

    Ok(PduBuilder::new(FunctionCode::ReadWriteMultipleRegisters.as_u8())
        .address(read_start)?
        .quantity(read_count)?
        .address(write_start)?
        .quantity(values.len() as u16)?
        .byte((values.len() * 2) as u8)?
        .registers(values)?
        .build())
}

/// Raises [`ProtocolError`] when the PDU is an exception response.
pub fn check_exception(pdu: &ModbusPdu) -> Result<(), ProtocolError> {
    if pdu.is_exception() {
        let function = pdu.function_code().unwrap_or(0) & 0x7F;
        let code = ExceptionCode::from_wire(pdu.exception_code().unwrap_or(0));
        return Err(ProtocolError::new(function, code));
    }
    Ok(())
}

fn check_function(pdu: &ModbusPdu, expected: FunctionCode) -> Result<(), ModbusError> {
    check_exception(pdu)?;
    let actual = pdu.function_code().unwrap_or(0);
    if actual != expected.as_u8() {
        return Err(FrameError::Format {
            kind: FrameFormatKind::UnexpectedResponse,
            details: format!(
                "Expected function {:#04X}, got {:#04X}",
                expected.as_u8(),
                actual
            ),
            frame_data: Some(pdu.as_slice().to_vec()),
        }
        .into());
    }
    Ok(())
}

fn payload<'a>(pdu: &'a ModbusPdu, expected_bytes: usize) -> Result<&'a [u8], ModbusError> {
    let data = pdu.as_slice();
    if data.len() < 2 {
        return Err(FrameError::too_short(
            format!("Response PDU of {} bytes has no byte count", data.len()),
            Some(data.to_vec()),
        )
        .into());
    }

    let byte_count = data[1] as usize;
    if byte_count != expected_bytes || data.len() < 2 + byte_count {
        return Err(FrameError::Format {
            kind: FrameFormatKind::InvalidFormat,
            details: format!(
                "Expected {expected_bytes} payload bytes, byte count says {byte_count} ({} available)",
                data.len().saturating_sub(2)
            ),
            frame_data: Some(data.to_vec()),
        }
        .into());
    }

    Ok(&data[2..2 + byte_count])
}

/// Parses a register read response into `count` big-endian words.
pub fn parse_read_registers(
    pdu: &ModbusPdu,
    function: FunctionCode,
    count: u16,
) -> Result<Vec<u16>, ModbusError> {
    check_function(pdu, function)?;
    let data = payload(pdu, count as usize * 2)?;

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Parses a coil/discrete read response into exactly `count` booleans.
pub fn parse_read_bits(
    pdu: &ModbusPdu,
    function: FunctionCode,
    count: u16,
) -> Result<Vec<bool>, ModbusError> {
    check_function(pdu, function)?;
    let data = payload(pdu, coils::coil_byte_count(count as usize))?;

    Ok(coils::unpack_coils(data, count as usize))
}

/// Parses a write echo; returns the echoed address and value (single writes)
/// or item count (multi writes).
pub fn parse_write_echo(
    pdu: &ModbusPdu,
    function: FunctionCode,
) -> Result<(u16, u16), ModbusError> {
    check_function(pdu, function)?;
    let data = pdu.as_slice();
    if data.len() < 5 {
        return Err(FrameError::too_short(
            format!("Write echo of {} bytes, expected 5", data.len()),
            Some(data.to_vec()),
        )
        .into());
    }

    let address = u16::from_be_bytes([data[1], data[2]]);
    let value = u16::from_be_bytes([data[3], data[4]]);
    Ok((address, value))
}

/// Report Server ID result. The status byte trails the id bytes on the wire;
/// its meaning is device-specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    pub server_id: Vec<u8>,
    pub run_status: u8,
}

pub fn parse_report_id(pdu: &ModbusPdu) -> Result<DeviceId, ModbusError> {
    check_function(pdu, FunctionCode::ReportServerId)?;
    let data = pdu.as_slice();
    if data.len() < 3 {
        return Err(FrameError::too_short(
            format!("Report ID response of {} bytes", data.len()),
            Some(data.to_vec()),
        )
        .into());
    }

    let body = &data[2..];
    Ok(DeviceId {
        server_id: body[..body.len() - 1].to_vec(),
        run_status: body[body.len() - 1],
    })
}
