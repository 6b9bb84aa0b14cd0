//! Function-code dispatch shared by the RTU and TCP servers.
//!
//! Users register one handler per function code; both dispatchers parse the
//! inbound PDU, call the handler, and encode its result. A handler returns
//! an [`ExceptionCode`] to produce a Modbus exception response; missing
//! handlers and unknown function codes produce `IllegalFunction`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::errors::FrameError;
use crate::protocol::{
    coils, DeviceId, ExceptionCode, FunctionCode, ModbusPdu, PduBuilder, MAX_ITEMS_PER_REQUEST,
};

pub type ReadBitsHandler =
    Box<dyn Fn(u8, u16, u16) -> Result<Vec<bool>, ExceptionCode> + Send + Sync>;
pub type ReadRegistersHandler =
    Box<dyn Fn(u8, u16, u16) -> Result<Vec<u16>, ExceptionCode> + Send + Sync>;
pub type WriteBitHandler =
    Box<dyn Fn(u8, u16, bool) -> Result<(), ExceptionCode> + Send + Sync>;
pub type WriteRegisterHandler =
    Box<dyn Fn(u8, u16, u16) -> Result<(), ExceptionCode> + Send + Sync>;
pub type WriteBitsHandler =
    Box<dyn Fn(u8, u16, &[bool]) -> Result<(), ExceptionCode> + Send + Sync>;
pub type WriteRegistersHandler =
    Box<dyn Fn(u8, u16, &[u16]) -> Result<(), ExceptionCode> + Send + Sync>;
pub type ReportIdHandler = Box<dyn Fn(u8) -> Result<DeviceId, ExceptionCode> + Send + Sync>;

// Lets dispatch use `?` on PDU construction; a request small enough to parse
// always fits its response, so this only fires on internal faults.
impl From<FrameError> for ExceptionCode {
    fn from(_: FrameError) -> Self {
        ExceptionCode::SlaveDeviceFailure
    }
}

#[derive(Default)]
pub struct ServerHandlers {
    read_coils: Option<ReadBitsHandler>,
    read_discrete_inputs: Option<ReadBitsHandler>,
    read_holding_registers: Option<ReadRegistersHandler>,
    read_input_registers: Option<ReadRegistersHandler>,
    write_coil: Option<WriteBitHandler>,
    write_register: Option<WriteRegisterHandler>,
    write_multiple_coils: Option<WriteBitsHandler>,
    write_multiple_registers: Option<WriteRegistersHandler>,
    report_id: Option<ReportIdHandler>,
}

impl ServerHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read_coils(
        mut self,
        handler: impl Fn(u8, u16, u16) -> Result<Vec<bool>, ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.read_coils = Some(Box::new(handler));
        self
    }

    pub fn on_read_discrete_inputs(
        mut self,
        handler: impl Fn(u8, u16, u16) -> Result<Vec<bool>, ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.read_discrete_inputs = Some(Box::new(handler));
        self
    }

    pub fn on_read_holding_registers(
        mut self,
        handler: impl Fn(u8, u16, u16) -> Result<Vec<u16>, ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.read_holding_registers = Some(Box::new(handler));
        self
    }

    pub fn on_read_input_registers(
        mut self,
        handler: impl Fn(u8, u16, u16) -> Result<Vec<u16>, ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.read_input_registers = Some(Box::new(handler));
        self
    }

    pub fn on_write_coil(
        mut self,
        handler: impl Fn(u8, u16, bool) -> Result<(), ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.write_coil = Some(Box::new(handler));
        self
    }

    pub fn on_write_register(
        mut self,
        handler: impl Fn(u8, u16, u16) -> Result<(), ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.write_register = Some(Box::new(handler));
        self
    }

    pub fn on_write_multiple_coils(
        mut self,
        handler: impl Fn(u8, u16, &[bool]) -> Result<(), ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.write_multiple_coils = Some(Box::new(handler));
        self
    }

    pub fn on_write_multiple_registers(
        mut self,
        handler: impl Fn(u8, u16, &[u16]) -> Result<(), ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.write_multiple_registers = Some(Box::new(handler));
        self
    }

    pub fn on_report_id(
        mut self,
        handler: impl Fn(u8) -> Result<DeviceId, ExceptionCode> + Send + Sync + 'static,
    ) -> Self {
        self.report_id = Some(Box::new(handler));
        self
    }

    /// Turns a request PDU into a response PDU. Never fails: faults become
    /// exception responses echoing the request's function code.
    pub fn process_pdu(&self, unit: u8, request: &ModbusPdu) -> ModbusPdu {
        let Some(raw_function) = request.function_code() else {
            return exception_response(0, ExceptionCode::IllegalFunction);
        };

        let result = match FunctionCode::from_u8(raw_function) {
            Some(function) => self.dispatch(unit, function, request),
            None => Err(ExceptionCode::IllegalFunction),
        };

        match result {
            Ok(response) => response,
            Err(code) => {
                debug!(unit, function = raw_function, %code, "Request rejected");
                exception_response(raw_function, code)
            }
        }
    }

    fn dispatch(
        &self,
        unit: u8,
        function: FunctionCode,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, ExceptionCode> {
        let data = request.as_slice();

        match function {
            FunctionCode::ReadCoils => {
                let (start, count) = parse_read(data)?;
                let handler = self.read_coils.as_ref().ok_or(ExceptionCode::IllegalFunction)?;
                encode_bits_response(function, handler(unit, start, count)?, count)
            }
            FunctionCode::ReadDiscreteInputs => {
                let (start, count) = parse_read(data)?;
                let handler = self
                    .read_discrete_inputs
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                encode_bits_response(function, handler(unit, start, count)?, count)
            }
            FunctionCode::ReadHoldingRegisters => {
                let (start, count) = parse_read(data)?;
                let handler = self
                    .read_holding_registers
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                encode_registers_response(function, handler(unit, start, count)?, count)
            }
            FunctionCode::ReadInputRegisters => {
                let (start, count) = parse_read(data)?;
                let handler = self
                    .read_input_registers
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                encode_registers_response(function, handler(unit, start, count)?, count)
            }
            FunctionCode::WriteSingleCoil => {
                let (address, value) = parse_write_single(data)?;
                let state = match value {
                    0xFF00 | 0xFFFF => true,
                    0x0000 => false,
                    _ => return Err(ExceptionCode::IllegalDataValue),
                };
                let handler = self.write_coil.as_ref().ok_or(ExceptionCode::IllegalFunction)?;
                handler(unit, address, state)?;
                // write echoes the request verbatim
                Ok(request.clone())
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = parse_write_single(data)?;
                let handler = self
                    .write_register
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                handler(unit, address, value)?;
                Ok(request.clone())
            }
            FunctionCode::WriteMultipleCoils => {
                let (start, values) = parse_write_multiple_coils(data)?;
                let handler = self
                    .write_multiple_coils
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                handler(unit, start, &values)?;
                Ok(PduBuilder::new(function.as_u8())
                    .address(start)?
                    .quantity(values.len() as u16)?
                    .build())
            }
            FunctionCode::WriteMultipleRegisters => {
                let (start, values) = parse_write_multiple_registers(data)?;
                let handler = self
                    .write_multiple_registers
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                handler(unit, start, &values)?;
                Ok(PduBuilder::new(function.as_u8())
                    .address(start)?
                    .quantity(values.len() as u16)?
                    .build())
            }
            FunctionCode::ReportServerId => {
                let handler = self.report_id.as_ref().ok_or(ExceptionCode::IllegalFunction)?;
                let id = handler(unit)?;
                Ok(PduBuilder::new(function.as_u8())
                    .byte(id.server_id.len() as u8)?
                    .data(&id.server_id)?
                    .byte(id.run_status)?
                    .build())
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                if data.len() < 10 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let read_start = u16::from_be_bytes([data[1], data[2]]);
                let read_count = u16::from_be_bytes([data[3], data[4]]);
                check_count(read_count)?;
                // re-aligned so the write block sits at offsets 1..6 like a
                // plain FC16 body
                let (write_start, values) = parse_write_multiple_registers(&data[4..])?;

                let write_handler = self
                    .write_multiple_registers
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;
                let read_handler = self
                    .read_holding_registers
                    .as_ref()
                    .ok_or(ExceptionCode::IllegalFunction)?;

                write_handler(unit, write_start, &values)?;
                encode_registers_response(
                    function,
                    read_handler(unit, read_start, read_count)?,
                    read_count,
                )
            }
        }
    }
}

fn exception_response(function: u8, code: ExceptionCode) -> ModbusPdu {
    PduBuilder::new(function | 0x80)
        .byte(code.as_u8())
        .unwrap_or_else(|_| PduBuilder::new(function | 0x80))
        .build()
}

fn check_count(count: u16) -> Result<(), ExceptionCode> {
    if count == 0 || count > MAX_ITEMS_PER_REQUEST {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn parse_read(data: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[1], data[2]]);
    let count = u16::from_be_bytes([data[3], data[4]]);
    check_count(count)?;
    Ok((start, count))
}

fn parse_write_single(data: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((
        u16::from_be_bytes([data[1], data[2]]),
        u16::from_be_bytes([data[3], data[4]]),
    ))
}

/// Parses `[start(2)][quantity(2)][byte_count(1)][packed bits]` after the
/// function code.
fn parse_write_multiple_coils(data: &[u8]) -> Result<(u16, Vec<bool>), ExceptionCode> {
    if data.len() < 6 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[1], data[2]]);
    let count = u16::from_be_bytes([data[3], data[4]]);
    check_count(count)?;

    let byte_count = data[5] as usize;
    if byte_count != coils::coil_byte_count(count as usize) || data.len() < 6 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let values = coils::unpack_coils(&data[6..6 + byte_count], count as usize);
    Ok((start, values))
}

/// Parses `[start(2)][quantity(2)][byte_count(1)][words BE]` after the
/// function code.
fn parse_write_multiple_registers(data: &[u8]) -> Result<(u16, Vec<u16>), ExceptionCode> {
    if data.len() < 6 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[1], data[2]]);
    let count = u16::from_be_bytes([data[3], data[4]]);
    check_count(count)?;

    let byte_count = data[5] as usize;
    if byte_count != count as usize * 2 || data.len() < 6 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let values = data[6..6 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok((start, values))
}

fn encode_bits_response(
    function: FunctionCode,
    values: Vec<bool>,
    count: u16,
) -> Result<ModbusPdu, ExceptionCode> {
    if values.len() != count as usize {
        return Err(ExceptionCode::SlaveDeviceFailure);
    }
    let packed = coils::pack_coils(&values);
    Ok(PduBuilder::new(function.as_u8())
        .byte(packed.len() as u8)?
        .data(&packed)?
        .build())
}

fn encode_registers_response(
    function: FunctionCode,
    values: Vec<u16>,
    count: u16,
) -> Result<ModbusPdu, ExceptionCode> {
    if values.len() != count as usize {
        return Err(ExceptionCode::SlaveDeviceFailure);
    }
    Ok(PduBuilder::new(function.as_u8())
        .byte((values.len() * 2) as u8)?
        .registers(&values)?
        .build())
}

/// Sparse in-memory data store wired into [`ServerHandlers`] for servers
/// that just want somewhere to keep state. Unset addresses read as zero.
#[derive(Default)]
pub struct RegisterBank {
    coils: Mutex<HashMap<u16, bool>>,
    discrete_inputs: Mutex<HashMap<u16, bool>>,
    holding_registers: Mutex<HashMap<u16, u16>>,
    input_registers: Mutex<HashMap<u16, u16>>,
}

impl RegisterBank {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn coil(&self, address: u16) -> bool {
        self.coils.lock().unwrap().get(&address).copied().unwrap_or(false)
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        self.coils.lock().unwrap().insert(address, value);
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) {
        self.discrete_inputs.lock().unwrap().insert(address, value);
    }

    pub fn holding_register(&self, address: u16) -> u16 {
        self.holding_registers
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) {
        self.holding_registers.lock().unwrap().insert(address, value);
    }

    pub fn set_input_register(&self, address: u16, value: u16) {
        self.input_registers.lock().unwrap().insert(address, value);
    }

    /// Builds a handler set backed by this bank, covering every supported
    /// function code.
    pub fn handlers(self: &Arc<Self>) -> ServerHandlers {
        let bank = Arc::clone(self);
        let handlers = ServerHandlers::new().on_read_coils(move |_, start, count| {
            let coils = bank.coils.lock().unwrap();
            Ok(range(start, count)?
                .map(|addr| coils.get(&addr).copied().unwrap_or(false))
                .collect())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_read_discrete_inputs(move |_, start, count| {
            let inputs = bank.discrete_inputs.lock().unwrap();
            Ok(range(start, count)?
                .map(|addr| inputs.get(&addr).copied().unwrap_or(false))
                .collect())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_read_holding_registers(move |_, start, count| {
            let registers = bank.holding_registers.lock().unwrap();
            Ok(range(start, count)?
                .map(|addr| registers.get(&addr).copied().unwrap_or(0))
                .collect())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_read_input_registers(move |_, start, count| {
            let registers = bank.input_registers.lock().unwrap();
            Ok(range(start, count)?
                .map(|addr| registers.get(&addr).copied().unwrap_or(0))
                .collect())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_write_coil(move |_, address, value| {
            bank.set_coil(address, value);
            Ok(())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_write_register(move |_, address, value| {
            bank.set_holding_register(address, value);
            Ok(())
        });

        let bank = Arc::clone(self);
        let handlers = handlers.on_write_multiple_coils(move |_, start, values| {
            let mut coils = bank.coils.lock().unwrap();
            for (i, &value) in values.iter().enumerate() {
                let address = start
                    .checked_add(i as u16)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                coils.insert(address, value);
            }
            Ok(())
        });

        let bank = Arc::clone(self);
        handlers.on_write_multiple_registers(move |_, start, values| {
            let mut registers = bank.holding_registers.lock().unwrap();
            for (i, &value) in values.iter().enumerate() {
                let address = start
                    .checked_add(i as u16)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                registers.insert(address, value);
            }
            Ok(())
        })
    }
}

fn range(start: u16, count: u16) -> Result<impl Iterator<Item = u16>, ExceptionCode> {
    start
        .checked_add(count.saturating_sub(1))
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    Ok((0..count).map(move |i| start + i))
}
