pub mod codec;
pub mod coils;
mod crc;
mod exception;
mod function;
mod pdu;

pub use codec::{
    read_request, report_id_request, read_write_registers_request, write_coil_request,
    write_multiple_coils_request, write_multiple_registers_request, write_register_request,
    check_exception, parse_read_bits, parse_read_registers, parse_report_id, parse_write_echo,
    DeviceId, COIL_OFF, COIL_ON, MAX_ITEMS_PER_REQUEST,
};
pub use coils::{coil_byte_count, pack_coils, unpack_coils};
pub use crc::{crc16, fill_crc};
pub use exception::ExceptionCode;
pub use function::FunctionCode;
pub use pdu::{ModbusPdu, PduBuilder, MAX_PDU_SIZE};
