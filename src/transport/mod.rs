mod rtu;
mod serial;
mod tcp;

use async_trait::async_trait;

use crate::errors::ModbusError;
use crate::protocol::{ModbusPdu, COIL_ON};

pub use rtu::RtuTransport;
pub use serial::{open_serial_link, SerialLink, TxEnable};
pub use tcp::{encode_mbap, TcpTransport, MBAP_HEADER_LEN};

pub(crate) use serial::RX_POLL_INTERVAL;

#[cfg(test)]
pub(crate) use serial::testing;

/// A framed request/response channel to one Modbus bus or peer.
///
/// Implementations add transport framing (address + CRC for RTU, MBAP for
/// TCP) around the PDU and strip it from the response. They do not retry and
/// do not correlate more than one request at a time; serialisation of
/// callers is the client's job.
#[async_trait]
pub trait Transport: Send {
    /// Sends `request` to `unit` and waits for the matching response PDU.
    async fn exchange(
        &mut self,
        unit: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, ModbusError>;

    fn is_connected(&self) -> bool;

    /// Releases the underlying stream. Idempotent.
    async fn close(&mut self) -> Result<(), ModbusError>;

    /// Value encoded for a single-coil ON write. RTU peers expect 0xFF00;
    /// some TCP stacks expect 0xFFFF instead.
    fn coil_on_pattern(&self) -> u16 {
        COIL_ON
    }
}
