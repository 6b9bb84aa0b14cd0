//! Narrow view of the serial-port collaborator.
//!
//! The RTU framer and server only need byte-level access plus receive-buffer
//! control, so they work against [`SerialLink`] rather than the full
//! `serialport` surface. The blanket impl below adapts any opened
//! `serialport` handle; tests substitute an in-memory link.

use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::config::RtuConfig;
use crate::errors::{ModbusError, SerialErrorKind, TransportError};

pub trait SerialLink: Send {
    /// Port identity used in error reports.
    fn port_name(&self) -> String;

    fn is_open(&self) -> bool;

    /// Number of bytes waiting in the receive buffer.
    fn bytes_to_read(&mut self) -> Result<u32, TransportError>;

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()>;

    /// Drops everything in the receive buffer.
    fn clear_input(&mut self) -> Result<(), TransportError>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn port_name(&self) -> String {
        SerialPort::name(self.as_ref()).unwrap_or_else(|| "<unnamed>".into())
    }

    fn is_open(&self) -> bool {
        // serialport handles are open for as long as they exist
        true
    }

    fn bytes_to_read(&mut self) -> Result<u32, TransportError> {
        SerialPort::bytes_to_read(self.as_ref()).map_err(TransportError::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(self.as_mut(), buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(self.as_mut(), buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(self.as_mut())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.clear(ClearBuffer::Input).map_err(TransportError::from)
    }
}

/// Transmit-enable pin for RS-485 half-duplex transceivers. Asserted before
/// the frame goes out, released once the write has drained.
pub trait TxEnable: Send {
    fn set(&mut self, active: bool) -> Result<(), TransportError>;
}

/// Opens and configures the serial port described by `config`.
pub fn open_serial_link(config: &RtuConfig) -> Result<Box<dyn SerialPort>, ModbusError> {
    let parity = serialport::Parity::try_from(config.parity)?;
    let stop_bits = serialport::StopBits::try_from(config.stop_bits)?;

    let port = serialport::new(config.device.as_str(), config.baud_rate)
        .data_bits(config.data_bits.into())
        .parity(parity)
        .stop_bits(stop_bits)
        .timeout(config.serial_timeout)
        .open()
        .map_err(|e| {
            ModbusError::Transport(TransportError::Serial {
                kind: SerialErrorKind::OpenFailed,
                port: config.device.clone(),
                details: e.to_string(),
                source: Some(e),
            })
        })?;

    Ok(port)
}

/// Inter-poll sleep while waiting for inbound bytes.
pub(crate) const RX_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::{SerialLink, TransportError, TxEnable};

    /// In-memory serial link: captures writes, replays scripted responses.
    pub struct LoopbackLink {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub inbound: VecDeque<u8>,
        /// Frames queued here are moved into `inbound` after each write,
        /// one per write, mimicking a device answering a request.
        pub responses: VecDeque<Vec<u8>>,
        pub clears: usize,
        pub open: bool,
    }

    impl LoopbackLink {
        pub fn new() -> Self {
            Self {
                written: Arc::new(Mutex::new(Vec::new())),
                inbound: VecDeque::new(),
                responses: VecDeque::new(),
                clears: 0,
                open: true,
            }
        }

        pub fn with_response(mut self, frame: &[u8]) -> Self {
            self.responses.push_back(frame.to_vec());
            self
        }

        pub fn with_inbound(mut self, bytes: &[u8]) -> Self {
            self.inbound.extend(bytes);
            self
        }

        pub fn written_handle(&self) -> Arc<Mutex<Vec<u8>>> {
            Arc::clone(&self.written)
        }
    }

    impl SerialLink for LoopbackLink {
        fn port_name(&self) -> String {
            "loopback".into()
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn bytes_to_read(&mut self) -> Result<u32, TransportError> {
            Ok(self.inbound.len() as u32)
        }

        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(buf);
            if let Some(response) = self.responses.pop_front() {
                self.inbound.extend(response);
            }
            Ok(())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> Result<(), TransportError> {
            self.clears += 1;
            self.inbound.clear();
            Ok(())
        }
    }

    /// TX-enable pin that records every transition.
    pub struct RecordingPin {
        pub states: Arc<Mutex<Vec<bool>>>,
    }

    impl RecordingPin {
        pub fn new() -> (Self, Arc<Mutex<Vec<bool>>>) {
            let states = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    states: Arc::clone(&states),
                },
                states,
            )
        }
    }

    impl TxEnable for RecordingPin {
        fn set(&mut self, active: bool) -> Result<(), TransportError> {
            self.states.lock().unwrap().push(active);
            Ok(())
        }
    }
}
