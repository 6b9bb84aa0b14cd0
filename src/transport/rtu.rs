//! RTU framer: `[addr][PDU][crc_lo][crc_hi]` over a serial link.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::config::RtuConfig;
use crate::errors::{FrameError, ModbusError, TransportError};
use crate::protocol::{crc16, fill_crc, FunctionCode, ModbusPdu};

use super::serial::{open_serial_link, SerialLink, TxEnable, RX_POLL_INTERVAL};
use super::Transport;

/// Smallest well-formed response frame: addr + function + exception code +
/// CRC.
const MIN_FRAME_LEN: usize = 5;

pub struct RtuTransport {
    link: Option<Box<dyn SerialLink>>,
    tx_enable: Option<Box<dyn TxEnable>>,
    timeout: Duration,
    /// Held between write completion and TX-enable release so the last
    /// character drains out of the UART.
    turnaround_delay: Duration,
}

impl RtuTransport {
    /// Opens the configured serial port and wraps it in a framer.
    pub fn open(config: &RtuConfig) -> Result<Self, ModbusError> {
        let link = open_serial_link(config)?;
        debug!("Opened serial port {}", config.serial_port_info());

        Ok(Self::new(Box::new(link), config.timeout)
            .turnaround_delay(config.turnaround_delay))
    }

    /// Wraps an already-open link. Used for custom links and tests.
    pub fn new(link: Box<dyn SerialLink>, timeout: Duration) -> Self {
        Self {
            link: Some(link),
            tx_enable: None,
            timeout,
            turnaround_delay: Duration::ZERO,
        }
    }

    /// Attaches an RS-485 transmit-enable pin.
    pub fn tx_enable(mut self, pin: Box<dyn TxEnable>) -> Self {
        self.tx_enable = Some(pin);
        self
    }

    pub fn turnaround_delay(mut self, delay: Duration) -> Self {
        self.turnaround_delay = delay;
        self
    }

    fn build_frame(unit: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
        frame.push(unit);
        frame.extend_from_slice(pdu.as_slice());
        frame.extend_from_slice(&[0, 0]);
        fill_crc(&mut frame);
        frame
    }

    /// Total frame length implied by the first three response bytes.
    ///
    /// Write echoes are fixed at 8 bytes; read responses carry a length
    /// byte; Report Server ID carries one extra status byte between the data
    /// and the CRC.
    fn expected_frame_len(request_function: u8, length_byte: u8) -> usize {
        match FunctionCode::from_u8(request_function) {
            Some(fc) if fc.is_write() => 8,
            Some(FunctionCode::ReportServerId) => 3 + length_byte as usize + 1 + 2,
            _ => 3 + length_byte as usize + 2,
        }
    }
}

/// Reads exactly `buf.len()` bytes, polling the link until `deadline`.
async fn read_exact(
    link: &mut dyn SerialLink,
    buf: &mut [u8],
    started: Instant,
    limit: Duration,
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let available = link.bytes_to_read()? as usize;
        if available == 0 {
            if started.elapsed() >= limit {
                return Err(TransportError::timeout(started.elapsed(), limit));
            }
            tokio::time::sleep(RX_POLL_INTERVAL).await;
            continue;
        }

        let want = (buf.len() - filled).min(available);
        let n = link.read(&mut buf[filled..filled + want])?;
        filled += n;
    }
    Ok(())
}

/// Waits until at least `count` bytes are buffered or the deadline passes.
async fn wait_for_bytes(
    link: &mut dyn SerialLink,
    count: usize,
    started: Instant,
    limit: Duration,
) -> Result<(), TransportError> {
    while (link.bytes_to_read()? as usize) < count {
        if started.elapsed() >= limit {
            return Err(TransportError::timeout(started.elapsed(), limit));
        }
        tokio::time::sleep(RX_POLL_INTERVAL).await;
    }
    Ok(())
}

async fn receive_response(
    link: &mut dyn SerialLink,
    request_function: u8,
    limit: Duration,
) -> Result<ModbusPdu, ModbusError> {
    // The timeout clock restarts with every receive.
    let started = Instant::now();

    wait_for_bytes(link, MIN_FRAME_LEN, started, limit).await?;

    let mut frame = vec![0u8; 3];
    read_exact(link, &mut frame, started, limit).await?;

    let function = frame[1];
    let total = if function & 0x80 != 0 {
        MIN_FRAME_LEN
    } else {
        RtuTransport::expected_frame_len(request_function, frame[2])
    };

    frame.resize(total, 0);
    read_exact(link, &mut frame[3..], started, limit).await?;
    trace!("RTU frame in: {:02X?}", frame);

    let calculated = crc16(&frame[..total - 2]);
    let received = u16::from_le_bytes([frame[total - 2], frame[total - 1]]);
    if calculated != received {
        return Err(FrameError::crc(calculated, received, &frame[..total - 2]).into());
    }

    Ok(ModbusPdu::from_slice(&frame[1..total - 2])?)
}

#[async_trait]
impl Transport for RtuTransport {
    async fn exchange(
        &mut self,
        unit: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, ModbusError> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;

        // Stragglers from a timed-out exchange must not corrupt this frame.
        link.clear_input()?;

        let frame = Self::build_frame(unit, request);
        trace!("RTU frame out: {:02X?}", frame);

        if let Some(pin) = self.tx_enable.as_mut() {
            pin.set(true)?;
        }

        let write_result = link
            .write_all(&frame)
            .and_then(|_| link.flush())
            .map_err(TransportError::from);

        if !self.turnaround_delay.is_zero() {
            tokio::time::sleep(self.turnaround_delay).await;
        }

        if let Some(pin) = self.tx_enable.as_mut() {
            pin.set(false)?;
        }
        write_result?;

        // Broadcasts are fire-and-forget.
        if unit == 0 {
            return Ok(ModbusPdu::new());
        }

        let request_function = request.function_code().unwrap_or(0);
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        match receive_response(&mut **link, request_function, self.timeout).await {
            Ok(pdu) => Ok(pdu),
            Err(err) => {
                if matches!(
                    err,
                    ModbusError::Transport(TransportError::Timeout { .. })
                ) {
                    warn!(unit, "RTU receive timed out, draining input");
                    link.clear_input()?;
                }
                Err(err)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.is_open())
    }

    async fn close(&mut self) -> Result<(), ModbusError> {
        self.link = None;
        Ok(())
    }
}
