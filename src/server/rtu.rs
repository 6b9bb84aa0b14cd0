//! RTU server: reads request frames off the serial link, dispatches them,
//! writes responses back.
//!
//! CRC failures produce no response (per the Modbus line protocol); the
//! server emits [`ServerEvent::CrcErrorDetected`] instead and drains the
//! receive buffer to resynchronise.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{ModbusError, TransportError};
use crate::protocol::{crc16, fill_crc, ModbusPdu};
use crate::transport::SerialLink;

use super::{ServerEvent, ServerHandlers};

/// Upper bound on how long one request frame may dribble in.
const FRAME_TIMEOUT: Duration = Duration::from_secs(1);
/// Idle sleep between polls of the receive buffer.
const IDLE_POLL: Duration = Duration::from_millis(5);

pub struct RtuServer {
    handlers: Arc<ServerHandlers>,
    shutdown: broadcast::Sender<()>,
    events: broadcast::Sender<ServerEvent>,
}

impl RtuServer {
    pub fn new(handlers: ServerHandlers) -> Self {
        Self {
            handlers: Arc::new(handlers),
            shutdown: broadcast::channel(1).0,
            events: broadcast::channel(16).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Launches the receiver task on `link`. The task runs until
    /// [`stop`](Self::stop).
    pub fn start(&self, link: Box<dyn SerialLink>) -> JoinHandle<()> {
        let handlers = Arc::clone(&self.handlers);
        let events = self.events.clone();
        let shutdown = self.shutdown.subscribe();

        let task = tokio::spawn(receive_loop(link, handlers, events, shutdown));
        debug!("Spawned RTU server task: {:?}", task.id());
        task
    }

    /// Signals the receiver task to exit after its current iteration.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

async fn receive_loop(
    mut link: Box<dyn SerialLink>,
    handlers: Arc<ServerHandlers>,
    events: broadcast::Sender<ServerEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("RTU server listening on {}", link.port_name());

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("RTU server received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(IDLE_POLL) => {
                loop {
                    match service_one(link.as_mut(), &handlers, &events).await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            error!("RTU server error: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    info!("RTU server stopped");
}

/// Reads exactly `buf.len()` bytes within [`FRAME_TIMEOUT`].
async fn read_exact(
    link: &mut dyn SerialLink,
    buf: &mut [u8],
    started: Instant,
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let available = link.bytes_to_read()? as usize;
        if available == 0 {
            if started.elapsed() >= FRAME_TIMEOUT {
                return Err(TransportError::timeout(started.elapsed(), FRAME_TIMEOUT));
            }
            tokio::time::sleep(crate::transport::RX_POLL_INTERVAL).await;
            continue;
        }
        let want = (buf.len() - filled).min(available);
        let n = link.read(&mut buf[filled..filled + want])?;
        filled += n;
    }
    Ok(())
}

/// Services at most one inbound frame. Returns whether a frame was
/// consumed.
pub(crate) async fn service_one(
    link: &mut dyn SerialLink,
    handlers: &ServerHandlers,
    events: &broadcast::Sender<ServerEvent>,
) -> Result<bool, ModbusError> {
    if (link.bytes_to_read()? as usize) < 2 {
        return Ok(false);
    }

    let started = Instant::now();
    let mut frame = vec![0u8; 2];
    if read_exact(link, &mut frame, started).await.is_err() {
        link.clear_input()?;
        return Ok(false);
    }

    let unit = frame[0];
    let function = frame[1];

    // Fixed part of the frame, by request shape.
    let fixed_len = match function {
        0x01..=0x06 => 8,
        // header up to the byte count, the tail length follows from it
        0x0F | 0x10 => 7,
        0x11 => 4,
        0x17 => 11,
        _ => {
            // unsizable: drop whatever arrived and answer IllegalFunction
            warn!(unit, function, "Unknown function code on RTU server");
            link.clear_input()?;
            let response = handlers.process_pdu(unit, &ModbusPdu::from_slice(&[function])?);
            if unit != 0 {
                write_response(link, unit, &response)?;
            }
            return Ok(true);
        }
    };

    frame.resize(fixed_len, 0);
    if read_exact(link, &mut frame[2..], started).await.is_err() {
        warn!(unit, function, "Timed out mid-frame, draining input");
        link.clear_input()?;
        return Ok(false);
    }

    // Variable-length requests reveal their tail in the byte-count field.
    if matches!(function, 0x0F | 0x10 | 0x17) {
        let byte_count = frame[fixed_len - 1] as usize;
        let total = fixed_len + byte_count + 2;
        frame.resize(total, 0);
        if read_exact(link, &mut frame[fixed_len..], started).await.is_err() {
            warn!(unit, function, "Timed out mid-frame, draining input");
            link.clear_input()?;
            return Ok(false);
        }
    }

    let total = frame.len();
    let calculated = crc16(&frame[..total - 2]);
    let received = u16::from_le_bytes([frame[total - 2], frame[total - 1]]);
    if calculated != received {
        warn!(
            unit,
            function,
            calculated = format_args!("{calculated:04X}"),
            received = format_args!("{received:04X}"),
            "CRC mismatch, frame dropped"
        );
        let _ = events.send(ServerEvent::CrcErrorDetected);
        link.clear_input()?;
        return Ok(true);
    }

    let request = ModbusPdu::from_slice(&frame[1..total - 2])?;
    let response = handlers.process_pdu(unit, &request);

    // Broadcasts are executed but never answered.
    if unit != 0 {
        write_response(link, unit, &response)?;
    }
    Ok(true)
}

fn write_response(
    link: &mut dyn SerialLink,
    unit: u8,
    response: &ModbusPdu,
) -> Result<(), TransportError> {
    let mut frame = Vec::with_capacity(1 + response.len() + 2);
    frame.push(unit);
    frame.extend_from_slice(response.as_slice());
    frame.extend_from_slice(&[0, 0]);
    fill_crc(&mut frame);

    link.write_all(&frame)?;
    link.flush()?;
    Ok(())
}
