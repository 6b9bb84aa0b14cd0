//! Polled device mirror.
//!
//! A [`PolledDevice`] binds a client, a unit address and a set of register
//! mappings. A timer task refreshes every mapping each period; values are
//! decoded, scaled and deposited into the registered sinks. Register writes
//! go through the same gate as the poll tick so a write never lands in the
//! middle of a refresh pass.

mod mapping;
mod value;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ModbusClient;
use crate::errors::ModbusError;
use crate::protocol::MAX_ITEMS_PER_REQUEST;

pub use mapping::{Mapping, MappingBuilder, SourceFormat};
pub use value::FieldValue;

/// Default refresh period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(5);
/// Floor between the end of one pass and the start of the next.
pub const MIN_POLL_GAP: Duration = Duration::from_millis(100);

pub struct PolledDevice {
    client: Arc<ModbusClient>,
    unit: u8,
    period: Duration,
    mappings: Arc<Mutex<Vec<Mapping>>>,
    shutdown: broadcast::Sender<()>,
    poll_task: StdMutex<Option<JoinHandle<()>>>,
}

impl PolledDevice {
    pub fn new(client: Arc<ModbusClient>, unit: u8) -> Self {
        Self {
            client,
            unit,
            period: DEFAULT_POLL_PERIOD,
            mappings: Arc::new(Mutex::new(Vec::new())),
            shutdown: broadcast::channel(1).0,
            poll_task: StdMutex::new(None),
        }
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period.max(MIN_POLL_GAP);
        self
    }

    /// Registers a mapping. Typed mappings must cover 1, 2 or 4 registers;
    /// custom decoders may span any readable window.
    pub async fn map(&self, mapping: Mapping) -> Result<(), ModbusError> {
        if mapping.count == 0 || mapping.count > MAX_ITEMS_PER_REQUEST {
            return Err(ModbusError::argument(format!(
                "Mapping of {} registers is not readable in one transaction",
                mapping.count
            )));
        }
        if mapping.needs_width_check() && !matches!(mapping.count, 1 | 2 | 4) {
            return Err(ModbusError::argument(format!(
                "Typed mapping must cover 1, 2 or 4 registers, got {}",
                mapping.count
            )));
        }

        self.mappings.lock().await.push(mapping);
        Ok(())
    }

    /// One refresh pass over all mappings, in registration order.
    ///
    /// A timeout aborts the pass (the device is presumed offline for this
    /// tick); a failed conversion is fatal only for its own mapping.
    pub async fn refresh(&self) -> Result<(), ModbusError> {
        let mut mappings = self.mappings.lock().await;
        debug!(unit = self.unit, count = mappings.len(), "Refreshing mappings");

        for mapping in mappings.iter_mut() {
            let registers = match self
                .client
                .read_holding_registers(self.unit, mapping.start, mapping.count)
                .await
            {
                Ok(registers) => registers,
                Err(e) if e.is_timeout() => {
                    warn!(unit = self.unit, start = mapping.start, "Poll read timed out, aborting pass");
                    return Err(e);
                }
                Err(e) => {
                    error!(unit = self.unit, start = mapping.start, "Poll read failed: {}", e);
                    return Err(e);
                }
            };

            if let Err(e) = mapping.apply(&registers) {
                error!(
                    unit = self.unit,
                    start = mapping.start,
                    "Mapping update failed: {}",
                    e
                );
            }
        }
        Ok(())
    }

    /// Launches the poll timer. No-op when already polling.
    pub fn start_polling(self: &Arc<Self>) {
        let mut slot = self.poll_task.lock().unwrap();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let device = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            info!(unit = device.unit, period = ?device.period, "Polling started");
            loop {
                let started = Instant::now();
                if let Err(e) = device.refresh().await {
                    warn!(unit = device.unit, "Poll pass aborted: {}", e);
                }

                let wait = device
                    .period
                    .saturating_sub(started.elapsed())
                    .max(MIN_POLL_GAP);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.recv() => break,
                }
            }
            info!(unit = device.unit, "Polling stopped");
        });
        *slot = Some(task);
    }

    /// Stops the poll timer after the current pass.
    pub fn stop_polling(&self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            drop(task); // detached; exits on the shutdown signal
        }
    }

    /// Writes holding registers through the poll gate, delegating to the
    /// client's single- or multi-register write.
    pub async fn write_holding_registers(
        &self,
        start: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let _gate = self.mappings.lock().await;
        match values {
            [value] => {
                self.client
                    .write_holding_register(self.unit, start, *value)
                    .await
            }
            _ => {
                self.client
                    .write_holding_registers(self.unit, start, values)
                    .await
            }
        }
    }

    pub async fn write_holding_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        self.write_holding_registers(address, &[value]).await
    }
}

impl Drop for PolledDevice {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::{RegisterBank, TcpServer};
    use crate::transport::TcpTransport;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(500);

    async fn harness() -> (Arc<RegisterBank>, Arc<TcpServer>, Arc<ModbusClient>) {
        let bank = RegisterBank::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(TcpServer::new(ServerConfig::default(), bank.handlers()));
        let serving = Arc::clone(&server);
        tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });

        let transport = TcpTransport::connect(addr, TIMEOUT).await.unwrap();
        let client = Arc::new(ModbusClient::new(Box::new(transport)));
        (bank, server, client)
    }

    fn capture<T: Copy + Send + 'static>() -> (Arc<StdMutex<Option<T>>>, impl FnMut(T) + Send)
    {
        let slot = Arc::new(StdMutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, move |value| {
            *writer.lock().unwrap() = Some(value);
        })
    }

    #[tokio::test]
    async fn test_refresh_deposits_scaled_value() {
        let (bank, server, client) = harness().await;
        bank.set_holding_register(100, 123);

        let device = PolledDevice::new(client, 1);
        let (slot, sink) = capture::<f64>();
        device
            .map(Mapping::registers(100, 1).scale(0.1).into_f64(sink))
            .await
            .unwrap();

        device.refresh().await.unwrap();
        let value = slot.lock().unwrap().unwrap();
        assert!((value - 12.3).abs() < 1e-9);

        server.stop();
    }

    #[tokio::test]
    async fn test_refresh_follows_registration_order() {
        let (bank, server, client) = harness().await;
        bank.set_holding_register(0, 1);
        bank.set_holding_register(10, 2);

        let device = PolledDevice::new(client, 1);
        let order = Arc::new(StdMutex::new(Vec::new()));

        for start in [0u16, 10] {
            let order = Arc::clone(&order);
            device
                .map(Mapping::registers(start, 1).into_i16(move |value| {
                    order.lock().unwrap().push(value);
                }))
                .await
                .unwrap();
        }

        device.refresh().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        server.stop();
    }

    #[tokio::test]
    async fn test_mapping_failure_does_not_stop_pass() {
        let (bank, server, client) = harness().await;
        bank.set_holding_register(0, 40_000); // out of range for u8
        bank.set_holding_register(1, 7);

        let device = PolledDevice::new(client, 1);
        let (bad_slot, bad_sink) = capture::<u8>();
        let (good_slot, good_sink) = capture::<i16>();
        device
            .map(Mapping::registers(0, 1).into_u8(bad_sink))
            .await
            .unwrap();
        device
            .map(Mapping::registers(1, 1).into_i16(good_sink))
            .await
            .unwrap();

        device.refresh().await.unwrap();
        assert_eq!(*bad_slot.lock().unwrap(), None);
        assert_eq!(*good_slot.lock().unwrap(), Some(7));

        server.stop();
    }

    #[tokio::test]
    async fn test_typed_mapping_width_is_validated() {
        let (_, server, client) = harness().await;
        let device = PolledDevice::new(client, 1);

        let (_, sink) = capture::<i16>();
        let err = device
            .map(Mapping::registers(0, 3).into_i16(sink))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        server.stop();
    }

    #[tokio::test]
    async fn test_polling_loop_updates_periodically() {
        let (bank, server, client) = harness().await;
        bank.set_holding_register(5, 55);

        let device = Arc::new(PolledDevice::new(client, 1).period(MIN_POLL_GAP));
        let (slot, sink) = capture::<i16>();
        device
            .map(Mapping::registers(5, 1).into_i16(sink))
            .await
            .unwrap();

        device.start_polling();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*slot.lock().unwrap(), Some(55));

        // value changes are picked up on a later tick
        bank.set_holding_register(5, 66);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*slot.lock().unwrap(), Some(66));

        device.stop_polling();
        server.stop();
    }

    #[tokio::test]
    async fn test_write_goes_through_gate() {
        let (bank, server, client) = harness().await;

        let device = PolledDevice::new(client, 1);
        device.write_holding_register(40008, 42).await.unwrap();
        assert_eq!(bank.holding_register(7), 42);

        device
            .write_holding_registers(20, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(bank.holding_register(21), 2);

        server.stop();
    }
}
