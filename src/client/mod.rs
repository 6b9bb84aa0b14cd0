//! Request/response engine.
//!
//! One [`ModbusClient`] owns one transport. A single-permit gate (a
//! FIFO-fair async mutex) serialises request/response pairs so exactly one
//! frame is on the wire per client at a time; concurrent callers queue.

mod events;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::config::{RtuConfig, TcpConfig};
use crate::errors::ModbusError;
use crate::protocol::{codec, DeviceId, FunctionCode, ModbusPdu, COIL_OFF};
use crate::transport::{RtuTransport, TcpTransport, Transport, TxEnable};
use crate::values::{self, WordOrder};

pub use events::ClientEvent;

/// Legacy 4xxxx notation base for holding registers.
const HOLDING_REGISTER_BASE: u16 = 40001;
/// Legacy 3xxxx notation base for input registers.
const INPUT_REGISTER_BASE: u16 = 30001;

/// Maps the legacy 4xxxx convention onto 0-based wire offsets.
///
/// A caller passing 40001 cannot mean "wire address 40001": the two
/// notations overlap above 40000 and the legacy reading wins.
fn normalize_holding(address: u16) -> u16 {
    if address >= HOLDING_REGISTER_BASE {
        address - HOLDING_REGISTER_BASE
    } else {
        address
    }
}

/// Maps the legacy 3xxxx convention onto 0-based wire offsets.
fn normalize_input(address: u16) -> u16 {
    if address >= INPUT_REGISTER_BASE {
        address - INPUT_REGISTER_BASE
    } else {
        address
    }
}

pub struct ModbusClient {
    transport: Mutex<Box<dyn Transport>>,
    events: broadcast::Sender<ClientEvent>,
    /// Per-client exchange counter, only used to correlate log lines.
    exchange_seq: AtomicU32,
}

impl ModbusClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            events: broadcast::channel(16).0,
            exchange_seq: AtomicU32::new(0),
        }
    }

    /// Opens the configured serial port and returns an RTU client.
    pub fn rtu(config: &RtuConfig) -> Result<Self, ModbusError> {
        Ok(Self::new(Box::new(RtuTransport::open(config)?)))
    }

    /// Opens an RTU client driving an RS-485 transmit-enable pin.
    pub fn rtu_with_pin(
        config: &RtuConfig,
        pin: Box<dyn TxEnable>,
    ) -> Result<Self, ModbusError> {
        Ok(Self::new(Box::new(
            RtuTransport::open(config)?.tx_enable(pin),
        )))
    }

    /// Connects to a Modbus TCP peer.
    pub async fn tcp(config: &TcpConfig) -> Result<Self, ModbusError> {
        let client = Self::new(Box::new(TcpTransport::connect_config(config).await?));
        client.emit(ClientEvent::Connected);
        Ok(client)
    }

    pub async fn tcp_addr(
        addr: impl tokio::net::ToSocketAddrs + std::fmt::Display,
        timeout: Duration,
    ) -> Result<Self, ModbusError> {
        let client = Self::new(Box::new(TcpTransport::connect(addr, timeout).await?));
        client.emit(ClientEvent::Connected);
        Ok(client)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// Closes the transport. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ModbusError> {
        let was_connected = {
            let mut transport = self.transport.lock().await;
            let was = transport.is_connected();
            transport.close().await?;
            was
        };
        if was_connected {
            info!("Client disconnected");
            self.emit(ClientEvent::Disconnected);
        }
        Ok(())
    }

    /// One framed exchange under the single-permit gate.
    async fn perform(&self, unit: u8, request: ModbusPdu) -> Result<ModbusPdu, ModbusError> {
        let exchange = self.exchange_seq.fetch_add(1, Ordering::Relaxed);
        let mut transport = self.transport.lock().await;
        debug!(
            exchange,
            unit,
            function = request.function_code().unwrap_or(0),
            "Performing exchange"
        );

        let result = transport.exchange(unit, &request).await;
        if let Err(ModbusError::Transport(fault)) = &result {
            if fault.is_fatal() {
                self.emit(ClientEvent::Disconnected);
            }
        }
        result
    }

    pub async fn read_coils(
        &self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        let request = codec::read_request(FunctionCode::ReadCoils, start, count)?;
        let response = self.perform(unit, request).await?;
        codec::parse_read_bits(&response, FunctionCode::ReadCoils, count)
    }

    pub async fn read_discrete_inputs(
        &self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ModbusError> {
        let request = codec::read_request(FunctionCode::ReadDiscreteInputs, start, count)?;
        let response = self.perform(unit, request).await?;
        codec::parse_read_bits(&response, FunctionCode::ReadDiscreteInputs, count)
    }

    pub async fn read_holding_registers(
        &self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let start = normalize_holding(start);
        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, start, count)?;
        let response = self.perform(unit, request).await?;
        codec::parse_read_registers(&response, FunctionCode::ReadHoldingRegisters, count)
    }

    pub async fn read_input_registers(
        &self,
        unit: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let start = normalize_input(start);
        let request = codec::read_request(FunctionCode::ReadInputRegisters, start, count)?;
        let response = self.perform(unit, request).await?;
        codec::parse_read_registers(&response, FunctionCode::ReadInputRegisters, count)
    }

    /// Reads `float_count` IEEE-754 floats, two registers each, low word
    /// first.
    pub async fn read_holding_registers_float(
        &self,
        unit: u8,
        start: u16,
        float_count: u16,
    ) -> Result<Vec<f32>, ModbusError> {
        let registers = self
            .read_holding_registers(unit, start, float_count.saturating_mul(2))
            .await?;
        registers_to_floats(&registers)
    }

    pub async fn read_input_registers_float(
        &self,
        unit: u8,
        start: u16,
        float_count: u16,
    ) -> Result<Vec<f32>, ModbusError> {
        let registers = self
            .read_input_registers(unit, start, float_count.saturating_mul(2))
            .await?;
        registers_to_floats(&registers)
    }

    pub async fn write_coil(
        &self,
        unit: u8,
        address: u16,
        value: bool,
    ) -> Result<(), ModbusError> {
        let pattern = if value {
            self.transport.lock().await.coil_on_pattern()
        } else {
            COIL_OFF
        };
        let request = codec::write_coil_request(address, pattern)?;
        let response = self.perform(unit, request).await?;
        if unit == 0 && response.is_empty() {
            return Ok(());
        }
        codec::parse_write_echo(&response, FunctionCode::WriteSingleCoil)?;
        Ok(())
    }

    pub async fn write_multiple_coils(
        &self,
        unit: u8,
        start: u16,
        values: &[bool],
    ) -> Result<(), ModbusError> {
        let request = codec::write_multiple_coils_request(start, values)?;
        let response = self.perform(unit, request).await?;
        if unit == 0 && response.is_empty() {
            return Ok(());
        }
        codec::parse_write_echo(&response, FunctionCode::WriteMultipleCoils)?;
        Ok(())
    }

    pub async fn write_holding_register(
        &self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), ModbusError> {
        let address = normalize_holding(address);
        let request = codec::write_register_request(address, value)?;
        let response = self.perform(unit, request).await?;
        if unit == 0 && response.is_empty() {
            return Ok(());
        }
        codec::parse_write_echo(&response, FunctionCode::WriteSingleRegister)?;
        Ok(())
    }

    pub async fn write_holding_registers(
        &self,
        unit: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let start = normalize_holding(start);
        let request = codec::write_multiple_registers_request(start, values)?;
        let response = self.perform(unit, request).await?;
        if unit == 0 && response.is_empty() {
            return Ok(());
        }
        codec::parse_write_echo(&response, FunctionCode::WriteMultipleRegisters)?;
        Ok(())
    }

    pub async fn report_server_id(&self, unit: u8) -> Result<DeviceId, ModbusError> {
        let response = self.perform(unit, codec::report_id_request()).await?;
        codec::parse_report_id(&response)
    }

    /// Writes `values` then reads `read_count` holding registers in one
    /// transaction.
    pub async fn read_write_multiple_registers(
        &self,
        unit: u8,
        read_start: u16,
        read_count: u16,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, ModbusError> {
        let request = codec::read_write_registers_request(
            normalize_holding(read_start),
            read_count,
            normalize_holding(write_start),
            values,
        )?;
        let response = self.perform(unit, request).await?;
        codec::parse_read_registers(
            &response,
            FunctionCode::ReadWriteMultipleRegisters,
            read_count,
        )
    }
}

fn registers_to_floats(registers: &[u16]) -> Result<Vec<f32>, ModbusError> {
    registers
        .chunks_exact(2)
        .map(|pair| values::to_f32(pair, WordOrder::LowWordFirst))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    /// Scripted transport: records request PDUs, replays canned responses.
    struct MockTransport {
        requests: Arc<StdMutex<Vec<(u8, Vec<u8>)>>>,
        responses: VecDeque<Result<Vec<u8>, ModbusError>>,
        in_flight: Arc<AtomicBool>,
        delay: Duration,
        connected: bool,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                requests: Arc::new(StdMutex::new(Vec::new())),
                responses: VecDeque::new(),
                in_flight: Arc::new(AtomicBool::new(false)),
                delay: Duration::ZERO,
                connected: true,
            }
        }

        fn respond(mut self, pdu: &[u8]) -> Self {
            self.responses.push_back(Ok(pdu.to_vec()));
            self
        }

        fn fail(mut self, err: ModbusError) -> Self {
            self.responses.push_back(Err(err));
            self
        }

        fn requests_handle(&self) -> Arc<StdMutex<Vec<(u8, Vec<u8>)>>> {
            Arc::clone(&self.requests)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn exchange(
            &mut self,
            unit: u8,
            request: &ModbusPdu,
        ) -> Result<ModbusPdu, ModbusError> {
            assert!(
                !self.in_flight.swap(true, Ordering::SeqCst),
                "two requests in flight at once"
            );
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.requests
                .lock()
                .unwrap()
                .push((unit, request.as_slice().to_vec()));
            self.in_flight.store(false, Ordering::SeqCst);

            match self.responses.pop_front() {
                Some(Ok(bytes)) => Ok(ModbusPdu::from_slice(&bytes)?),
                Some(Err(err)) => Err(err),
                None => Ok(ModbusPdu::new()),
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) -> Result<(), ModbusError> {
            self.connected = false;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_holding_registers() {
        let mock = MockTransport::new().respond(&[0x03, 0x04, 0x00, 0x2A, 0x00, 0x14]);
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        let values = client.read_holding_registers(7, 11, 2).await.unwrap();
        assert_eq!(values, vec![42, 20]);
        assert_eq!(
            requests.lock().unwrap()[0],
            (7, vec![0x03, 0x00, 0x0B, 0x00, 0x02])
        );
    }

    #[tokio::test]
    async fn test_legacy_holding_address_is_normalized() {
        let mock = MockTransport::new().respond(&[0x06, 0x00, 0x07, 0x00, 0x2A]);
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        client.write_holding_register(1, 40008, 42).await.unwrap();
        assert_eq!(
            requests.lock().unwrap()[0],
            (1, vec![0x06, 0x00, 0x07, 0x00, 0x2A])
        );
    }

    #[tokio::test]
    async fn test_legacy_input_address_is_normalized() {
        let mock = MockTransport::new().respond(&[0x04, 0x02, 0x00, 0x01]);
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        client.read_input_registers(1, 30012, 1).await.unwrap();
        assert_eq!(
            requests.lock().unwrap()[0],
            (1, vec![0x04, 0x00, 0x0B, 0x00, 0x01])
        );
    }

    #[tokio::test]
    async fn test_oversized_count_fails_before_io() {
        let mock = MockTransport::new();
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        let err = client.read_holding_registers(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_write_fails_before_io() {
        let mock = MockTransport::new();
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        let err = client.write_holding_registers(1, 0, &[]).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_interleave() {
        let mut mock = MockTransport::new();
        mock.delay = Duration::from_millis(5);
        for _ in 0..8 {
            mock.responses
                .push_back(Ok(vec![0x03, 0x02, 0x00, 0x01]));
        }
        let client = Arc::new(ModbusClient::new(Box::new(mock)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.read_holding_registers(1, 0, 1).await })
            })
            .collect();

        for task in tasks {
            // the mock panics on overlap, poisoning these results
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_float_read_uses_low_word_first_order() {
        // 2.0f32 = 0x40000000; low word first on the wire
        let mock = MockTransport::new().respond(&[0x03, 0x04, 0x00, 0x00, 0x40, 0x00]);
        let client = ModbusClient::new(Box::new(mock));

        let values = client.read_holding_registers_float(1, 0, 1).await.unwrap();
        assert_eq!(values, vec![2.0]);
    }

    #[tokio::test]
    async fn test_fatal_transport_error_emits_disconnected() {
        let mock = MockTransport::new().fail(TransportError::ConnectionLost.into());
        let client = ModbusClient::new(Box::new(mock));
        let mut events = client.subscribe();

        let err = client.read_holding_registers(1, 0, 1).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Transport(TransportError::ConnectionLost)
        ));
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_emits_event_once() {
        let mock = MockTransport::new();
        let client = ModbusClient::new(Box::new(mock));
        let mut events = client.subscribe();

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_coil_uses_transport_pattern() {
        let mock = MockTransport::new().respond(&[0x05, 0x00, 0x07, 0xFF, 0x00]);
        let requests = mock.requests_handle();
        let client = ModbusClient::new(Box::new(mock));

        client.write_coil(1, 7, true).await.unwrap();
        assert_eq!(
            requests.lock().unwrap()[0],
            (1, vec![0x05, 0x00, 0x07, 0xFF, 0x00])
        );
    }
}
