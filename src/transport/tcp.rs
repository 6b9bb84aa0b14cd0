//! TCP framer: MBAP header + PDU, no checksum, transaction-id correlation.

use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::TcpConfig;
use crate::errors::{
    FrameError, FrameFormatKind, IoOperation, ModbusError, TransportError,
};
use crate::protocol::{ModbusPdu, MAX_PDU_SIZE};

use super::Transport;

/// MBAP header length: transaction id, protocol id, length, unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// Builds the full TCP frame for one request.
pub fn encode_mbap(transaction_id: u16, unit: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;

    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu.as_slice());
    frame
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
    transaction_id: u16,
    timeout: Duration,
}

impl TcpTransport {
    /// Connects to a Modbus TCP peer.
    pub async fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        limit: Duration,
    ) -> Result<Self, ModbusError> {
        let peer = addr.to_string();
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::timeout(limit, limit))?
            .map_err(TransportError::from)?;

        stream.set_nodelay(true).map_err(|e| {
            TransportError::io(IoOperation::Configure, "Failed to set TCP_NODELAY", e)
        })?;

        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
        SockRef::from(&stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| {
                TransportError::io(IoOperation::Configure, "Failed to set keepalive", e)
            })?;

        debug!("Connected to {}", peer);
        Ok(Self::from_stream(stream, peer, limit))
    }

    pub async fn connect_config(config: &TcpConfig) -> Result<Self, ModbusError> {
        Self::connect(format!("{}:{}", config.host, config.port), config.timeout).await
    }

    /// Wraps an established stream. Used by tests and custom dialers.
    pub fn from_stream(stream: TcpStream, peer: String, limit: Duration) -> Self {
        Self {
            stream: Some(stream),
            peer,
            transaction_id: 1,
            timeout: limit,
        }
    }

    fn next_transaction_id(&mut self) -> u16 {
        let id = self.transaction_id;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        id
    }
}

async fn exchange_on_stream(
    stream: &mut TcpStream,
    limit: Duration,
    frame: &[u8],
    sent_txn: u16,
) -> Result<ModbusPdu, ModbusError> {
    timeout(limit, stream.write_all(frame))
        .await
        .map_err(|_| TransportError::timeout(limit, limit))?
        .map_err(TransportError::from)?;

    // MBAP + function + (length byte or exception code)
    let mut header = [0u8; MBAP_HEADER_LEN + 2];
    timeout(limit, stream.read_exact(&mut header))
        .await
        .map_err(|_| TransportError::timeout(limit, limit))?
        .map_err(TransportError::from)?;

    let rx_txn = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let function = header[7];

    if protocol_id != 0 {
        return Err(FrameError::format(
            FrameFormatKind::InvalidHeader,
            format!("Invalid protocol ID: {protocol_id}"),
        )
        .into());
    }
    // length counts unit id + PDU; we consumed unit + 2 PDU bytes already
    if !(3..=MAX_PDU_SIZE + 1).contains(&length) {
        return Err(FrameError::too_long(
            format!("MBAP length {length} out of range"),
            Some(header.to_vec()),
        )
        .into());
    }

    let mut pdu_bytes = vec![function, header[8]];
    let remaining = length - 3;
    if remaining > 0 {
        let mut rest = vec![0u8; remaining];
        timeout(limit, stream.read_exact(&mut rest))
            .await
            .map_err(|_| TransportError::timeout(limit, limit))?
            .map_err(TransportError::from)?;
        pdu_bytes.extend_from_slice(&rest);
    }
    trace!("TCP frame in: {:02X?}", pdu_bytes);

    if rx_txn != sent_txn {
        return Err(FrameError::Format {
            kind: FrameFormatKind::TransactionMismatch,
            details: format!("Sent transaction {sent_txn}, response carries {rx_txn}"),
            frame_data: Some(pdu_bytes),
        }
        .into());
    }

    Ok(ModbusPdu::from_slice(&pdu_bytes)?)
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(
        &mut self,
        unit: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, ModbusError> {
        let limit = self.timeout;
        let sent_txn = self.next_transaction_id();
        let frame = encode_mbap(sent_txn, unit, request);
        trace!(peer = %self.peer, "TCP frame out: {:02X?}", frame);

        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let result = exchange_on_stream(stream, limit, &frame, sent_txn).await;

        if let Err(ModbusError::Transport(fault)) = &result {
            if fault.is_fatal() {
                debug!(peer = %self.peer, "Dropping stream after {fault}");
                self.stream = None;
            }
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<(), ModbusError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("Disconnected from {}", self.peer);
        }
        Ok(())
    }

    /// Widely deployed TCP peers expect FF FF for coil ON rather than the
    /// RTU FF 00 pattern.
    fn coil_on_pattern(&self) -> u16 {
        0xFFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codec, FunctionCode};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(500);

    async fn pair() -> (TcpTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, (server, _)) =
            tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
        (
            TcpTransport::from_stream(client.unwrap(), addr.to_string(), TIMEOUT),
            server,
        )
    }

    #[test]
    fn test_mbap_layout_for_read_request() {
        let pdu = codec::read_request(FunctionCode::ReadHoldingRegisters, 11, 13).unwrap();
        let frame = encode_mbap(1, 7, &pdu);
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x0B, 0x00, 0x0D]
        );
    }

    #[test]
    fn test_mbap_layout_for_coil_write_uses_ffff() {
        // the transport reports its ON pattern; the codec takes it verbatim
        let pdu = codec::write_coil_request(7, 0xFFFF).unwrap();
        let frame = encode_mbap(1, 1, &pdu);
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x07, 0xFF, 0xFF]
        );
    }

    #[tokio::test]
    async fn test_exchange_roundtrip() {
        let (mut transport, mut server) = pair().await;

        let server_task = tokio::spawn(async move {
            let mut request = vec![0u8; 12];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(
                request,
                vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x0B, 0x00, 0x02]
            );
            // respond with two registers, echoing transaction and unit ids
            server
                .write_all(&[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x07, 0x03, 0x04, 0x00, 0x2A, 0x00,
                    0x14,
                ])
                .await
                .unwrap();
        });

        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, 11, 2).unwrap();
        let response = transport.exchange(7, &request).await.unwrap();
        assert_eq!(response.as_slice(), &[0x03, 0x04, 0x00, 0x2A, 0x00, 0x14]);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_ids_advance() {
        let (mut transport, mut server) = pair().await;

        let server_task = tokio::spawn(async move {
            for expected_txn in 1u16..=2 {
                let mut request = vec![0u8; 12];
                server.read_exact(&mut request).await.unwrap();
                assert_eq!(u16::from_be_bytes([request[0], request[1]]), expected_txn);
                let response = [
                    request[0], request[1], 0x00, 0x00, 0x00, 0x05, request[6], 0x03, 0x02,
                    0x00, 0x01,
                ];
                server.write_all(&response).await.unwrap();
            }
        });

        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, 0, 1).unwrap();
        transport.exchange(1, &request).await.unwrap();
        transport.exchange(1, &request).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_transaction_is_a_protocol_fault() {
        let (mut transport, mut server) = pair().await;

        tokio::spawn(async move {
            let mut request = vec![0u8; 12];
            server.read_exact(&mut request).await.unwrap();
            // wrong transaction id
            server
                .write_all(&[0x00, 0x63, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x01])
                .await
                .unwrap();
        });

        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, 0, 1).unwrap();
        let err = transport.exchange(1, &request).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Frame(FrameError::Format {
                kind: FrameFormatKind::TransactionMismatch,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_exception_pdu_passes_through() {
        let (mut transport, mut server) = pair().await;

        tokio::spawn(async move {
            let mut request = vec![0u8; 12];
            server.read_exact(&mut request).await.unwrap();
            server
                .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02])
                .await
                .unwrap();
        });

        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, 0, 1).unwrap();
        let response = transport.exchange(1, &request).await.unwrap();
        assert!(response.is_exception());
        assert_eq!(response.exception_code(), Some(0x02));
    }

    #[tokio::test]
    async fn test_peer_disconnect_is_connection_lost() {
        let (mut transport, server) = pair().await;
        drop(server);

        let request = codec::read_request(FunctionCode::ReadHoldingRegisters, 0, 1).unwrap();
        let err = transport.exchange(1, &request).await.unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Transport(TransportError::ConnectionLost)
        ));
        assert!(!transport.is_connected());
    }
}
