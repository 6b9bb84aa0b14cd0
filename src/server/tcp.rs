//! TCP server: one accept loop, one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, trace};

use crate::config::ServerConfig;
use crate::errors::{IoOperation, ModbusError, TransportError};
use crate::protocol::{ModbusPdu, MAX_PDU_SIZE};
use crate::transport::MBAP_HEADER_LEN;

use super::{ServerEvent, ServerHandlers};

pub struct TcpServer {
    config: ServerConfig,
    handlers: Arc<ServerHandlers>,
    shutdown: broadcast::Sender<()>,
    events: broadcast::Sender<ServerEvent>,
}

impl TcpServer {
    pub fn new(config: ServerConfig, handlers: ServerHandlers) -> Self {
        Self {
            config,
            handlers: Arc::new(handlers),
            shutdown: broadcast::channel(1).0,
            events: broadcast::channel(16).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn spawn_task<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(future);
        debug!("Spawned {} task: {:?}", name, task.id());
    }

    /// Binds the configured address and serves until [`stop`](Self::stop).
    pub async fn run(self: Arc<Self>) -> Result<(), ModbusError> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.bind_port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            TransportError::io(
                IoOperation::Bind,
                format!("Failed to bind to address {addr}"),
                e,
            )
        })?;

        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ModbusError> {
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on {}", addr);
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("TCP server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        info!("New connection from {}", peer);
                        let _ = self.events.send(ServerEvent::ClientConnected(peer));

                        let handlers = Arc::clone(&self.handlers);
                        let events = self.events.clone();
                        let shutdown_rx = self.shutdown.subscribe();

                        self.spawn_task("connection", async move {
                            if let Err(e) =
                                handle_connection(socket, peer, handlers, shutdown_rx).await
                            {
                                error!("Connection {} error: {}", peer, e);
                            }
                            let _ = events.send(ServerEvent::ClientDisconnected(peer));
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signals the accept loop to close the listener and exit.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    handlers: Arc<ServerHandlers>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ModbusError> {
    socket.set_nodelay(true).map_err(|e| {
        TransportError::io(IoOperation::Configure, "Failed to set TCP_NODELAY", e)
    })?;

    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Connection {} closing on shutdown", peer);
                return Ok(());
            }
            read = socket.read_exact(&mut header) => match read {
                Ok(_) => {}
                // clean EOF between frames
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("Client {} disconnected", peer);
                    return Ok(());
                }
                Err(e) => return Err(TransportError::from(e).into()),
            }
        }

        let transaction = [header[0], header[1]];
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit = header[6];

        if protocol_id != 0 {
            return Err(crate::errors::FrameError::format(
                crate::errors::FrameFormatKind::InvalidHeader,
                format!("Invalid protocol ID {protocol_id} from {peer}"),
            )
            .into());
        }
        if !(2..=MAX_PDU_SIZE + 1).contains(&length) {
            return Err(crate::errors::FrameError::too_long(
                format!("MBAP length {length} from {peer} out of range"),
                Some(header.to_vec()),
            )
            .into());
        }

        // length counts the unit id, already consumed with the header
        let mut pdu_bytes = vec![0u8; length - 1];
        socket
            .read_exact(&mut pdu_bytes)
            .await
            .map_err(TransportError::from)?;
        trace!("Request from {}: {:02X?}", peer, pdu_bytes);

        let request = ModbusPdu::from_slice(&pdu_bytes)?;
        let response = handlers.process_pdu(unit, &request);

        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + response.len());
        frame.extend_from_slice(&transaction);
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&((response.len() + 1) as u16).to_be_bytes());
        frame.push(unit);
        frame.extend_from_slice(response.as_slice());
        trace!("Response to {}: {:02X?}", peer, frame);

        socket
            .write_all(&frame)
            .await
            .map_err(TransportError::from)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ModbusClient;
    use crate::server::RegisterBank;
    use crate::transport::TcpTransport;

    const TIMEOUT: Duration = Duration::from_millis(500);

    async fn start_server(
        handlers: ServerHandlers,
    ) -> (Arc<TcpServer>, SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(TcpServer::new(ServerConfig::default(), handlers));

        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });
        (server, addr, task)
    }

    #[tokio::test]
    async fn test_client_server_register_roundtrip() {
        let bank = RegisterBank::new();
        let (server, addr, task) = start_server(bank.handlers()).await;

        let transport = TcpTransport::connect(addr, TIMEOUT).await.unwrap();
        let client = ModbusClient::new(Box::new(transport));

        client
            .write_holding_registers(1, 10, &[11, 22, 33])
            .await
            .unwrap();
        let values = client.read_holding_registers(1, 10, 3).await.unwrap();
        assert_eq!(values, vec![11, 22, 33]);
        assert_eq!(bank.holding_register(11), 22);

        server.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_server_coil_roundtrip() {
        let bank = RegisterBank::new();
        let (server, addr, task) = start_server(bank.handlers()).await;

        let transport = TcpTransport::connect(addr, TIMEOUT).await.unwrap();
        let client = ModbusClient::new(Box::new(transport));

        let pattern: Vec<bool> = (0..17).map(|i| i % 2 == 0).collect();
        client.write_multiple_coils(1, 19, &pattern).await.unwrap();
        let read = client.read_coils(1, 19, 17).await.unwrap();
        assert_eq!(read, pattern);

        // single-coil write over TCP uses the FF FF pattern; the server
        // accepts it
        client.write_coil(1, 7, true).await.unwrap();
        assert!(bank.coil(7));

        server.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_function_yields_exception() {
        let bank = RegisterBank::new();
        let (server, addr, task) = start_server(bank.handlers()).await;

        let transport = TcpTransport::connect(addr, TIMEOUT).await.unwrap();
        let client = ModbusClient::new(Box::new(transport));

        // bank handlers implement report-id? no - expect IllegalFunction
        let err = client.report_server_id(1).await.unwrap_err();
        match err {
            ModbusError::Protocol(e) => {
                assert_eq!(e.function, 0x11);
                assert_eq!(
                    e.code,
                    crate::protocol::ExceptionCode::IllegalFunction
                );
            }
            other => panic!("expected protocol error, got {other:?}"),
        }

        server.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_events() {
        let bank = RegisterBank::new();
        let (server, addr, task) = start_server(bank.handlers()).await;
        let mut events = server.subscribe();

        let transport = TcpTransport::connect(addr, TIMEOUT).await.unwrap();
        let client = ModbusClient::new(Box::new(transport));
        client.read_holding_registers(1, 0, 1).await.unwrap();
        client.disconnect().await.unwrap();

        // allow the connection task to observe the close
        sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            events.try_recv().unwrap(),
            ServerEvent::ClientConnected(_)
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ServerEvent::ClientDisconnected(_)
        ));

        server.stop();
        task.await.unwrap();
    }
}
