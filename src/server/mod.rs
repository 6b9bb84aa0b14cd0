mod handlers;
mod rtu;
mod tcp;

pub use handlers::{RegisterBank, ServerHandlers};
pub use rtu::RtuServer;
pub use tcp::TcpServer;

/// Server-side notifications, delivered synchronously on the observing
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected(std::net::SocketAddr),
    ClientDisconnected(std::net::SocketAddr),
    CrcErrorDetected,
}
