mod link;
mod logging;
mod poll;
mod rtu;
mod server;
mod tcp;
mod types;

pub use link::Config as LinkConfig;
pub use logging::Config as LoggingConfig;
pub use poll::Config as PollConfig;
pub use rtu::Config as RtuConfig;
pub use server::Config as ServerConfig;
pub use tcp::Config as TcpConfig;
pub use types::{DataBits, Parity, StopBits};
