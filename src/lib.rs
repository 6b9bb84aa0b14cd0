pub mod client;
pub mod config;
pub mod device;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod values;

pub use client::{ClientEvent, ModbusClient};
pub use config::{DataBits, Parity, StopBits};
pub use config::{LinkConfig, LoggingConfig, PollConfig, RtuConfig, ServerConfig, TcpConfig};
pub use device::{FieldValue, Mapping, MappingBuilder, PolledDevice, SourceFormat};
pub use errors::{
    ConfigValidationError, FrameError, InitializationError, ModbusError, ProtocolError,
    TransportError,
};
pub use logging::setup_logging;
pub use protocol::{DeviceId, ExceptionCode, FunctionCode, ModbusPdu};
pub use server::{RegisterBank, RtuServer, ServerEvent, ServerHandlers, TcpServer};
pub use transport::{RtuTransport, SerialLink, TcpTransport, Transport, TxEnable};
pub use values::WordOrder;
