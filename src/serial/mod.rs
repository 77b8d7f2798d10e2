pub mod framer;
pub mod interface;
pub mod protocol;
pub mod unified;

pub use framer::LineFramer;
pub use interface::{SerialInterface, SerialPortIO};
pub use protocol::{Command, Inbound, ParseError, TelemetryMarker};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection to {port} failed: {description}")]
    ConnectionFailed { port: String, description: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("Line buffer exceeded {limit} bytes without a terminator")]
    BufferOverflow { limit: usize },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
