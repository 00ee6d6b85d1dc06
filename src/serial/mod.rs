pub mod interface;
pub mod port;
pub mod protocol;
pub mod simulated;

pub use interface::SerialSession;
pub use port::{PortOpener, SerialLink, SystemPortOpener};
pub use protocol::{CommandProtocol, PsuCommand};
pub use simulated::SimulatedSupply;

use serde::{Deserialize, Serialize};

pub const BAUD_RATE: u32 = 9600;
pub const READ_TIMEOUT_MS: u64 = 2000;
pub const LINE_TERMINATOR: u8 = b'\n';
/// Shortest port identifier that can name a real device ("COM1", "ttyS").
pub const MIN_PORT_NAME_LEN: usize = 4;

/// Line settings applied when a session opens a port.
///
/// Data bits, parity, stop bits and flow control are not configurable: the
/// supply only speaks 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub terminator: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout_ms: READ_TIMEOUT_MS,
            terminator: LINE_TERMINATOR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Invalid port: {0:?}")]
    InvalidPort(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Port not open")]
    NotOpen,

    #[error("Communication timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// True when the link itself is gone and the session must be released.
    pub fn is_link_lost(&self) -> bool {
        match self {
            SerialError::IoError(e) => is_lost_link_kind(e.kind()),
            SerialError::SerialportError(e) => match e.kind() {
                serialport::ErrorKind::NoDevice => true,
                serialport::ErrorKind::Io(kind) => is_lost_link_kind(kind),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_lost_link_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotFound
    )
}

pub type Result<T> = std::result::Result<T, SerialError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn port_error(kind: serialport::ErrorKind) -> SerialError {
        SerialError::SerialportError(serialport::Error::new(kind, "port failure"))
    }

    #[test]
    fn test_unplugged_port_errors_lose_link() {
        assert!(port_error(serialport::ErrorKind::NoDevice).is_link_lost());
        assert!(port_error(serialport::ErrorKind::Io(io::ErrorKind::BrokenPipe)).is_link_lost());
        assert!(port_error(serialport::ErrorKind::Io(io::ErrorKind::NotConnected)).is_link_lost());
        assert!(SerialError::IoError(io::Error::from(io::ErrorKind::ConnectionReset)).is_link_lost());
    }

    #[test]
    fn test_transient_errors_keep_link() {
        assert!(!port_error(serialport::ErrorKind::Io(io::ErrorKind::TimedOut)).is_link_lost());
        assert!(!port_error(serialport::ErrorKind::InvalidInput).is_link_lost());
        assert!(!SerialError::IoError(io::Error::from(io::ErrorKind::TimedOut)).is_link_lost());
        assert!(!SerialError::Timeout.is_link_lost());
        assert!(!SerialError::ProtocolError("ERR".into()).is_link_lost());
    }
}
