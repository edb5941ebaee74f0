//! Error types of the browser core.
//!
//! Every error is recoverable at the operation boundary:
//!
//! ```text
//! ImportError      - descriptor unreadable or malformed, OD load aborted
//! AddressError     - (index, subindex) does not resolve
//! InvalidNodeId    - node id outside 1-127, session not created
//! ConnectError     - bus/driver failure while opening the connection
//! DisconnectError  - failure while releasing the connection
//! SdoError         - per-transfer failure (abort, transport, not connected, busy)
//! TransportError   - raw failure reported by a CanTransport implementation
//! ```

use std::path::PathBuf;

use canopen_common::{get_abort_code_description, ProtocolError};
use thiserror::Error;

/// Failure importing an object dictionary descriptor
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse object dictionary: {0}")]
    Parse(String),

    #[error("Unsupported descriptor format: {0}")]
    UnsupportedFormat(String),

    #[error("Duplicate object index 0x{0:04X}")]
    DuplicateIndex(u16),

    #[error("Duplicate sub-index 0x{subindex:02X} in object 0x{index:04X}")]
    DuplicateSubindex { index: u16, subindex: u8 },

    #[error("Invalid value {value:?} for {key} in [{section}]")]
    InvalidField {
        section: String,
        key: String,
        value: String,
    },

    #[error(transparent)]
    InvalidNodeId(#[from] InvalidNodeId),
}

/// An (index, subindex) pair that does not resolve to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("No object at index 0x{0:04X}")]
    UnknownIndex(u16),

    #[error("No sub-object 0x{subindex:02X} in object 0x{index:04X}")]
    UnknownSubindex { index: u16, subindex: u8 },

    #[error("Object 0x{0:04X} has no sub-objects")]
    NotComposite(u16),
}

/// Node ids outside the CANopen range 1-127
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid node id {0}, expected 1-127")]
pub struct InvalidNodeId(pub u8);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid object address {0:?}, expected e.g. 0x1018:01")]
pub struct AddressParseError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure of a single SDO read or write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdoError {
    #[error("SDO abort 0x{0:08X}: {}", describe_abort(.0))]
    SdoAbort(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Another SDO transfer is in progress")]
    Busy,
}

impl SdoError {
    /// Human readable meaning of the abort code, if this is an abort
    pub fn abort_description(&self) -> Option<String> {
        match self {
            Self::SdoAbort(code) => Some(get_abort_code_description(*code)),
            _ => None,
        }
    }
}

fn describe_abort(code: &u32) -> String {
    get_abort_code_description(*code)
}

/// Failure reported by a [`CanTransport`](crate::transport::CanTransport)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("SDO abort 0x{code:08X}")]
    Abort { code: u32 },

    #[error("SDO request timeout")]
    Timeout,

    /// The bus connection is gone; the handle is no longer usable
    #[error("Link down: {0}")]
    LinkDown(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported interface: {0}")]
    Unsupported(String),
}

impl From<ProtocolError> for TransportError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Abort { code, .. } => Self::Abort { code },
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<TransportError> for SdoError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Abort { code } => Self::SdoAbort(code),
            TransportError::LinkDown(message) => Self::Transport(message),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config file path")]
    NoConfigDirectory,

    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    InvalidNodeId(#[from] InvalidNodeId),
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Failed to create log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write log entry: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(SdoError::from(TransportError::Abort { code: 0x0601_0002 }), SdoError::SdoAbort(0x0601_0002));
        assert_eq!(
            SdoError::from(TransportError::Timeout),
            SdoError::Transport("SDO request timeout".to_string())
        );
        assert_eq!(
            SdoError::from(TransportError::LinkDown("bus off".to_string())),
            SdoError::Transport("bus off".to_string())
        );
    }

    #[test]
    fn test_protocol_error_mapping() {
        assert_eq!(
            TransportError::from(ProtocolError::abort(0x0609_0011)),
            TransportError::Abort { code: 0x0609_0011 }
        );
        assert!(matches!(
            TransportError::from(ProtocolError::ToggleMismatch),
            TransportError::Protocol(_)
        ));
    }

    #[test]
    fn test_abort_display() {
        let error = SdoError::SdoAbort(0x0601_0002);
        assert_eq!(error.to_string(), "SDO abort 0x06010002: Attempt to write a read only object");
        assert_eq!(error.abort_description().as_deref(), Some("Attempt to write a read only object"));
        assert_eq!(SdoError::Busy.abort_description(), None);
    }

    #[test]
    fn test_address_error_display() {
        assert_eq!(AddressError::UnknownIndex(0x6000).to_string(), "No object at index 0x6000");
        assert_eq!(
            AddressError::UnknownSubindex { index: 0x1018, subindex: 5 }.to_string(),
            "No sub-object 0x05 in object 0x1018"
        );
    }
}
