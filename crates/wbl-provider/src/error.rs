//! Provider Error Types

use thiserror::Error;
use wbl_protocol::Vendor;

/// Errors surfaced by provider construction and lifecycle.
///
/// Decode errors never show up here; they are absorbed by the reader.
#[derive(Debug, Error)]
pub enum WblError {
    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Read or write failure on an open transport
    #[error("I/O error: {0}")]
    Io(String),

    /// Vendor name not recognized
    #[error("unknown WBL type: {0}")]
    UnknownVendor(String),

    /// Vendor cannot be reached over the configured transport
    #[error("{vendor} does not support {transport} transport")]
    UnsupportedTransport {
        vendor: Vendor,
        transport: &'static str,
    },

    /// Transport needs a bridge adapter and none was supplied
    #[error("{0} requires a bridge adapter")]
    BridgeUnavailable(Vendor),

    /// Bridge rejected a message
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// `start` called on a running provider
    #[error("provider already started")]
    AlreadyStarted,

    /// `start` called after `stop`
    #[error("provider stopped")]
    Stopped,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for WblError {
    fn from(err: std::io::Error) -> Self {
        WblError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for WblError {
    fn from(err: tokio_serial::Error) -> Self {
        WblError::Serial(err.to_string())
    }
}
