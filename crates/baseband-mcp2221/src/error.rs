//! Error types for the MCP2221 transport

use baseband_core::TransportError;
use thiserror::Error;

/// Result type for MCP2221 operations
pub type Result<T> = std::result::Result<T, Mcp2221Error>;

/// Errors that can occur while opening or configuring an MCP2221
#[derive(Debug, Error)]
pub enum Mcp2221Error {
    /// No matching device found
    #[error("No MCP2221 found{0}")]
    DeviceNotFound(String),

    /// Failed to open device
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// No HID interface with interrupt endpoints
    #[error("No HID interface found: {0}")]
    NoHidInterface(String),

    /// Failed to claim USB interface
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// The chip rejected a configuration command
    #[error("Failed to configure device: {0}")]
    ConfigFailed(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// USB enumeration error
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),
}

impl From<Mcp2221Error> for TransportError {
    fn from(e: Mcp2221Error) -> Self {
        match e {
            Mcp2221Error::InvalidParameter(s) => TransportError::InvalidParameter(s),
            Mcp2221Error::DeviceNotFound(_) => TransportError::Disconnected,
            other => TransportError::Usb(other.to_string()),
        }
    }
}
