//! Error types for the FT232H transport

use baseband_core::TransportError;
use thiserror::Error;

/// Result type for FTDI operations
pub type Result<T> = std::result::Result<T, FtdiError>;

/// Errors that can occur while opening or configuring an FT232H
#[derive(Debug, Error)]
pub enum FtdiError {
    /// No matching device found
    #[error("No FT232H found{0}")]
    DeviceNotFound(String),

    /// Failed to open device
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// Failed to claim USB interface
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// Failed to configure device
    #[error("Failed to configure device: {0}")]
    ConfigFailed(String),

    /// The MPSSE engine did not echo the synchronisation opcode
    #[error("MPSSE did not synchronise: {0}")]
    SyncFailed(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// USB enumeration error
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),
}

impl From<FtdiError> for TransportError {
    fn from(e: FtdiError) -> Self {
        match e {
            FtdiError::InvalidParameter(s) => TransportError::InvalidParameter(s),
            FtdiError::DeviceNotFound(_) => TransportError::Disconnected,
            other => TransportError::Usb(other.to_string()),
        }
    }
}
