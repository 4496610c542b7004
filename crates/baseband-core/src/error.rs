//! Error types for baseband-core

use std::fmt;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`Transport`](crate::Transport) implementation
///
/// A failed transfer may leave SDA or SCL held low on some adapters; the
/// session treats any transient error as a possible bus fault and attempts
/// a bus recovery before the next transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The slave did not acknowledge its address or a data byte
    #[error("no acknowledge from I2C slave at register 0x{address:04X}")]
    Nack {
        /// Register address of the failed access
        address: u16,
    },
    /// The adapter did not complete the transaction in time
    #[error("I2C transaction timed out")]
    Timeout,
    /// USB level failure
    #[error("USB transfer failed: {0}")]
    Usb(String),
    /// SDA or SCL is held low and could not be released
    #[error("I2C bus is stuck (SDA/SCL held low)")]
    BusStuck,
    /// The adapter returned fewer bytes than requested
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Requested byte count
        expected: usize,
        /// Received byte count
        got: usize,
    },
    /// A parameter is out of range for this adapter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The adapter cannot perform this operation
    #[error("operation not supported by this adapter: {0}")]
    Unsupported(&'static str),
    /// The adapter has gone away
    #[error("adapter disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether the error is worth one retry after a bus recovery
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Nack { .. }
                | TransportError::Timeout
                | TransportError::Usb(_)
                | TransportError::BusStuck
                | TransportError::ShortRead { .. }
        )
    }
}

/// Reason a firmware chunk was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeFailure {
    /// Write enable latch did not set after WREN
    WriteEnableRejected,
    /// Write-in-progress never cleared
    Timeout,
    /// Programming finished but the write enable latch is still set
    NotAcknowledged,
    /// Read-back differs from the image
    VerifyMismatch,
}

impl fmt::Display for UpgradeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeFailure::WriteEnableRejected => write!(f, "write enable rejected"),
            UpgradeFailure::Timeout => write!(f, "flash busy timeout"),
            UpgradeFailure::NotAcknowledged => write!(f, "chunk not acknowledged"),
            UpgradeFailure::VerifyMismatch => write!(f, "verify mismatch"),
        }
    }
}

/// Top-level error for codec and session operations
#[derive(Debug, Error)]
pub enum Error {
    /// Bus or USB failure
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The identity check on connect failed
    #[error("baseband device not found: {0}")]
    DeviceNotFound(String),
    /// A settings path that does not exist in the register map
    #[error("unknown settings field '{0}'")]
    UnknownField(String),
    /// A value outside the domain of its field
    #[error("invalid value '{value}' for {field}: {reason}")]
    Validation {
        /// Field path or parameter name
        field: String,
        /// Offending value, as given
        value: String,
        /// What the domain is
        reason: String,
    },
    /// A firmware chunk was not acknowledged; the upgrade was aborted
    #[error("firmware upgrade aborted at flash address 0x{address:06X}: {failure}")]
    FirmwareUpgrade {
        /// Flash address of the failed chunk
        address: u32,
        /// What went wrong
        failure: UpgradeFailure,
    },
    /// The device did not finish a command within the configured time
    #[error("device did not complete command 0x{command:02X}")]
    CommandTimeout {
        /// Command code
        command: u8,
    },
    /// An operation needs a connected device
    #[error("not connected to a baseband device")]
    NotConnected,
    /// The bus is faulted and recovery failed
    #[error("session is faulted; bus recovery failed")]
    Faulted,
    /// Malformed settings document
    #[error("settings document: {0}")]
    Document(String),
}

impl Error {
    pub(crate) fn validation(
        field: impl Into<String>,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Error::Validation {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Nack { address: 0x1000 }.is_transient());
        assert!(TransportError::BusStuck.is_transient());
        assert!(!TransportError::Unsupported("gpio").is_transient());
        assert!(!TransportError::Disconnected.is_transient());
    }

    #[test]
    fn messages_name_the_field() {
        let e = Error::validation("video.video_mode", "XYZ", "expected one of FLAT, PAL");
        let msg = e.to_string();
        assert!(msg.contains("video.video_mode"));
        assert!(msg.contains("XYZ"));

        let e = Error::FirmwareUpgrade {
            address: 0x080100,
            failure: UpgradeFailure::NotAcknowledged,
        };
        assert_eq!(
            e.to_string(),
            "firmware upgrade aborted at flash address 0x080100: chunk not acknowledged"
        );
    }
}
