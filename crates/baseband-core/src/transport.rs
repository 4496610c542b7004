//! Transport trait definitions
//!
//! A transport moves bytes between the host and the baseband's register
//! space. Every access is addressed by a 16-bit register address which the
//! transport sends big-endian in front of the payload, so the session never
//! deals with I2C framing.

use crate::error::TransportError;
use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Transport feature flags
    ///
    /// These flags indicate what an adapter can do. The session uses them
    /// to size transfers and to decide how to recover a hung bus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransportFeatures: u32 {
        /// The adapter honours slave clock stretching
        const CLOCK_STRETCHING = 1 << 0;
        /// Reads use a repeated start instead of STOP + START
        const REPEATED_START   = 1 << 1;
        /// The adapter can pulse a GPIO line
        const GPIO             = 1 << 2;
        /// The adapter can clock the bus free after an aborted transfer
        const BUS_RECOVERY     = 1 << 3;
    }
}

impl Default for TransportFeatures {
    fn default() -> Self {
        TransportFeatures::empty()
    }
}

/// Register transport over an I2C link
///
/// Implementations must either complete a `write` fully or fail with a
/// [`TransportError`]; a `read` fills the whole buffer or fails.
///
/// ## Example
///
/// ```ignore
/// impl Transport for Ft232h {
///     fn features(&self) -> TransportFeatures {
///         TransportFeatures::GPIO | TransportFeatures::BUS_RECOVERY
///     }
///
///     fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
///         self.i2c_write(&[&address.to_be_bytes()[..], data])
///     }
///     // ...
/// }
/// ```
pub trait Transport {
    /// Short adapter name for log messages
    fn name(&self) -> &str;

    /// Supported features
    fn features(&self) -> TransportFeatures;

    /// Largest payload a single `write` or `read` may carry
    fn max_transfer_len(&self) -> usize {
        usize::MAX
    }

    /// Write `data` starting at register `address`
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError>;

    /// Write the register address plus `data`, then read `buf.len()` bytes
    ///
    /// Used by the flash tunnel, where the bytes following the address are
    /// SPI opcodes rather than register contents.
    fn write_read(
        &mut self,
        address: u16,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Read `buf.len()` bytes starting at register `address`
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.write_read(address, &[], buf)
    }

    /// Drive a GPIO pin to its active level for `duration`, then back to the
    /// inactive level; the pin stays an output
    fn pulse_gpio(
        &mut self,
        pin: u8,
        active_low: bool,
        duration: Duration,
    ) -> Result<(), TransportError> {
        let _ = (pin, active_low, duration);
        Err(TransportError::Unsupported("GPIO pulse"))
    }

    /// Try to return SDA and SCL to idle after an aborted transfer
    fn recover_bus(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn features(&self) -> TransportFeatures {
        (**self).features()
    }

    fn max_transfer_len(&self) -> usize {
        (**self).max_transfer_len()
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(address, data)
    }

    fn write_read(
        &mut self,
        address: u16,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        (**self).write_read(address, data, buf)
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(address, buf)
    }

    fn pulse_gpio(
        &mut self,
        pin: u8,
        active_low: bool,
        duration: Duration,
    ) -> Result<(), TransportError> {
        (**self).pulse_gpio(pin, active_low, duration)
    }

    fn recover_bus(&mut self) -> Result<(), TransportError> {
        (**self).recover_bus()
    }
}
