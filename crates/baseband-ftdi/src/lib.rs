//! baseband-ftdi - FT232H I2C transport
//!
//! Drives the baseband's I2C bus from an FTDI FT232H through the MPSSE
//! engine, talking to the chip over raw USB bulk transfers.
//!
//! # Options
//!
//! | Option             | Default | Meaning                                  |
//! |--------------------|---------|------------------------------------------|
//! | `frequency`        | 50000   | I2C clock in Hz                          |
//! | `clock_stretching` | on      | Adaptive clocking via AD7 (RTCK)         |
//! | `latency`          | 4       | USB latency timer in ms                  |
//! | `serial`           |         | Open the adapter with this serial        |
//! | `description`      |         | Open the adapter with this product name  |
//! | `index`            | 0       | Pick the Nth matching adapter            |
//! | `address`          | 0x58    | 7-bit slave address of the board         |
//! | `timeout`          | 1000    | USB transfer timeout in ms               |
//!
//! GPIO pulses are available on AD3 through AD6.
//!
//! # Example
//!
//! ```no_run
//! use baseband_core::{Session, SessionConfig};
//! use baseband_ftdi::{parse_options, Ft232h};
//!
//! let config = parse_options(&[("frequency", "100000")])?;
//! let ft = Ft232h::open(&config)?;
//! let session = Session::connect(ft, SessionConfig::default())?;
//! println!("{}", session.info().unwrap());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod device;
mod error;
pub mod protocol;

pub use device::{parse_options, Ft232h, FtdiConfig, FtdiDeviceInfo};
pub use error::{FtdiError, Result};
