//! baseband-mcp2221 - MCP2221A I2C transport
//!
//! Drives the baseband's I2C bus from a Microchip MCP2221/MCP2221A
//! USB-to-I2C bridge. The HID command reports are exchanged on the raw
//! interrupt endpoints.
//!
//! # Options
//!
//! - `frequency`: I2C clock in Hz, 47000 to 400000 (default 100000)
//! - `serial`: open the adapter with this USB serial number
//! - `index`: pick the Nth matching adapter (default 0)
//! - `address`: 7-bit slave address of the board (default 0x58)
//! - `timeout`: per transfer timeout in ms (default 500)
//!
//! GP0 to GP3 can be pulsed; a pin that is not designated as GPIO is
//! switched over in SRAM first.

mod device;
mod error;
pub mod protocol;

pub use device::{parse_options, Mcp2221, Mcp2221Config, Mcp2221DeviceInfo};
pub use error::{Mcp2221Error, Result};
