//! baseband-transport - Transport registry
//!
//! Collects the adapter backends enabled through cargo features behind a
//! single entry point:
//!
//! ```no_run
//! let transport = baseband_transport::open_transport("ftdi:frequency=100000")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Features: `dummy`, `ftdi`, `mcp2221`.

mod registry;

pub use registry::{
    available_transports, find_transport, list_devices, open_transport, parse_transport_string,
    transport_help, transport_names_short, TransportInfo,
};
