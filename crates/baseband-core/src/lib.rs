//! baseband-core - Register map, settings codec and device session
//!
//! This crate holds everything that does not depend on a particular
//! USB-to-I2C adapter: the fixed register layout of the baseband board,
//! the codec between that layout and a named settings model, the flash
//! tunnel used for firmware upgrades and the [`Session`] that sequences
//! multi-step operations on top of a [`Transport`].
//!
//! # Example
//!
//! ```ignore
//! use baseband_core::{Session, SessionConfig, Settings};
//!
//! let mut session = Session::connect(transport, SessionConfig::default())?;
//! let mut patch = Settings::new();
//! patch.insert("video.video_level", 100);
//! session.write_settings(&patch)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod error;
pub mod flash;
pub mod layout;
pub mod progress;
pub mod protocol;
pub mod register;
pub mod session;
pub mod settings;
pub mod transport;

pub use codec::{decode, encode, RegisterImage};
pub use error::{Error, Result, TransportError, UpgradeFailure};
pub use progress::{FlashProgress, NoProgress};
pub use register::{Field, FieldKind, RegisterMap, Width};
pub use session::{DeviceInfo, PresetFlags, Session, SessionConfig, SessionState};
pub use settings::{Settings, Value};
pub use transport::{Transport, TransportFeatures};
