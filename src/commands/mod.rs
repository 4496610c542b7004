//! CLI command implementations
//!
//! Every command that talks to the board runs on a [`BoardSession`], a
//! device session over whichever transport the command line selected.
//! `pulse-gpio` is the exception: it only needs the adapter, because its
//! purpose is to reset a board that is not answering.

mod device;
mod firmware;
mod info;
mod list;
mod preset;
mod settings;

pub use device::{cmd_dump_osd, cmd_flash_id, cmd_pulse_gpio, cmd_read_meters, cmd_reboot};
pub use firmware::{cmd_download_firmware, cmd_upgrade};
pub use info::cmd_info;
pub use list::{list_devices, list_transports};
pub use preset::{cmd_load_preset, cmd_show_presets, cmd_store_preset};
pub use settings::{cmd_get, cmd_set, cmd_settings_from_file, cmd_settings_to_file};

use baseband_core::{Session, SessionConfig, Settings, Transport};

/// Result type shared by the command handlers
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Device session over a transport chosen at runtime
pub type BoardSession = Session<Box<dyn Transport>>;

/// Open the transport and identify the board
pub fn connect(spec: &str, config: SessionConfig) -> Result<BoardSession, Box<dyn std::error::Error>> {
    let transport = baseband_transport::open_transport(spec)?;
    let session = Session::connect(transport, config)?;
    if let Some(info) = session.info() {
        println!("Baseband connected: {}", info);
    }
    Ok(session)
}

/// Print settings one field per line
pub(crate) fn print_settings(settings: &Settings) {
    let width = settings.iter().map(|(path, _)| path.len()).max().unwrap_or(0);
    for (path, value) in settings.iter() {
        println!("  {:width$} = {}", path, value, width = width);
    }
}
