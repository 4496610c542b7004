//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the transport argument
fn transport_help() -> String {
    format!(
        "Transport to use as name[:key=value,...] [available: {}]",
        baseband_transport::transport_names_short()
    )
}

#[derive(Parser)]
#[command(name = "baseband-config")]
#[command(author, version, about = "Baseband configuration utility", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(short, long, global = true, help = transport_help())]
    pub transport: Option<String>,

    /// Configuration file
    /// Defaults to ./baseband-config.toml, then ~/.config/baseband-config/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show device identity and the live settings
    Info {
        /// Also list the preset slots
        #[arg(long)]
        presets: bool,
    },

    /// Print settings fields (all when no path is given)
    Get {
        /// Field paths or prefixes, e.g. fm.0.rf_frequency_khz or video
        paths: Vec<String>,
    },

    /// Change individual settings fields
    Set {
        /// Assignments such as fm.0.rf_frequency_khz=7020
        #[arg(required = true, value_name = "KEY=VALUE")]
        assignments: Vec<String>,
    },

    /// Save the live settings as a JSON document
    SettingsToFile {
        /// Output file path
        path: PathBuf,
    },

    /// Apply a (partial) JSON settings document
    SettingsFromFile {
        /// Input file path
        path: PathBuf,
    },

    /// Write a firmware image to the upgrade region
    Upgrade {
        /// Firmware image
        path: PathBuf,

        /// Skip reading the image back after writing
        #[arg(long)]
        no_verify: bool,
    },

    /// Read the upgrade region back to a file
    DownloadFirmware {
        /// Output file path
        path: PathBuf,
    },

    /// Show the flash identification bytes
    FlashId,

    /// Reboot the baseband
    Reboot,

    /// Store the live settings in a preset slot
    StorePreset {
        /// Preset slot (1-31)
        index: u8,

        /// Rename the live settings before storing
        #[arg(long)]
        name: Option<String>,
    },

    /// Make a preset the live settings
    LoadPreset {
        /// Preset slot (1-31)
        index: u8,
    },

    /// Show every used preset slot
    ShowPresets,

    /// Pulse an adapter GPIO, e.g. wired to the board's reset
    PulseGpio {
        /// GPIO number on the adapter
        pin: u8,

        /// Pulse length (default from the configuration, 6000 ms)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Drive the pin high instead of low while active
        #[arg(long)]
        active_high: bool,
    },

    /// Show the audio and video meters
    ReadMeters {
        /// Number of readings (0 = until interrupted)
        #[arg(long, default_value = "1")]
        count: u32,

        /// Pause between readings
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Print the on-screen display memory
    DumpOsd,

    /// List available transports
    ListTransports,

    /// List attached USB adapters
    ListDevices,
}
