//! Configuration file loading
//!
//! ```toml
//! transport = "ftdi:frequency=100000"
//!
//! [session]
//! command_timeout_ms = 5000
//! gpio_pulse_ms = 6000
//! verify_firmware = true
//! ```

use baseband_core::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Transport used when neither the command line nor the file names one
pub const DEFAULT_TRANSPORT: &str = "ftdi";

/// Contents of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Default transport string
    pub transport: Option<String>,
    /// Session tuning
    pub session: SessionConfig,
}

impl FileConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Transport string, with `cli` taking precedence
    pub fn transport<'a>(&'a self, cli: Option<&'a str>) -> &'a str {
        cli.or(self.transport.as_deref())
            .unwrap_or(DEFAULT_TRANSPORT)
    }
}

/// Candidate locations, in lookup order
fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("baseband-config.toml")];
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")));
    if let Some(dir) = config_home {
        paths.push(dir.join("baseband-config").join("config.toml"));
    }
    paths
}

/// Load the configuration from `path`, or from the first default location that exists
pub fn load_config(path: Option<&Path>) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => {
            if !p.is_file() {
                return Err(format!("Configuration file not found: {}", p.display()).into());
            }
            p.to_path_buf()
        }
        None => match default_paths().into_iter().find(|p| p.is_file()) {
            Some(p) => p,
            None => {
                log::debug!("No configuration file, using defaults");
                return Ok(FileConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = FileConfig::parse(&content)
        .map_err(|e| format!("Invalid configuration {}: {}", path.display(), e))?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}
