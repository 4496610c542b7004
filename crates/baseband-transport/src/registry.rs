//! Transport registration and dispatch
//!
//! Every backend compiled in through a cargo feature is listed here, and
//! [`open_transport`] turns a transport string such as
//! `ftdi:frequency=100000,serial=FT1234` into a boxed [`Transport`].

use std::error::Error;

use baseband_core::Transport;

/// Information about a transport backend
#[derive(Debug, Clone, Copy)]
pub struct TransportInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description including the accepted options
    pub description: &'static str,
}

impl TransportInfo {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

/// All transports enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_transports() -> Vec<TransportInfo> {
    let mut transports = Vec::new();

    #[cfg(feature = "dummy")]
    transports.push(TransportInfo {
        name: "dummy",
        aliases: &["emulator"],
        description: "In-memory baseband emulator (present=<on|off>,max_transfer=<N>,busy_polls=<N>)",
    });

    #[cfg(feature = "ftdi")]
    transports.push(TransportInfo {
        name: "ftdi",
        aliases: &["ft232h"],
        description: "FTDI FT232H MPSSE (frequency=<Hz>,clock_stretching=<on|off>,serial=<sn>,index=<N>)",
    });

    #[cfg(feature = "mcp2221")]
    transports.push(TransportInfo {
        name: "mcp2221",
        aliases: &["mcp2221a"],
        description: "Microchip MCP2221A (frequency=<Hz>,serial=<sn>,index=<N>)",
    });

    transports
}

/// Help text listing all available transports
pub fn transport_help() -> String {
    let transports = available_transports();

    if transports.is_empty() {
        return "No transports available (recompile with transport features enabled)".to_string();
    }

    let mut help = String::from("Available transports:\n");
    for t in &transports {
        help.push_str(&format!("  {:10} - {}\n", t.name, t.description));
    }
    help
}

/// Comma separated transport names for CLI help
pub fn transport_names_short() -> String {
    available_transports()
        .iter()
        .map(|t| t.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Canonical name of the transport matching `name`
pub fn find_transport(name: &str) -> Option<&'static str> {
    available_transports()
        .into_iter()
        .find(|t| t.matches(name))
        .map(|t| t.name)
}

/// Split a transport string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_transport_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    match s.split_once(':') {
        Some((name, opts)) => {
            let options = opts
                .split(',')
                .filter(|opt| !opt.is_empty())
                .filter_map(|opt| {
                    let pair = opt.split_once('=');
                    if pair.is_none() {
                        log::warn!("Ignoring transport option without a value: {}", opt);
                    }
                    pair
                })
                .map(|(k, v)| (k.trim(), v.trim()))
                .collect();
            (name, options)
        }
        None => (s, Vec::new()),
    }
}

/// Open the transport described by `spec`
#[allow(unused_variables)]
pub fn open_transport(spec: &str) -> Result<Box<dyn Transport>, Box<dyn Error>> {
    let (name, options) = parse_transport_string(spec);
    let canonical = find_transport(name).ok_or_else(|| unknown_transport_error(name))?;

    match canonical {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = parse_dummy_options(&options)?;
            log::info!("Using the baseband emulator");
            Ok(Box::new(baseband_dummy::DummyBaseband::new(config)))
        }

        #[cfg(feature = "ftdi")]
        "ftdi" => {
            use baseband_ftdi::{parse_options, Ft232h};

            let config =
                parse_options(&options).map_err(|e| format!("Invalid FTDI parameters: {}", e))?;
            log::info!("Opening FT232H...");
            let transport = Ft232h::open(&config).map_err(|e| {
                format!(
                    "Failed to open FT232H: {}\n\
                     Make sure the adapter is connected and you have permissions.\n\
                     You may need to unbind the kernel ftdi_sio driver:\n\
                     echo -n '<bus>-<port>:1.0' | sudo tee /sys/bus/usb/drivers/ftdi_sio/unbind",
                    e
                )
            })?;
            Ok(Box::new(transport))
        }

        #[cfg(feature = "mcp2221")]
        "mcp2221" => {
            use baseband_mcp2221::{parse_options, Mcp2221};

            let config = parse_options(&options)
                .map_err(|e| format!("Invalid MCP2221 parameters: {}", e))?;
            log::info!("Opening MCP2221...");
            let transport = Mcp2221::open(&config).map_err(|e| {
                format!(
                    "Failed to open MCP2221: {}\n\
                     Make sure the adapter is connected and you have permissions.",
                    e
                )
            })?;
            Ok(Box::new(transport))
        }

        _ => Err(unknown_transport_error(name)),
    }
}

/// Describe every attached adapter of every enabled USB backend
#[allow(unused_mut)]
pub fn list_devices() -> Vec<String> {
    let mut devices = Vec::new();

    #[cfg(feature = "ftdi")]
    match baseband_ftdi::Ft232h::list_devices() {
        Ok(found) => devices.extend(found.iter().map(|d| format!("ftdi: {}", d))),
        Err(e) => log::warn!("Could not enumerate FT232H adapters: {}", e),
    }

    #[cfg(feature = "mcp2221")]
    match baseband_mcp2221::Mcp2221::list_devices() {
        Ok(found) => devices.extend(found.iter().map(|d| format!("mcp2221: {}", d))),
        Err(e) => log::warn!("Could not enumerate MCP2221 adapters: {}", e),
    }

    devices
}

#[cfg(feature = "dummy")]
fn parse_dummy_options(
    options: &[(&str, &str)],
) -> Result<baseband_dummy::DummyConfig, Box<dyn Error>> {
    let mut config = baseband_dummy::DummyConfig::default();
    for (key, value) in options {
        match *key {
            "present" => {
                config.present = match *value {
                    "1" | "on" | "yes" | "true" => true,
                    "0" | "off" | "no" | "false" => false,
                    _ => return Err(format!("Invalid value '{}' for present", value).into()),
                }
            }
            "max_transfer" => {
                config.max_transfer_len = value
                    .parse()
                    .ok()
                    .filter(|&n: &usize| n > 0)
                    .ok_or_else(|| format!("Invalid max_transfer '{}'", value))?;
            }
            "busy_polls" => {
                let polls = value
                    .parse()
                    .map_err(|_| format!("Invalid busy_polls '{}'", value))?;
                config.command_busy_polls = polls;
                config.flash_busy_polls = polls;
            }
            _ => log::warn!("Unknown dummy option: {}={}", key, value),
        }
    }
    Ok(config)
}

fn unknown_transport_error(name: &str) -> Box<dyn Error> {
    let mut msg = format!("Unknown transport: {}\n\n", name);
    msg.push_str(&transport_help());
    msg.push_str("\nUse 'baseband-config list-transports' for more details");
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_string() {
        assert_eq!(parse_transport_string("dummy"), ("dummy", vec![]));
        let (name, options) = parse_transport_string("ftdi:frequency=100000, serial=FT1234,bogus");
        assert_eq!(name, "ftdi");
        assert_eq!(options, vec![("frequency", "100000"), ("serial", "FT1234")]);
        assert_eq!(parse_transport_string("mcp2221:"), ("mcp2221", vec![]));
    }

    #[test]
    fn test_unknown_transport() {
        let err = open_transport("bitbang:pins=4").err().unwrap();
        assert!(err.to_string().starts_with("Unknown transport: bitbang"));
        assert!(find_transport("bitbang").is_none());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_open_dummy() {
        assert_eq!(find_transport("emulator"), Some("dummy"));
        assert!(transport_names_short().contains("dummy"));

        let transport = open_transport("dummy:max_transfer=32").unwrap();
        assert_eq!(transport.name(), "dummy");
        assert_eq!(transport.max_transfer_len(), 32);

        assert!(open_transport("dummy:present=maybe").is_err());
        assert!(open_transport("dummy:max_transfer=0").is_err());
    }
}
