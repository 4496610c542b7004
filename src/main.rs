//! baseband-config - Configuration utility for the baseband video board
//!
//! The board is reached over I2C through a USB adapter (FT232H or
//! MCP2221A). Every command opens the adapter, identifies the board by its
//! INFO block and then runs one operation on a device session.

mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match (cli.quiet, cli.verbose) {
        (true, _) => log::set_max_level(log::LevelFilter::Warn),
        (false, 0) => {} // default (info)
        (false, 1) => log::set_max_level(log::LevelFilter::Debug),
        (false, _) => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> commands::CmdResult {
    let file = config::load_config(cli.config.as_deref())?;
    let transport = file.transport(cli.transport.as_deref()).to_string();
    let mut session_config = file.session;

    // Commands that never open a session
    match &cli.command {
        Commands::ListTransports => {
            commands::list_transports();
            return Ok(());
        }
        Commands::ListDevices => {
            commands::list_devices();
            return Ok(());
        }
        Commands::PulseGpio {
            pin,
            duration_ms,
            active_high,
        } => {
            // The board is probably hung; do not try to identify it
            if let Some(ms) = duration_ms {
                session_config.gpio_pulse_ms = *ms;
            }
            return commands::cmd_pulse_gpio(&transport, session_config, *pin, *active_high);
        }
        Commands::Upgrade { no_verify, .. } if *no_verify => {
            session_config.verify_firmware = false;
        }
        _ => {}
    }

    let mut session = commands::connect(&transport, session_config)?;

    match cli.command {
        Commands::Info { presets } => commands::cmd_info(&mut session, presets),
        Commands::Get { paths } => commands::cmd_get(&mut session, &paths),
        Commands::Set { assignments } => commands::cmd_set(&mut session, &assignments),
        Commands::SettingsToFile { path } => commands::cmd_settings_to_file(&mut session, &path),
        Commands::SettingsFromFile { path } => {
            commands::cmd_settings_from_file(&mut session, &path)
        }
        Commands::Upgrade { path, .. } => commands::cmd_upgrade(&mut session, &path),
        Commands::DownloadFirmware { path } => {
            commands::cmd_download_firmware(&mut session, &path)
        }
        Commands::FlashId => commands::cmd_flash_id(&mut session),
        Commands::Reboot => commands::cmd_reboot(&mut session),
        Commands::StorePreset { index, name } => {
            commands::cmd_store_preset(&mut session, index, name.as_deref())
        }
        Commands::LoadPreset { index } => commands::cmd_load_preset(&mut session, index),
        Commands::ShowPresets => commands::cmd_show_presets(&mut session),
        Commands::ReadMeters { count, interval_ms } => {
            commands::cmd_read_meters(&mut session, count, Duration::from_millis(interval_ms))
        }
        Commands::DumpOsd => commands::cmd_dump_osd(&mut session),
        Commands::ListTransports | Commands::ListDevices | Commands::PulseGpio { .. } => Ok(()),
    }
}
