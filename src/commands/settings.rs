//! Settings commands: get, set and the JSON document round trip

use super::{print_settings, BoardSession, CmdResult};
use baseband_core::Settings;
use std::fs;
use std::path::Path;

/// Print the named fields, or everything
pub fn cmd_get(session: &mut BoardSession, paths: &[String]) -> CmdResult {
    let settings = session.read_settings(paths)?;
    print_settings(&settings);
    Ok(())
}

/// Apply `key=value` assignments
pub fn cmd_set(session: &mut BoardSession, assignments: &[String]) -> CmdResult {
    let patch = assignments
        .iter()
        .map(|a| Settings::parse_assignment(a))
        .collect::<Result<Settings, _>>()?;

    session.write_settings(&patch)?;

    let paths: Vec<&str> = patch.iter().map(|(path, _)| path).collect();
    let readback = session.read_settings(&paths)?;
    println!("Settings written:");
    print_settings(&readback);
    Ok(())
}

/// Save the live settings as pretty-printed JSON
pub fn cmd_settings_to_file(session: &mut BoardSession, path: &Path) -> CmdResult {
    let settings = session.read_settings::<&str>(&[])?;
    print_settings(&settings);

    let json = serde_json::to_string_pretty(&settings.to_document())?;
    fs::write(path, json + "\n")?;
    println!(
        "Settings read from baseband and written to {}",
        path.display()
    );
    Ok(())
}

/// Write a JSON settings document, partial documents leave other fields alone
pub fn cmd_settings_from_file(session: &mut BoardSession, path: &Path) -> CmdResult {
    let content = fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid settings document {}: {}", path.display(), e))?;
    let settings = Settings::from_document(&doc)?;
    print_settings(&settings);

    session.write_settings(&settings)?;
    println!(
        "Settings read from {} and written to baseband",
        path.display()
    );
    Ok(())
}
