//! Preset commands

use super::{print_settings, BoardSession, CmdResult};
use baseband_core::Settings;

/// Store the live settings in slot `index`, optionally renaming them first
pub fn cmd_store_preset(session: &mut BoardSession, index: u8, name: Option<&str>) -> CmdResult {
    if let Some(name) = name {
        let mut patch = Settings::new();
        patch.insert("name", name);
        session.write_settings(&patch)?;
    }
    session.store_preset(index)?;
    print_settings(&session.view_preset(index)?);
    println!("Settings stored to preset {}", index);
    Ok(())
}

/// Activate slot `index`
pub fn cmd_load_preset(session: &mut BoardSession, index: u8) -> CmdResult {
    session.load_preset(index)?;
    println!("Preset {} loaded", index);
    print_settings(&session.read_settings::<&str>(&[])?);
    Ok(())
}

/// Print every slot that holds data
pub fn cmd_show_presets(session: &mut BoardSession) -> CmdResult {
    let flags = session.preset_status()?;
    let used: Vec<u8> = flags.used().collect();
    if used.is_empty() {
        println!("No presets stored");
        return Ok(());
    }
    for index in used {
        println!("Preset {}:", index);
        print_settings(&session.view_preset(index)?);
        println!();
    }
    Ok(())
}
