//! Info command implementation

use super::{print_settings, BoardSession, CmdResult};
use baseband_core::protocol::PRESET_COUNT;

/// Show identity, live settings and optionally the preset slots
pub fn cmd_info(session: &mut BoardSession, presets: bool) -> CmdResult {
    if let Some(info) = session.info() {
        println!("Hardware version:   {}", info.hw_version);
        println!("FPGA version:       {}", info.fpga_version);
        println!(
            "Software version:   {}{}",
            info.sw_version(),
            if info.is_bootloader() {
                " (bootloader, no image!)"
            } else {
                ""
            }
        );
    }

    println!();
    println!("Live settings:");
    let settings = session.read_settings::<&str>(&[])?;
    print_settings(&settings);

    if presets {
        println!();
        println!("Preset status (preset 0 holds the power-on settings):");
        let flags = session.preset_status()?;
        for i in 0..PRESET_COUNT {
            let label = if flags.is_used(i) {
                let preset = session.view_preset(i)?;
                preset
                    .get("name")
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            } else {
                "Empty".to_string()
            };
            let end = if (i + 1) % 4 == 0 { "\n" } else { "" };
            print!("Preset {:2}: {:14}{}", i, label, end);
        }
    }

    Ok(())
}
