//! Device control and monitoring commands

use super::{print_settings, BoardSession, CmdResult};
use baseband_core::protocol::OSD_COLUMNS;
use baseband_core::{Session, SessionConfig};
use std::thread;
use std::time::Duration;

/// Reboot the board
pub fn cmd_reboot(session: &mut BoardSession) -> CmdResult {
    session.reboot()?;
    println!("Baseband rebooting");
    Ok(())
}

/// Show the flash identification bytes
pub fn cmd_flash_id(session: &mut BoardSession) -> CmdResult {
    let id = session.flash_id()?;
    println!(
        "Flash ID: manufacturer 0x{:02X}, type 0x{:02X}, capacity 0x{:02X}",
        id[0], id[1], id[2]
    );
    Ok(())
}

/// Pulse an adapter GPIO without talking to the board
pub fn cmd_pulse_gpio(spec: &str, config: SessionConfig, pin: u8, active_high: bool) -> CmdResult {
    let transport = baseband_transport::open_transport(spec)?;
    let duration = config.gpio_pulse();
    let mut session = Session::new(transport, config);
    println!("Pulse GPIO pin {} for {:?}", pin, duration);
    session.pulse_gpio(pin, !active_high)?;
    Ok(())
}

/// Print the meters `count` times (forever when 0)
pub fn cmd_read_meters(session: &mut BoardSession, count: u32, interval: Duration) -> CmdResult {
    let mut reading = 0u32;
    loop {
        let actuals = session.read_actuals()?;
        println!("Actuals:");
        print_settings(&actuals);

        reading += 1;
        if count != 0 && reading >= count {
            return Ok(());
        }
        thread::sleep(interval);
    }
}

/// Render OSD memory as rows of hex plus printable characters
pub(crate) fn format_osd(osd: &[u8]) -> Vec<String> {
    osd.chunks(OSD_COLUMNS)
        .enumerate()
        .map(|(row, bytes)| {
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            let text: String = bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{:2}: {} |{}|", row, hex.join(" "), text)
        })
        .collect()
}

/// Print the OSD display memory
pub fn cmd_dump_osd(session: &mut BoardSession) -> CmdResult {
    let osd = session.read_osd()?;
    for line in format_osd(&osd) {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseband_core::protocol::{OSD_ROWS, OSD_SIZE};

    #[test]
    fn osd_rows_show_hex_and_text() {
        let mut osd = vec![0u8; OSD_SIZE];
        osd[..5].copy_from_slice(b"PAL B");
        osd[OSD_COLUMNS] = 0x7F;

        let lines = format_osd(&osd);
        assert_eq!(lines.len(), OSD_ROWS);
        assert!(lines[0].starts_with(" 0: 50 41 4C 20 42 00"));
        assert!(lines[0].ends_with("|PAL B...................................|"));
        assert!(lines[1].starts_with(" 1: 7F 00"));
        assert!(lines[1].contains("|........"));
    }
}
