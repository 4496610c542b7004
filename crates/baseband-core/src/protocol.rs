//! Baseband register windows and command codes
//!
//! All register addresses are 16 bits and sent big-endian ahead of the
//! payload. The high nibble selects a window; the remaining bits are the
//! offset within it.

/// Default 7-bit I2C slave address (0xB0 in 8-bit notation)
pub const DEFAULT_SLAVE_ADDRESS: u8 = 0xB0 >> 1;

// ============================================================================
// Register windows
// ============================================================================

/// OSD display memory, 40 columns x 16 rows
pub const REG_DISPLAY: u16 = 0x0000;
/// OSD font memory, 128 glyphs of 8x16 pixels
pub const REG_FONT: u16 = 0x0800;
/// Live settings
pub const REG_SETTINGS: u16 = 0x1000;
/// Read-only hardware meters
pub const REG_ACTUALS: u16 = 0x2000;
/// Command register; reads return status, 0 = done. No auto-increment.
pub const REG_COMMAND: u16 = 0x3000;
/// Settings preview, filled by [`CMD_VIEW_PRESET`]
pub const REG_PREVIEW: u16 = 0x4000;
/// Preset usage flags, 32 bits little-endian
pub const REG_PRESET_FLAGS: u16 = 0x5000;
/// Hardware and software versions
pub const REG_INFO: u16 = 0x6000;
/// Flash SPI tunnel; the low bits carry the SPI byte count
pub const REG_FLASH: u16 = 0x7000;

/// OSD columns
pub const OSD_COLUMNS: usize = 40;
/// OSD rows
pub const OSD_ROWS: usize = 16;
/// OSD display memory size
pub const OSD_SIZE: usize = OSD_COLUMNS * OSD_ROWS;
/// OSD font memory size
pub const FONT_SIZE: usize = 2048;

// ============================================================================
// Commands
// ============================================================================

/// Activate the settings block. Parameter 1.
pub const CMD_UPDATE_SETTINGS: u8 = 0x00;
/// Load preset N into the live settings and activate it
pub const CMD_LOAD_PRESET: u8 = 0x01;
/// Store the live settings in preset N
pub const CMD_STORE_PRESET: u8 = 0x02;
/// Erase preset N. Never issued by this crate.
pub const CMD_ERASE_PRESET: u8 = 0x03;
/// Copy preset N into the preview window
pub const CMD_VIEW_PRESET: u8 = 0x04;
/// Reboot the board after 500 ms. Parameter 1.
pub const CMD_REBOOT: u8 = 0x05;

/// Number of preset slots, including slot 0 (the power-on settings)
pub const PRESET_COUNT: u8 = 32;
/// Lowest preset that can be loaded or stored
pub const PRESET_FIRST_WRITABLE: u8 = 1;
/// Highest preset index
pub const PRESET_LAST: u8 = PRESET_COUNT - 1;

/// Register address used to issue `command`
pub const fn command_address(command: u8) -> u16 {
    REG_COMMAND | command as u16
}

/// Human readable command name for logs
pub fn command_name(command: u8) -> &'static str {
    match command {
        CMD_UPDATE_SETTINGS => "UPDATE_SETTINGS",
        CMD_LOAD_PRESET => "LOAD_PRESET",
        CMD_STORE_PRESET => "STORE_PRESET",
        CMD_ERASE_PRESET => "ERASE_PRESET",
        CMD_VIEW_PRESET => "VIEW_PRESET",
        CMD_REBOOT => "REBOOT",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_address() {
        assert_eq!(DEFAULT_SLAVE_ADDRESS, 0x58);
    }

    #[test]
    fn command_addresses() {
        assert_eq!(command_address(CMD_UPDATE_SETTINGS), 0x3000);
        assert_eq!(command_address(CMD_STORE_PRESET), 0x3002);
        assert_eq!(command_address(CMD_REBOOT), 0x3005);
        assert_eq!(command_name(CMD_VIEW_PRESET), "VIEW_PRESET");
    }
}
