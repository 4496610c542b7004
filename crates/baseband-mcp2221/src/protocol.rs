//! MCP2221A HID command reports
//!
//! Every command is a 64-byte output report answered by a 64-byte input
//! report whose first byte echoes the command code.

/// Microchip vendor ID
pub const MCP2221_VID: u16 = 0x04D8;
/// MCP2221 / MCP2221A product ID
pub const MCP2221_PID: u16 = 0x00DD;

/// HID class code
pub const USB_CLASS_HID: u8 = 0x03;

/// Size of every report in both directions
pub const REPORT_SIZE: usize = 64;
/// Payload bytes that fit in one I2C write report
pub const MAX_CHUNK: usize = 60;

// Commands
/// Status / set parameters
pub const CMD_STATUS: u8 = 0x10;
/// Fetch bytes collected by a previous read command
pub const CMD_GET_DATA: u8 = 0x40;
/// Set GPIO output values and directions
pub const CMD_SET_GPIO: u8 = 0x50;
/// Set SRAM settings
pub const CMD_SET_SRAM: u8 = 0x60;
/// Get SRAM settings
pub const CMD_GET_SRAM: u8 = 0x61;
/// I2C write with START and STOP
pub const CMD_WRITE: u8 = 0x90;
/// I2C read with START and STOP
pub const CMD_READ: u8 = 0x91;
/// I2C read beginning with a repeated START
pub const CMD_READ_REPEATED: u8 = 0x93;
/// I2C write without a trailing STOP
pub const CMD_WRITE_NO_STOP: u8 = 0x94;

// Status command sub-functions
const STATUS_CANCEL: u8 = 0x10;
const STATUS_SET_SPEED: u8 = 0x20;

/// Generic success in byte 1 of a response
pub const RESPONSE_OK: u8 = 0x00;
/// Byte 1 of a get-data response while the read has not finished
pub const GET_DATA_PENDING: u8 = 0x41;
/// Byte 3 of a get-data response when the read failed
pub const READ_ERROR: u8 = 0x7F;

/// I2C engine idle
pub const STATE_IDLE: u8 = 0x00;
/// Write finished and the bus is held for a repeated START
pub const STATE_WRITE_NO_STOP: u8 = 0x45;

/// Internal clock the I2C divider runs from
const I2C_CLOCK_HZ: u32 = 12_000_000;
/// Fastest supported bus clock
pub const MAX_FREQUENCY: u32 = 400_000;
/// Default bus clock
pub const DEFAULT_FREQUENCY: u32 = 100_000;

/// GP pins usable for a reset pulse
pub const GPIO_PINS: std::ops::RangeInclusive<u8> = 0..=3;

/// GP designation bits in an SRAM pin setting
const GP_DESIGNATION_MASK: u8 = 0x07;
/// GP designation: general purpose I/O
const GP_DESIGNATION_GPIO: u8 = 0x00;
/// GP direction bit in an SRAM pin setting (set = input)
const GP_DIRECTION_INPUT: u8 = 0x08;
/// First GP setting byte in a get-SRAM response
const SRAM_GP_OFFSET: usize = 22;

/// A 64-byte report
pub type Report = [u8; REPORT_SIZE];

/// Divider value for `frequency`, or `None` if the chip cannot run that clock
pub fn speed_divider(frequency: u32) -> Option<u8> {
    if frequency == 0 || frequency > MAX_FREQUENCY {
        return None;
    }
    (I2C_CLOCK_HZ / frequency)
        .checked_sub(2)
        .and_then(|d| u8::try_from(d).ok())
}

/// Status report, optionally cancelling the current transfer or setting the clock
pub fn status_report(cancel: bool, divider: Option<u8>) -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_STATUS;
    if cancel {
        report[2] = STATUS_CANCEL;
    }
    if let Some(divider) = divider {
        report[3] = STATUS_SET_SPEED;
        report[4] = divider;
    }
    report
}

/// One chunk of an I2C write of `total` bytes to 7-bit `slave`
pub fn write_report(command: u8, slave: u8, total: u16, chunk: &[u8]) -> Report {
    debug_assert!(chunk.len() <= MAX_CHUNK);
    let mut report = [0u8; REPORT_SIZE];
    report[0] = command;
    report[1..3].copy_from_slice(&total.to_le_bytes());
    report[3] = slave << 1;
    report[4..4 + chunk.len()].copy_from_slice(chunk);
    report
}

/// I2C read of `len` bytes from 7-bit `slave`
pub fn read_report(command: u8, slave: u8, len: u16) -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = command;
    report[1..3].copy_from_slice(&len.to_le_bytes());
    report[3] = (slave << 1) | 1;
    report
}

/// Request for the data gathered by a read command
pub fn get_data_report() -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_GET_DATA;
    report
}

/// Make GP `pin` an output at `high`
pub fn gpio_report(pin: u8, high: bool) -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_SET_GPIO;
    let base = 2 + 4 * pin as usize;
    report[base] = 1;
    report[base + 1] = high as u8;
    report[base + 2] = 1;
    report[base + 3] = 0;
    report
}

/// Request for the current SRAM settings
pub fn get_sram_report() -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_GET_SRAM;
    report
}

/// GP pin settings from a get-SRAM response
pub fn gp_settings(response: &Report) -> [u8; 4] {
    let mut gp = [0u8; 4];
    gp.copy_from_slice(&response[SRAM_GP_OFFSET..SRAM_GP_OFFSET + 4]);
    gp
}

/// Whether `pin` is designated as GPIO in `gp`
pub fn is_gpio(gp: &[u8; 4], pin: u8) -> bool {
    gp[pin as usize] & GP_DESIGNATION_MASK == GP_DESIGNATION_GPIO
}

/// Set-SRAM report that turns `pin` into a GPIO input and keeps the other pins
pub fn designate_gpio_report(mut gp: [u8; 4], pin: u8) -> Report {
    gp[pin as usize] = GP_DESIGNATION_GPIO | GP_DIRECTION_INPUT;
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_SET_SRAM;
    report[7] = 0x80;
    report[8..12].copy_from_slice(&gp);
    report
}

/// Decoded status response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// I2C engine state
    pub state: u8,
    /// The slave did not acknowledge its address
    pub address_nack: bool,
    /// A clock change was requested and accepted
    pub speed_accepted: bool,
    /// SCL line level
    pub scl: bool,
    /// SDA line level
    pub sda: bool,
}

impl Status {
    /// Decode a status response
    pub fn parse(response: &Report) -> Self {
        Status {
            state: response[8],
            address_nack: response[20] & 0x40 != 0,
            speed_accepted: response[3] == STATUS_SET_SPEED,
            scl: response[22] != 0,
            sda: response[23] != 0,
        }
    }

    /// Both lines released
    pub fn bus_idle(&self) -> bool {
        self.scl && self.sda
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_divider() {
        assert_eq!(speed_divider(100_000), Some(118));
        assert_eq!(speed_divider(400_000), Some(28));
        assert_eq!(speed_divider(47_000), Some(253));
        assert_eq!(speed_divider(10_000), None);
        assert_eq!(speed_divider(1_000_000), None);
        assert_eq!(speed_divider(0), None);
    }

    #[test]
    fn test_write_report_layout() {
        let r = write_report(CMD_WRITE, 0x58, 300, &[0x10, 0x00, 0xAB]);
        assert_eq!(&r[..7], &[0x90, 0x2C, 0x01, 0xB0, 0x10, 0x00, 0xAB]);
        assert!(r[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_report_layout() {
        let r = read_report(CMD_READ_REPEATED, 0x58, 67);
        assert_eq!(&r[..4], &[0x93, 67, 0, 0xB1]);
    }

    #[test]
    fn test_status_report() {
        let r = status_report(true, speed_divider(100_000));
        assert_eq!(&r[..5], &[0x10, 0x00, 0x10, 0x20, 118]);
        let r = status_report(false, None);
        assert_eq!(&r[..5], &[0x10, 0, 0, 0, 0]);
    }

    #[test]
    fn test_gpio_report() {
        let r = gpio_report(2, false);
        assert_eq!(&r[10..14], &[1, 0, 1, 0]);
        assert!(r[2..10].iter().all(|&b| b == 0));
        // back high, still an output
        let r = gpio_report(0, true);
        assert_eq!(&r[2..6], &[1, 1, 1, 0]);
    }

    #[test]
    fn test_gpio_designation() {
        let mut response = [0u8; REPORT_SIZE];
        response[0] = CMD_GET_SRAM;
        response[22..26].copy_from_slice(&[0x01, 0x08, 0x12, 0x02]);
        let gp = gp_settings(&response);
        assert!(!is_gpio(&gp, 0));
        assert!(is_gpio(&gp, 1));
        assert!(!is_gpio(&gp, 3));

        let r = designate_gpio_report(gp, 3);
        assert_eq!(r[0], CMD_SET_SRAM);
        assert_eq!(r[7], 0x80);
        assert_eq!(&r[8..12], &[0x01, 0x08, 0x12, 0x08]);
    }

    #[test]
    fn test_status_parse() {
        let mut response = [0u8; REPORT_SIZE];
        response[0] = CMD_STATUS;
        response[3] = 0x20;
        response[8] = STATE_WRITE_NO_STOP;
        response[20] = 0x40;
        response[22] = 1;
        let status = Status::parse(&response);
        assert_eq!(status.state, STATE_WRITE_NO_STOP);
        assert!(status.address_nack);
        assert!(status.speed_accepted);
        assert!(status.scl);
        assert!(!status.bus_idle());
    }
}
