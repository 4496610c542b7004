//! FT232H USB requests, MPSSE opcodes and I2C command building
//!
//! The I2C waveform is produced by the MPSSE engine in three-phase clocking
//! mode with open-drain emulation ("drive zero only") on SCL and SDA.
//!
//! Pin assignment (low byte):
//!
//! ```text
//! AD0  SCL
//! AD1  SDA out     (wire AD1 and AD2 together)
//! AD2  SDA in
//! AD3..AD6  GPIO, usable for reset pulses
//! AD7  RTCK, wired to SCL for clock stretching
//! ```

// ============================================================================
// USB
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT232H product ID
pub const FTDI_FT232H_PID: u16 = 0x6014;

/// Reset request
pub const FTDI_REQUEST_RESET: u8 = 0x00;
/// Latency timer request
pub const FTDI_REQUEST_SET_LATENCY: u8 = 0x09;
/// Bit mode request
pub const FTDI_REQUEST_SET_BITMODE: u8 = 0x0B;

/// Reset value: reset the SIO
pub const FTDI_RESET_SIO: u16 = 0;
/// Reset value: purge the receive buffer
pub const FTDI_RESET_PURGE_RX: u16 = 1;
/// Reset value: purge the transmit buffer
pub const FTDI_RESET_PURGE_TX: u16 = 2;

/// Bit mode: reset to UART
pub const FTDI_BITMODE_RESET: u8 = 0x00;
/// Bit mode: MPSSE
pub const FTDI_BITMODE_MPSSE: u8 = 0x02;

/// wIndex for interface A
pub const FTDI_INTERFACE_A: u16 = 1;
/// Bulk OUT endpoint of interface A
pub const FTDI_WRITE_EP: u8 = 0x02;
/// Bulk IN endpoint of interface A
pub const FTDI_READ_EP: u8 = 0x81;

/// Every IN packet starts with two modem status bytes
pub const MODEM_STATUS_SIZE: usize = 2;

// ============================================================================
// MPSSE opcodes
// ============================================================================

/// Clock bytes out on the falling edge, MSB first
pub const MPSSE_WRITE_BYTES_NEG: u8 = 0x11;
/// Clock bits out on the falling edge, MSB first
pub const MPSSE_WRITE_BITS_NEG: u8 = 0x13;
/// Clock bytes in on the rising edge, MSB first
pub const MPSSE_READ_BYTES_POS: u8 = 0x20;
/// Clock bits in on the rising edge, MSB first
pub const MPSSE_READ_BITS_POS: u8 = 0x22;

/// Set data bits low byte
pub const SET_BITS_LOW: u8 = 0x80;
/// Get data bits low byte
pub const GET_BITS_LOW: u8 = 0x81;
/// Disable loopback mode
pub const LOOPBACK_END: u8 = 0x85;
/// Set clock divisor
pub const TCK_DIVISOR: u8 = 0x86;
/// Send immediate (flush buffers)
pub const SEND_IMMEDIATE: u8 = 0x87;
/// Disable divide-by-5 prescaler (60 MHz clock)
pub const DIS_DIV_5: u8 = 0x8A;
/// Enable 3-phase clocking (for I2C)
pub const EN_3_PHASE: u8 = 0x8C;
/// Enable adaptive clocking
pub const CLK_ADAPTIVE: u8 = 0x96;
/// Disable adaptive clocking
pub const CLK_NO_ADAPTIVE: u8 = 0x97;
/// Only drive zero on the masked pins, tristate for one
pub const DRIVE_ZERO: u8 = 0x9E;

/// An invalid opcode; the MPSSE answers `[0xFA, opcode]`
pub const MPSSE_BOGUS: u8 = 0xAA;
/// First byte of the bad-command answer
pub const MPSSE_BAD_COMMAND: u8 = 0xFA;

// ============================================================================
// Pins
// ============================================================================

/// SCL
pub const PIN_SCL: u8 = 1 << 0;
/// SDA output
pub const PIN_SDA_OUT: u8 = 1 << 1;
/// SDA input
pub const PIN_SDA_IN: u8 = 1 << 2;
/// Return clock for adaptive clocking
pub const PIN_RTCK: u8 = 1 << 7;

/// GPIO pins that can be pulsed
pub const GPIO_PINS: std::ops::RangeInclusive<u8> = 3..=6;

// ============================================================================
// Timing
// ============================================================================

/// 60 MHz divided by 2, then by 1.5 for three-phase clocking
pub const THREE_PHASE_BASE_HZ: u32 = 20_000_000;

/// Fastest supported bus clock
pub const MAX_FREQUENCY: u32 = 1_000_000;

/// Default bus clock
pub const DEFAULT_FREQUENCY: u32 = 50_000;

/// Each pin change is repeated this often to meet I2C hold times
const HOLD_REPEAT: usize = 4;

/// Responses per USB round trip, below the 1 KiB receive FIFO
pub const RESPONSE_CHUNK: usize = 512;

/// Divisor giving the fastest bus clock not above `frequency`
pub fn clock_divisor(frequency: u32) -> Option<u16> {
    if frequency == 0 || frequency > MAX_FREQUENCY {
        return None;
    }
    let divisor = THREE_PHASE_BASE_HZ.div_ceil(frequency) - 1;
    u16::try_from(divisor).ok()
}

/// Bus clock produced by `divisor`
pub fn actual_frequency(divisor: u16) -> u32 {
    THREE_PHASE_BASE_HZ / (divisor as u32 + 1)
}

/// Index of the first NACK in a list of ACK bit responses
pub fn first_nack(acks: &[u8]) -> Option<usize> {
    acks.iter().position(|b| b & 0x01 != 0)
}

/// Values and directions of the GPIO pins sharing the low byte with I2C
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinState {
    /// Output levels
    pub value: u8,
    /// Output enables
    pub direction: u8,
}

impl PinState {
    /// Make `pin` an output at `high`
    pub fn drive(&mut self, pin: u8, high: bool) {
        let bit = 1 << pin;
        self.direction |= bit;
        if high {
            self.value |= bit;
        } else {
            self.value &= !bit;
        }
    }
}

/// MPSSE command stream for one I2C transaction
///
/// Commands are split into segments that each produce at most
/// [`RESPONSE_CHUNK`] response bytes, so the receive FIFO never overflows
/// while the host is still writing.
#[derive(Debug)]
pub struct Commands {
    buf: Vec<u8>,
    gpio: PinState,
    responses: usize,
    splits: Vec<(usize, usize)>,
}

impl Commands {
    /// Empty command stream keeping `gpio` on the non-I2C pins
    pub fn new(gpio: PinState) -> Self {
        Self {
            buf: Vec::with_capacity(64),
            gpio,
            responses: 0,
            splits: Vec::new(),
        }
    }

    fn pins(&mut self, scl: bool, sda: bool) {
        let mut value = self.gpio.value;
        if scl {
            value |= PIN_SCL;
        }
        if sda {
            value |= PIN_SDA_OUT;
        }
        self.buf.extend_from_slice(&[
            SET_BITS_LOW,
            value,
            PIN_SCL | PIN_SDA_OUT | self.gpio.direction,
        ]);
    }

    fn hold(&mut self, scl: bool, sda: bool) {
        for _ in 0..HOLD_REPEAT {
            self.pins(scl, sda);
        }
    }

    fn expect(&mut self, n: usize) {
        self.responses += n;
        let since = self.splits.last().map_or(0, |&(_, r)| r);
        if self.responses - since >= RESPONSE_CHUNK {
            self.buf.push(SEND_IMMEDIATE);
            self.splits.push((self.buf.len(), self.responses));
        }
    }

    /// Bus idle: both lines released
    pub fn idle(&mut self) {
        self.pins(true, true);
    }

    /// START condition
    pub fn start(&mut self) {
        self.idle();
        self.hold(true, false);
        self.hold(false, false);
    }

    /// Repeated START from the middle of a transaction
    pub fn repeated_start(&mut self) {
        self.pins(false, true);
        self.hold(true, true);
        self.start();
    }

    /// STOP condition
    pub fn stop(&mut self) {
        self.hold(false, false);
        self.hold(true, false);
        self.hold(true, true);
    }

    /// Clock out one byte and read the slave's ACK bit
    pub fn write_byte(&mut self, byte: u8) {
        self.buf
            .extend_from_slice(&[MPSSE_WRITE_BYTES_NEG, 0x00, 0x00, byte]);
        self.pins(false, true);
        self.buf.extend_from_slice(&[MPSSE_READ_BITS_POS, 0x00]);
        self.expect(1);
    }

    /// Clock in one byte, then ACK it (or NACK the last byte)
    pub fn read_byte(&mut self, ack: bool) {
        self.pins(false, true);
        self.buf
            .extend_from_slice(&[MPSSE_READ_BYTES_POS, 0x00, 0x00]);
        self.buf.extend_from_slice(&[
            MPSSE_WRITE_BITS_NEG,
            0x00,
            if ack { 0x00 } else { 0xFF },
        ]);
        self.pins(false, true);
        self.expect(1);
    }

    /// Nine clocks with SDA released, freeing a slave stuck mid-byte
    pub fn clock_out_stuck_slave(&mut self) {
        for _ in 0..9 {
            self.hold(false, true);
            self.hold(true, true);
        }
    }

    /// Sample the low byte pins
    pub fn sample_pins(&mut self) {
        self.buf.push(GET_BITS_LOW);
        self.expect(1);
    }

    /// Terminate the stream; returns segments of (commands, expected responses)
    pub fn finish(mut self) -> Vec<(Vec<u8>, usize)> {
        let last = self.splits.last().copied().unwrap_or((0, 0));
        if self.buf.len() > last.0 {
            self.buf.push(SEND_IMMEDIATE);
            self.splits.push((self.buf.len(), self.responses));
        }

        let mut segments = Vec::with_capacity(self.splits.len());
        let mut start = (0, 0);
        for &(end, responses) in &self.splits {
            segments.push((self.buf[start.0..end].to_vec(), responses - start.1));
            start = (end, responses);
        }
        segments
    }

    /// Total response bytes the stream produces
    pub fn responses(&self) -> usize {
        self.responses
    }
}

/// Commands for a register write: START, address, register, data, STOP
///
/// Produces `3 + data.len()` ACK responses.
pub fn write_transaction(slave: u8, register: u16, data: &[u8], gpio: PinState) -> Commands {
    let mut cmds = Commands::new(gpio);
    cmds.start();
    cmds.write_byte(slave << 1);
    for &b in register.to_be_bytes().iter().chain(data) {
        cmds.write_byte(b);
    }
    cmds.stop();
    cmds
}

/// Commands for a register read
///
/// Writes the register address and `out`, then reads `read_len` bytes
/// after a repeated start (or STOP + START). Produces `3 + out.len()`
/// ACKs, one ACK for the read address, then the data bytes.
pub fn read_transaction(
    slave: u8,
    register: u16,
    out: &[u8],
    read_len: usize,
    repeated_start: bool,
    gpio: PinState,
) -> Commands {
    let mut cmds = Commands::new(gpio);
    cmds.start();
    cmds.write_byte(slave << 1);
    for &b in register.to_be_bytes().iter().chain(out) {
        cmds.write_byte(b);
    }
    if repeated_start {
        cmds.repeated_start();
    } else {
        cmds.stop();
        cmds.start();
    }
    cmds.write_byte((slave << 1) | 1);
    for i in 0..read_len {
        cmds.read_byte(i + 1 < read_len);
    }
    cmds.stop();
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_leaves_pin_driven() {
        let mut gpio = PinState::default();
        gpio.drive(4, false);
        assert_eq!(gpio, PinState { value: 0, direction: 0x10 });
        gpio.drive(4, true);
        assert_eq!(gpio, PinState { value: 0x10, direction: 0x10 });
        gpio.drive(5, false);
        assert_eq!(gpio, PinState { value: 0x10, direction: 0x30 });
    }

    #[test]
    fn test_clock_divisor() {
        assert_eq!(clock_divisor(50_000), Some(399));
        assert_eq!(actual_frequency(399), 50_000);
        // never faster than requested
        let div = clock_divisor(300_000).unwrap();
        assert!(actual_frequency(div) <= 300_000);
        assert_eq!(clock_divisor(0), None);
        assert_eq!(clock_divisor(2_000_000), None);
        // 20 MHz / 65536 is just above 305 Hz
        assert_eq!(clock_divisor(300), None);
    }

    #[test]
    fn test_first_nack() {
        assert_eq!(first_nack(&[0x00, 0xFE, 0x00]), None);
        assert_eq!(first_nack(&[0x00, 0x01, 0x01]), Some(1));
    }

    #[test]
    fn test_write_transaction_layout() {
        let cmds = write_transaction(0x58, 0x1000, &[0xAB], PinState::default());
        assert_eq!(cmds.responses(), 4);
        let segments = cmds.finish();
        assert_eq!(segments.len(), 1);
        let (bytes, responses) = &segments[0];
        assert_eq!(*responses, 4);
        assert_eq!(bytes.last(), Some(&SEND_IMMEDIATE));

        // address byte 0xB0, then register 0x10 0x00, then data
        let written: Vec<u8> = bytes
            .windows(4)
            .filter(|w| w[0] == MPSSE_WRITE_BYTES_NEG && w[1] == 0 && w[2] == 0)
            .map(|w| w[3])
            .collect();
        assert_eq!(written, vec![0xB0, 0x10, 0x00, 0xAB]);
    }

    #[test]
    fn test_read_transaction_nacks_last_byte() {
        let cmds = read_transaction(0x58, 0x6000, &[], 4, true, PinState::default());
        assert_eq!(cmds.responses(), 3 + 1 + 4);
        let (bytes, _) = &cmds.finish()[0];
        let acks: Vec<u8> = bytes
            .windows(3)
            .filter(|w| w[0] == MPSSE_WRITE_BITS_NEG && w[1] == 0)
            .map(|w| w[2])
            .collect();
        assert_eq!(acks, vec![0x00, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn test_gpio_state_is_preserved() {
        let gpio = PinState {
            value: 0x10,
            direction: 0x10,
        };
        let (bytes, _) = &write_transaction(0x58, 0, &[], gpio).finish()[0];
        assert!(bytes
            .windows(3)
            .filter(|w| w[0] == SET_BITS_LOW)
            .all(|w| w[1] & 0x10 != 0 && w[2] == PIN_SCL | PIN_SDA_OUT | 0x10));
    }

    #[test]
    fn test_long_reads_are_segmented() {
        let cmds = read_transaction(0x58, 0x7004, &[0x03, 0, 0, 0], 1024, true, PinState::default());
        let total = cmds.responses();
        let segments = cmds.finish();
        assert!(segments.len() >= 2);
        assert!(segments.iter().all(|(_, n)| *n <= RESPONSE_CHUNK));
        assert_eq!(segments.iter().map(|(_, n)| n).sum::<usize>(), total);
        assert!(segments.iter().all(|(b, _)| b.last() == Some(&SEND_IMMEDIATE)));
    }
}
