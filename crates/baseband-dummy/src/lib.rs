//! baseband-dummy - In-memory baseband emulator for testing
//!
//! This crate provides a transport that emulates the baseband board's
//! register space, command engine and configuration flash in memory. It is
//! useful for testing and development without an adapter or a board, and
//! can inject the faults a real bus produces.

use baseband_core::flash::{
    self, PAGE_PROGRAM, READ_DATA_BYTES, READ_IDENTIFICATION, READ_STATUS_REGISTER, SECTOR_ERASE,
    STATUS_WEL, WRITE_DISABLE, WRITE_ENABLE,
};
use baseband_core::layout::{ACTUALS_SIZE, INFO_SIZE, SETTINGS, SETTINGS_SIZE};
use baseband_core::protocol::*;
use baseband_core::{encode, Settings, Transport, TransportError, TransportFeatures};
use std::time::Duration;

/// Configuration for the dummy board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// INFO bytes: hw, fpga, sw minor, sw major
    pub info: [u8; INFO_SIZE],
    /// Flash identification bytes
    pub flash_id: [u8; 3],
    /// Largest register transfer accepted outside the flash tunnel
    pub max_transfer_len: usize,
    /// Status polls that report busy after each command
    pub command_busy_polls: u32,
    /// Status polls that report WIP after each program or erase
    pub flash_busy_polls: u32,
    /// Whether anything answers on the bus
    pub present: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            info: [2, 7, 3, 1],
            flash_id: [0x20, 0x20, 0x14], // ST M25P80
            max_transfer_len: 128,
            command_busy_polls: 1,
            flash_busy_polls: 1,
            present: true,
        }
    }
}

/// Counters kept by the emulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Bus transactions attempted, failed ones included
    pub transactions: usize,
    /// Commands executed as (command, parameter)
    pub commands: Vec<(u8, u8)>,
    /// Register writes outside the flash tunnel as (address, length)
    pub register_writes: Vec<(u16, usize)>,
    /// Page program opcodes received
    pub page_programs: usize,
    /// Sector erase opcodes received
    pub sector_erases: usize,
    /// Bus recoveries requested
    pub recoveries: usize,
    /// GPIO pulses as (pin, active_low, duration)
    pub gpio_pulses: Vec<(u8, bool, Duration)>,
}

/// Settings the emulated board powers up with
pub fn default_settings() -> Settings {
    let mut s = Settings::new();
    s.insert("name", "Default");
    for (ch, khz) in [6500, 7020, 7200, 7380].into_iter().enumerate() {
        s.insert(format!("fm.{}.rf_frequency_khz", ch), khz);
        s.insert(format!("fm.{}.rf_level", ch), 512);
        s.insert(format!("fm.{}.input", ch), ch as i64);
        s.insert(format!("fm.{}.preemphasis", ch), "AUDIO_50US");
        s.insert(format!("fm.{}.enable", ch), ch < 2);
    }
    s.insert("nicam.rf_frequency_khz", 6552);
    s.insert("nicam.rf_level", 256);
    s.insert("nicam.input_ch1", "I2S1L");
    s.insert("nicam.input_ch2", "I2S1R");
    s.insert("video.video_level", 128);
    s.insert("video.video_mode", "PAL");
    s.insert("video.osd_mode", "OSD_AUTO");
    s.insert("video.video_in", "VIDEO_IN_AUTO");
    s.insert("video.enable", true);
    s.insert("general.audio_nco_frequency", 1000);
    s.insert("general.morse_message_repeat_time", 60);
    s.insert("general.morse_message", "CQ CQ");
    s
}

/// Dummy baseband board
///
/// Emulates the register windows, the command register and an M25P80 behind
/// the flash tunnel. Commands complete after a configurable number of busy
/// status polls; program and erase complete instantly apart from the
/// configured WIP polls.
pub struct DummyBaseband {
    config: DummyConfig,
    osd: Vec<u8>,
    font: Vec<u8>,
    settings: Vec<u8>,
    preview: Vec<u8>,
    actuals: Vec<u8>,
    presets: Vec<Option<Vec<u8>>>,
    flash: Vec<u8>,
    write_enabled: bool,
    flash_busy: u32,
    command_busy: u32,
    stats: DummyStats,
    // fault injection
    failures: usize,
    failure_delay: usize,
    bus_hung: bool,
    ack_budget: Option<usize>,
    commands_hang: bool,
}

impl DummyBaseband {
    /// Create a board with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let mut settings = vec![0u8; SETTINGS_SIZE];
        if let Ok(image) = encode(&SETTINGS, &default_settings(), None) {
            for (address, data) in image.ranges() {
                let offset = (address - REG_SETTINGS) as usize;
                settings[offset..offset + data.len()].copy_from_slice(&data);
            }
        }

        let mut actuals = vec![0u8; ACTUALS_SIZE];
        actuals[8..10].copy_from_slice(&0x1234u16.to_le_bytes());
        actuals[28] = 0x02; // baseband PLL locked

        let mut presets = vec![None; PRESET_COUNT as usize];
        presets[0] = Some(settings.clone());

        Self {
            config,
            osd: vec![b' '; OSD_SIZE],
            font: vec![0; FONT_SIZE],
            preview: vec![0; SETTINGS_SIZE],
            settings,
            actuals,
            presets,
            flash: vec![0xFF; flash::FLASH_SIZE as usize],
            write_enabled: false,
            flash_busy: 0,
            command_busy: 0,
            stats: DummyStats::default(),
            failures: 0,
            failure_delay: 0,
            bus_hung: false,
            ack_budget: None,
            commands_hang: false,
        }
    }

    /// Create a board with the default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Counters collected so far
    pub fn stats(&self) -> &DummyStats {
        &self.stats
    }

    /// Live settings block
    pub fn settings(&self) -> &[u8] {
        &self.settings
    }

    /// Mutable live settings block
    pub fn settings_mut(&mut self) -> &mut [u8] {
        &mut self.settings
    }

    /// Hardware meters
    pub fn actuals_mut(&mut self) -> &mut [u8] {
        &mut self.actuals
    }

    /// OSD display memory
    pub fn osd_mut(&mut self) -> &mut [u8] {
        &mut self.osd
    }

    /// Stored preset `index`
    pub fn preset(&self, index: u8) -> Option<&[u8]> {
        self.presets.get(index as usize)?.as_deref()
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash contents
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Fail the next `count` transactions with a timeout
    ///
    /// Each failure leaves the bus hung: later transactions fail with
    /// [`TransportError::BusStuck`] until [`Transport::recover_bus`].
    pub fn fail_next(&mut self, count: usize) {
        self.fail_after(0, count);
    }

    /// Let `skip` transactions through, then fail `count` as
    /// [`DummyBaseband::fail_next`] does
    pub fn fail_after(&mut self, skip: usize, count: usize) {
        self.failure_delay = skip;
        self.failures = count;
    }

    /// Let `pages` page programs succeed, then leave WEL set without
    /// programming, as a chip that lost the data would
    pub fn corrupt_ack_after(&mut self, pages: usize) {
        self.ack_budget = Some(pages);
    }

    /// Keep the command register busy forever
    pub fn hang_commands(&mut self, hang: bool) {
        self.commands_hang = hang;
    }

    fn begin(&mut self, address: u16) -> Result<(), TransportError> {
        self.stats.transactions += 1;
        if !self.config.present {
            return Err(TransportError::Nack { address });
        }
        if self.bus_hung {
            return Err(TransportError::BusStuck);
        }
        if self.failures > 0 && self.failure_delay > 0 {
            self.failure_delay -= 1;
        } else if self.failures > 0 {
            self.failures -= 1;
            self.bus_hung = true;
            log::debug!("dummy: injected timeout at 0x{:04X}", address);
            return Err(TransportError::Timeout);
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), TransportError> {
        if len > self.config.max_transfer_len {
            return Err(TransportError::InvalidParameter(format!(
                "transfer of {} bytes exceeds {}",
                len, self.config.max_transfer_len
            )));
        }
        Ok(())
    }

    /// Window and offset of a register address
    fn window(&mut self, address: u16) -> Option<(&mut Vec<u8>, usize)> {
        let (mem, base) = match address {
            REG_DISPLAY..=0x07FF => (&mut self.osd, REG_DISPLAY),
            REG_FONT..=0x0FFF => (&mut self.font, REG_FONT),
            REG_SETTINGS..=0x1FFF => (&mut self.settings, REG_SETTINGS),
            REG_ACTUALS..=0x2FFF => (&mut self.actuals, REG_ACTUALS),
            REG_PREVIEW..=0x4FFF => (&mut self.preview, REG_PREVIEW),
            _ => return None,
        };
        Some((mem, (address - base) as usize))
    }

    fn write_register(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        self.check_len(data.len())?;
        self.stats.register_writes.push((address, data.len()));

        if address & 0xF000 == REG_COMMAND {
            if let Some(&param) = data.first() {
                self.execute((address & 0xFF) as u8, param);
            }
            return Ok(());
        }
        // ACTUALS, PREVIEW, flags and INFO ignore writes
        if matches!(address & 0xF000, REG_ACTUALS | REG_PREVIEW | REG_PRESET_FLAGS | REG_INFO) {
            return Ok(());
        }

        let (mem, offset) = self
            .window(address)
            .ok_or(TransportError::Nack { address })?;
        let end = offset + data.len();
        if end > mem.len() {
            return Err(TransportError::Nack { address });
        }
        mem[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn read_register(&mut self, address: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        self.check_len(buf.len())?;
        match address & 0xF000 {
            REG_COMMAND => {
                let status = if self.commands_hang || self.command_busy > 0 {
                    self.command_busy = self.command_busy.saturating_sub(1);
                    1
                } else {
                    0
                };
                // no auto-increment
                buf.fill(status);
            }
            REG_PRESET_FLAGS => {
                let flags = self
                    .presets
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_some())
                    .fold(0u32, |acc, (i, _)| acc | 1 << i);
                copy_out(&flags.to_le_bytes(), (address & 0x0FFF) as usize, buf, address)?;
            }
            REG_INFO => {
                let info = self.config.info;
                copy_out(&info, (address & 0x0FFF) as usize, buf, address)?;
            }
            _ => {
                let (mem, offset) = self
                    .window(address)
                    .ok_or(TransportError::Nack { address })?;
                copy_out(mem, offset, buf, address)?;
            }
        }
        Ok(())
    }

    fn execute(&mut self, command: u8, param: u8) {
        log::debug!("dummy: command {} ({})", command_name(command), param);
        self.stats.commands.push((command, param));
        self.command_busy = self.config.command_busy_polls;

        let slot = param as usize;
        match command {
            CMD_LOAD_PRESET => {
                if let Some(Some(preset)) = self.presets.get(slot) {
                    self.settings = preset.clone();
                }
            }
            CMD_STORE_PRESET => {
                if let Some(preset) = self.presets.get_mut(slot) {
                    *preset = Some(self.settings.clone());
                }
            }
            CMD_ERASE_PRESET => {
                if let Some(preset) = self.presets.get_mut(slot) {
                    *preset = None;
                }
            }
            CMD_VIEW_PRESET => {
                self.preview = match self.presets.get(slot) {
                    Some(Some(preset)) => preset.clone(),
                    _ => vec![0; SETTINGS_SIZE],
                };
            }
            _ => {}
        }
    }

    /// One tunnelled SPI transaction of `count` bytes
    fn spi(&mut self, count: usize, out: &[u8], read: &mut [u8]) -> Result<(), TransportError> {
        let address = REG_FLASH + count as u16;
        if count != out.len() + read.len() {
            return Err(TransportError::InvalidParameter(format!(
                "tunnel count {} does not match {} + {} bytes",
                count,
                out.len(),
                read.len()
            )));
        }
        let (&opcode, rest) = out.split_first().ok_or(TransportError::Nack { address })?;
        let (flash_addr, payload) = if flash::has_address(opcode) {
            if rest.len() < 3 {
                return Err(TransportError::Nack { address });
            }
            let a = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]) as usize;
            (a, &rest[3..])
        } else {
            (0, rest)
        };

        match opcode {
            WRITE_ENABLE => self.write_enabled = true,
            WRITE_DISABLE => self.write_enabled = false,
            READ_IDENTIFICATION => {
                let id = self.config.flash_id;
                for (b, v) in read.iter_mut().zip(id.iter().chain(std::iter::repeat(&0))) {
                    *b = *v;
                }
            }
            READ_STATUS_REGISTER => {
                let mut status = 0;
                if self.flash_busy > 0 {
                    self.flash_busy -= 1;
                    status |= flash::STATUS_WIP;
                }
                if self.write_enabled {
                    status |= STATUS_WEL;
                }
                read.fill(status);
            }
            READ_DATA_BYTES => {
                for (i, b) in read.iter_mut().enumerate() {
                    *b = self.flash[(flash_addr + i) % self.flash.len()];
                }
            }
            PAGE_PROGRAM => {
                self.stats.page_programs += 1;
                if !self.write_enabled {
                    log::debug!("dummy: page program without WEL ignored");
                    return Ok(());
                }
                if let Some(budget) = self.ack_budget.as_mut() {
                    if *budget == 0 {
                        // latch stays set, nothing programmed
                        return Ok(());
                    }
                    *budget -= 1;
                }
                // addresses wrap within the page
                let page = flash_addr & !(flash::PAGE_SIZE - 1);
                for (i, &byte) in payload.iter().enumerate() {
                    let offset = (flash_addr + i) % flash::PAGE_SIZE;
                    if let Some(cell) = self.flash.get_mut(page + offset) {
                        *cell &= byte;
                    }
                }
                self.write_enabled = false;
                self.flash_busy = self.config.flash_busy_polls;
            }
            SECTOR_ERASE => {
                self.stats.sector_erases += 1;
                if !self.write_enabled {
                    return Ok(());
                }
                let start = flash_addr & !(flash::SECTOR_SIZE as usize - 1);
                let end = (start + flash::SECTOR_SIZE as usize).min(self.flash.len());
                self.flash[start..end].fill(0xFF);
                self.write_enabled = false;
                self.flash_busy = self.config.flash_busy_polls;
            }
            _ => {
                log::debug!("dummy: unsupported flash opcode 0x{:02X}", opcode);
                read.fill(0xFF);
            }
        }
        Ok(())
    }
}

fn copy_out(src: &[u8], offset: usize, buf: &mut [u8], address: u16) -> Result<(), TransportError> {
    let end = offset + buf.len();
    if end > src.len() {
        return Err(TransportError::Nack { address });
    }
    buf.copy_from_slice(&src[offset..end]);
    Ok(())
}

impl Transport for DummyBaseband {
    fn name(&self) -> &str {
        "dummy"
    }

    fn features(&self) -> TransportFeatures {
        TransportFeatures::CLOCK_STRETCHING
            | TransportFeatures::REPEATED_START
            | TransportFeatures::GPIO
            | TransportFeatures::BUS_RECOVERY
    }

    fn max_transfer_len(&self) -> usize {
        self.config.max_transfer_len
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        self.begin(address)?;
        if address & 0xF000 == REG_FLASH {
            return self.spi((address & 0x0FFF) as usize, data, &mut []);
        }
        self.write_register(address, data)
    }

    fn write_read(
        &mut self,
        address: u16,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        self.begin(address)?;
        if address & 0xF000 == REG_FLASH {
            return self.spi((address & 0x0FFF) as usize, data, buf);
        }
        if !data.is_empty() {
            return Err(TransportError::InvalidParameter(
                "combined write/read is only valid on the flash tunnel".into(),
            ));
        }
        self.read_register(address, buf)
    }

    fn pulse_gpio(
        &mut self,
        pin: u8,
        active_low: bool,
        duration: Duration,
    ) -> Result<(), TransportError> {
        if pin > 7 {
            return Err(TransportError::InvalidParameter(format!(
                "GPIO {} does not exist",
                pin
            )));
        }
        self.stats.gpio_pulses.push((pin, active_low, duration));
        Ok(())
    }

    fn recover_bus(&mut self) -> Result<(), TransportError> {
        self.stats.recoveries += 1;
        self.bus_hung = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseband_core::flash::{FlashTiming, FlashTunnel};

    #[test]
    fn test_default_settings_encode() {
        let dummy = DummyBaseband::new_default();
        // fm.1.rf_frequency_khz = 7020
        assert_eq!(&dummy.settings()[18..20], &[0x6C, 0x1B]);
        assert_eq!(&dummy.settings()[..7], b"Default");
        assert!(dummy.preset(0).is_some());
        assert!(dummy.preset(1).is_none());
    }

    #[test]
    fn test_register_read_write() {
        let mut dummy = DummyBaseband::new_default();
        dummy.write(0x1000 + 43, &[0x40]).unwrap();
        let mut buf = [0u8; 2];
        dummy.read(0x1000 + 43, &mut buf).unwrap();
        assert_eq!(buf[0], 0x40);
        assert!(dummy.read(0x1000 + 66, &mut buf).is_err());
        assert!(dummy.read(0x8000, &mut buf).is_err());
    }

    #[test]
    fn test_command_busy_then_done() {
        let mut dummy = DummyBaseband::new_default();
        dummy.write(command_address(CMD_STORE_PRESET), &[5]).unwrap();
        let mut status = [0u8];
        dummy.read(REG_COMMAND, &mut status).unwrap();
        assert_eq!(status[0], 1);
        dummy.read(REG_COMMAND, &mut status).unwrap();
        assert_eq!(status[0], 0);

        let mut flags = [0u8; 4];
        dummy.read(REG_PRESET_FLAGS, &mut flags).unwrap();
        assert_eq!(u32::from_le_bytes(flags), 0b10_0001);
        assert_eq!(dummy.stats().commands, vec![(CMD_STORE_PRESET, 5)]);
    }

    #[test]
    fn test_info() {
        let mut dummy = DummyBaseband::new_default();
        let mut info = [0u8; 4];
        dummy.read(REG_INFO, &mut info).unwrap();
        assert_eq!(info, [2, 7, 3, 1]);
    }

    #[test]
    fn test_flash_program_and_read() {
        let mut dummy = DummyBaseband::new_default();
        let mut tunnel = FlashTunnel::new(&mut dummy, FlashTiming::default());
        assert_eq!(tunnel.read_id().unwrap(), [0x20, 0x20, 0x14]);
        tunnel.erase_sector(0x08_0000).unwrap();
        tunnel.program_page(0x08_0000, &[0x12, 0x34, 0x56]).unwrap();
        let mut buf = [0u8; 4];
        tunnel.read(0x08_0000, &mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56, 0xFF]);
        assert_eq!(dummy.stats().page_programs, 1);
        assert_eq!(dummy.stats().sector_erases, 1);
    }

    #[test]
    fn test_tunnel_count_is_checked() {
        let mut dummy = DummyBaseband::new_default();
        // RDSR with one read byte is 2 SPI bytes, not 3
        let mut buf = [0u8];
        assert!(matches!(
            dummy.write_read(0x7003, &[READ_STATUS_REGISTER], &mut buf),
            Err(TransportError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_injected_failure_hangs_bus_until_recovery() {
        let mut dummy = DummyBaseband::new_default();
        dummy.fail_next(1);
        let mut buf = [0u8; 4];
        assert_eq!(dummy.read(REG_INFO, &mut buf), Err(TransportError::Timeout));
        assert_eq!(dummy.read(REG_INFO, &mut buf), Err(TransportError::BusStuck));
        dummy.recover_bus().unwrap();
        dummy.read(REG_INFO, &mut buf).unwrap();
        assert_eq!(dummy.stats().transactions, 3);
        assert_eq!(dummy.stats().recoveries, 1);
    }

    #[test]
    fn test_delayed_failure() {
        let mut dummy = DummyBaseband::new_default();
        dummy.fail_after(2, 1);
        let mut buf = [0u8; 4];
        dummy.read(REG_INFO, &mut buf).unwrap();
        dummy.read(REG_INFO, &mut buf).unwrap();
        assert_eq!(dummy.read(REG_INFO, &mut buf), Err(TransportError::Timeout));
        dummy.recover_bus().unwrap();
        dummy.read(REG_INFO, &mut buf).unwrap();
    }

    #[test]
    fn test_absent_board_nacks() {
        let mut dummy = DummyBaseband::new(DummyConfig {
            present: false,
            ..Default::default()
        });
        let mut buf = [0u8; 4];
        assert_eq!(
            dummy.read(REG_INFO, &mut buf),
            Err(TransportError::Nack { address: REG_INFO })
        );
    }

    #[test]
    fn test_oversized_register_transfer_refused() {
        let mut dummy = DummyBaseband::new_default();
        let mut buf = vec![0u8; 200];
        assert!(matches!(
            dummy.read(REG_DISPLAY, &mut buf),
            Err(TransportError::InvalidParameter(_))
        ));
    }
}
