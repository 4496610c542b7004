//! Device session
//!
//! A [`Session`] owns a [`Transport`] for the lifetime of one tool
//! invocation and sequences the multi-step operations: identity check,
//! settings pull and push, preset handling and firmware upgrade.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --connect--> Idle <--> Transferring
//!                            ^  \
//!                            |   `--> Upgrading
//!                  recover   |
//!                          Faulted  <-- transient transport error after retry
//! ```
//!
//! A transient transport error gets exactly one retry, preceded by a bus
//! recovery. If the retry fails too, the session enters `Faulted`; the next
//! operation (or an explicit [`Session::reset`]) attempts recovery again
//! before touching the device. Errors that are not transport errors leave
//! the session `Idle`.

use crate::codec::{decode, decode_all, encode, RegisterImage};
use crate::error::{Error, Result, TransportError, UpgradeFailure};
use crate::flash::{self, FlashTiming, FlashTunnel};
use crate::layout::{ACTUALS, INFO_SIZE, PREVIEW, SETTINGS};
use crate::progress::FlashProgress;
use crate::protocol::*;
use crate::register::RegisterMap;
use crate::settings::Settings;
use crate::transport::Transport;
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device identified yet
    Disconnected,
    /// Connected, no operation running
    Idle,
    /// A register transfer is running
    Transferring,
    /// A firmware upgrade is running
    Upgrading,
    /// The bus may be hung; recovery is needed before the next operation
    Faulted,
}

/// Session tuning, usually loaded from the `[session]` table of the
/// configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Longest wait for a device command to complete
    pub command_timeout_ms: u64,
    /// Pause between command status polls
    pub poll_interval_ms: u64,
    /// Longest wait for a flash page program
    pub flash_page_timeout_ms: u64,
    /// Longest wait for a flash sector erase
    pub flash_erase_timeout_ms: u64,
    /// Register spans closer than this many bytes are read in one transfer
    pub coalesce_gap: usize,
    /// How long a GPIO pulse holds the pin active
    pub gpio_pulse_ms: u64,
    /// Read the image back after a firmware upgrade
    pub verify_firmware: bool,
    /// Retry once after a bus recovery on transient transport errors
    pub retry_transient: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            poll_interval_ms: 10,
            flash_page_timeout_ms: 3000,
            flash_erase_timeout_ms: 15000,
            coalesce_gap: 8,
            gpio_pulse_ms: 6000,
            verify_firmware: true,
            retry_transient: true,
        }
    }
}

impl SessionConfig {
    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Duration of a GPIO pulse
    pub fn gpio_pulse(&self) -> Duration {
        Duration::from_millis(self.gpio_pulse_ms)
    }

    fn flash_timing(&self) -> FlashTiming {
        FlashTiming {
            page_timeout: Duration::from_millis(self.flash_page_timeout_ms),
            erase_timeout: Duration::from_millis(self.flash_erase_timeout_ms),
            erase_poll: self.poll_interval(),
        }
    }
}

/// Board identity read on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// PCB revision
    pub hw_version: u8,
    /// FPGA bitstream revision
    pub fpga_version: u8,
    /// Application major version
    pub sw_version_major: u8,
    /// Application minor version
    pub sw_version_minor: u8,
}

impl DeviceInfo {
    /// Parse the four INFO bytes
    pub fn from_bytes(bytes: [u8; INFO_SIZE]) -> Self {
        Self {
            hw_version: bytes[0],
            fpga_version: bytes[1],
            sw_version_minor: bytes[2],
            sw_version_major: bytes[3],
        }
    }

    /// "major.minor"
    pub fn sw_version(&self) -> String {
        format!("{}.{}", self.sw_version_major, self.sw_version_minor)
    }

    /// Version 0.0 means the bootloader runs without an application image
    pub fn is_bootloader(&self) -> bool {
        self.sw_version_major == 0 && self.sw_version_minor == 0
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hw {}, fpga {}, sw {}",
            self.hw_version,
            self.fpga_version,
            self.sw_version()
        )?;
        if self.is_bootloader() {
            write!(f, " (bootloader, no image!)")?;
        }
        Ok(())
    }
}

/// Which preset slots hold data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresetFlags(pub u32);

impl PresetFlags {
    /// Whether slot `index` is in use
    pub fn is_used(&self, index: u8) -> bool {
        index < PRESET_COUNT && self.0 & (1 << index) != 0
    }

    /// Used slot indices in ascending order
    pub fn used(&self) -> impl Iterator<Item = u8> + '_ {
        (0..PRESET_COUNT).filter(move |&i| self.is_used(i))
    }
}

/// Merge byte ranges that are closer than `gap`
fn coalesce(mut spans: Vec<Range<usize>>, gap: usize) -> Vec<Range<usize>> {
    spans.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end + gap => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

fn check_preset(index: u8, first: u8) -> Result<()> {
    if !(first..=PRESET_LAST).contains(&index) {
        return Err(Error::validation(
            "preset",
            index,
            format!("expected {}..={}", first, PRESET_LAST),
        ));
    }
    Ok(())
}

/// One tool invocation's connection to the baseband
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    info: Option<DeviceInfo>,
}

impl<T: Transport> Session<T> {
    /// Wrap a transport without talking to the device
    ///
    /// Only [`Session::pulse_gpio`] works before [`Session::open`].
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Disconnected,
            info: None,
        }
    }

    /// Wrap a transport and identify the device
    pub fn connect(transport: T, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(transport, config);
        session.open()?;
        Ok(session)
    }

    /// Identify the device by reading its INFO block
    ///
    /// Fails with [`Error::DeviceNotFound`] when nothing acknowledges or
    /// the bytes read look like a floating bus. Any other transient error
    /// leaves the session [`SessionState::Faulted`].
    pub fn open(&mut self) -> Result<DeviceInfo> {
        if self.state == SessionState::Faulted {
            self.reset()?;
        }
        let mut raw = [0u8; INFO_SIZE];
        let result = self.retry(|s| Ok(s.transport.read(REG_INFO, &mut raw)?));
        match result {
            Ok(()) => {}
            Err(Error::Transport(TransportError::Nack { .. })) => {
                return Err(Error::DeviceNotFound(format!(
                    "no acknowledge on {}",
                    self.transport.name()
                )))
            }
            Err(e) => {
                if matches!(&e, Error::Transport(t) if t.is_transient()) {
                    self.state = SessionState::Faulted;
                }
                return Err(e);
            }
        }

        if raw.iter().all(|&b| b == 0x00) || raw.iter().all(|&b| b == 0xFF) {
            return Err(Error::DeviceNotFound(format!(
                "identity bytes {:02X?} do not look like a baseband",
                raw
            )));
        }

        let info = DeviceInfo::from_bytes(raw);
        log::info!("Connected via {}: {}", self.transport.name(), info);
        if info.is_bootloader() {
            log::warn!("Baseband runs the bootloader without an application image");
        }
        self.info = Some(info);
        self.state = SessionState::Idle;
        Ok(info)
    }

    /// Forget the device; the transport stays open
    pub fn disconnect(&mut self) {
        self.info = None;
        self.state = SessionState::Disconnected;
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity read on connect
    pub fn info(&self) -> Option<DeviceInfo> {
        self.info
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Explicitly recover the bus
    pub fn reset(&mut self) -> Result<()> {
        match self.transport.recover_bus() {
            Ok(()) => {
                self.state = if self.info.is_some() {
                    SessionState::Idle
                } else {
                    SessionState::Disconnected
                };
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Faulted;
                Err(e.into())
            }
        }
    }

    fn ensure_ready(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => Err(Error::NotConnected),
            SessionState::Faulted => {
                log::warn!("Bus faulted by an earlier operation, attempting recovery");
                self.transport.recover_bus().map_err(|e| {
                    log::error!("Bus recovery failed: {}", e);
                    Error::Faulted
                })?;
                if self.info.is_none() {
                    self.state = SessionState::Disconnected;
                    return Err(Error::NotConnected);
                }
                self.state = SessionState::Idle;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn settle(&mut self, result: &Result<impl Sized>) {
        self.state = match result {
            Err(Error::Transport(TransportError::Disconnected)) => SessionState::Disconnected,
            Err(Error::Transport(e)) if e.is_transient() => SessionState::Faulted,
            _ => SessionState::Idle,
        };
    }

    /// Run `op` in state `busy`, with one bus-reset retry on transient errors
    fn run<R>(&mut self, busy: SessionState, op: impl FnMut(&mut Self) -> Result<R>) -> Result<R> {
        self.ensure_ready()?;
        self.state = busy;
        let result = self.retry(op);
        self.settle(&result);
        result
    }

    /// Run `op`, and once more after a bus reset if it failed transiently
    ///
    /// `op` must be safe to repeat from the start.
    fn retry<R>(&mut self, mut op: impl FnMut(&mut Self) -> Result<R>) -> Result<R> {
        let mut result = op(self);

        if let Err(Error::Transport(e)) = &result {
            if e.is_transient() && self.config.retry_transient {
                log::warn!(
                    "{} transfer failed ({}), resetting bus and retrying once",
                    self.transport.name(),
                    e
                );
                match self.transport.recover_bus() {
                    Ok(()) => result = op(self),
                    Err(re) => log::error!("Bus recovery failed: {}", re),
                }
            }
        }
        result
    }

    /// One retried step on the flash tunnel
    fn flash_step<R>(
        &mut self,
        mut op: impl FnMut(&mut FlashTunnel<'_, T>) -> Result<R>,
    ) -> Result<R> {
        let timing = self.config.flash_timing();
        self.retry(|s| op(&mut FlashTunnel::new(&mut s.transport, timing)))
    }

    fn read_block(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        let max = self.transport.max_transfer_len().max(1);
        let mut buf = vec![0u8; len];
        for (i, chunk) in buf.chunks_mut(max).enumerate() {
            self.transport
                .read(address + (i * max) as u16, chunk)?;
        }
        log::trace!("Read {} bytes at 0x{:04X}", len, address);
        Ok(buf)
    }

    fn write_block(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let max = self.transport.max_transfer_len().max(1);
        for (i, chunk) in data.chunks(max).enumerate() {
            self.transport.write(address + (i * max) as u16, chunk)?;
        }
        log::trace!("Wrote {} bytes at 0x{:04X}", data.len(), address);
        Ok(())
    }

    fn read_spans(&mut self, spans: Vec<Range<usize>>) -> Result<RegisterImage> {
        let mut image = RegisterImage::new();
        for span in coalesce(spans, self.config.coalesce_gap) {
            let data = self.read_block(span.start as u16, span.len())?;
            image.insert_block(span.start as u16, &data);
        }
        Ok(image)
    }

    fn read_map(&mut self, map: &RegisterMap) -> Result<RegisterImage> {
        let data = self.read_block(map.base(), map.size())?;
        Ok(RegisterImage::from_block(map.base(), &data))
    }

    /// Issue a device command and wait for its status to return to 0
    fn command(&mut self, command: u8, param: u8) -> Result<()> {
        log::debug!("Command {} ({})", command_name(command), param);
        self.transport.write(command_address(command), &[param])?;

        let deadline = Instant::now() + self.config.command_timeout();
        let mut status = [0u8; 1];
        loop {
            self.transport.read(REG_COMMAND, &mut status)?;
            if status[0] == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::error!(
                    "Command {} still busy (status 0x{:02X})",
                    command_name(command),
                    status[0]
                );
                return Err(Error::CommandTimeout { command });
            }
            std::thread::sleep(self.config.poll_interval());
        }
    }

    /// Read settings fields
    ///
    /// `fields` holds paths or path prefixes (`fm.0`, `video.video_mode`);
    /// an empty slice reads everything. Unknown paths fail before any I/O.
    /// Contiguous and nearby fields are fetched in one transfer.
    pub fn read_settings<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<Settings> {
        let map = &*SETTINGS;
        let spans: Vec<Range<usize>> = if fields.is_empty() {
            vec![map.base() as usize..map.base() as usize + map.size()]
        } else {
            let mut spans = Vec::new();
            for path in fields {
                for field in map.select(path.as_ref())? {
                    let start = map.address_of(field) as usize;
                    spans.push(start..start + field.width.size());
                }
            }
            spans
        };

        let image = self.run(SessionState::Transferring, |s| s.read_spans(spans.clone()))?;
        let mut settings = decode(map, &image);
        if !fields.is_empty() {
            settings.retain_paths(fields);
        }
        Ok(settings)
    }

    /// Write a (partial) settings document and activate it
    ///
    /// The document is validated in full before any I/O. The containers it
    /// touches are read first so that bits it does not mention keep their
    /// on-device value; then the patch is written and UPDATE_SETTINGS is
    /// issued.
    pub fn write_settings(&mut self, settings: &Settings) -> Result<()> {
        let map = &*SETTINGS;
        let probe = encode(map, settings, None)?;
        if probe.is_empty() {
            return Ok(());
        }
        let spans: Vec<Range<usize>> = probe
            .ranges()
            .into_iter()
            .map(|(start, data)| start as usize..start as usize + data.len())
            .collect();

        self.run(SessionState::Transferring, |s| {
            let base = s.read_spans(spans.clone())?;
            let patch = encode(map, settings, Some(&base))?;
            for (address, data) in patch.ranges() {
                s.write_block(address, &data)?;
            }
            s.command(CMD_UPDATE_SETTINGS, 1)
        })?;
        log::info!("Wrote {} settings field(s)", settings.len());
        Ok(())
    }

    /// Read the hardware meters
    pub fn read_actuals(&mut self) -> Result<Settings> {
        let image = self.run(SessionState::Transferring, |s| s.read_map(&ACTUALS))?;
        Ok(decode_all(&ACTUALS, &image))
    }

    /// Read the OSD display memory, row-major
    pub fn read_osd(&mut self) -> Result<Vec<u8>> {
        self.run(SessionState::Transferring, |s| s.read_block(REG_DISPLAY, OSD_SIZE))
    }

    /// Which preset slots are in use
    pub fn preset_status(&mut self) -> Result<PresetFlags> {
        let raw = self.run(SessionState::Transferring, |s| s.read_block(REG_PRESET_FLAGS, 4))?;
        Ok(PresetFlags(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
    }

    /// Read a preset without activating it
    pub fn view_preset(&mut self, index: u8) -> Result<Settings> {
        check_preset(index, 0)?;
        let image = self.run(SessionState::Transferring, |s| {
            s.command(CMD_VIEW_PRESET, index)?;
            s.read_map(&PREVIEW)
        })?;
        // Report preview fields under the live settings paths
        let base = PREVIEW.base();
        let mut live = RegisterImage::new();
        for (address, data) in image.ranges() {
            live.insert_block(address - base + SETTINGS.base(), &data);
        }
        Ok(decode(&SETTINGS, &live))
    }

    /// Load preset `index` into the live settings and activate it
    pub fn load_preset(&mut self, index: u8) -> Result<()> {
        check_preset(index, PRESET_FIRST_WRITABLE)?;
        self.run(SessionState::Transferring, |s| s.command(CMD_LOAD_PRESET, index))?;
        log::info!("Loaded preset {}", index);
        Ok(())
    }

    /// Store the live settings in preset `index`
    ///
    /// The index is checked before any I/O.
    pub fn store_preset(&mut self, index: u8) -> Result<()> {
        check_preset(index, PRESET_FIRST_WRITABLE)?;
        self.run(SessionState::Transferring, |s| s.command(CMD_STORE_PRESET, index))?;
        log::info!("Stored settings in preset {}", index);
        Ok(())
    }

    /// Reboot the board
    ///
    /// The session is disconnected afterwards.
    pub fn reboot(&mut self) -> Result<()> {
        self.run(SessionState::Transferring, |s| s.command(CMD_REBOOT, 1))?;
        log::info!("Baseband reboot requested");
        self.disconnect();
        Ok(())
    }

    /// Pulse a GPIO on the adapter, typically wired to the board's reset
    ///
    /// Works without an identified device.
    pub fn pulse_gpio(&mut self, pin: u8, active_low: bool) -> Result<()> {
        let duration = self.config.gpio_pulse();
        log::info!(
            "Pulsing GPIO {} {} for {:?}",
            pin,
            if active_low { "low" } else { "high" },
            duration
        );
        self.transport.pulse_gpio(pin, active_low, duration)?;
        Ok(())
    }

    /// Read the flash identification bytes
    pub fn flash_id(&mut self) -> Result<[u8; 3]> {
        let timing = self.config.flash_timing();
        self.run(SessionState::Transferring, |s| {
            FlashTunnel::new(&mut s.transport, timing).read_id()
        })
    }

    /// Write a firmware image to the upgrade region
    ///
    /// The image is sent in page-sized chunks; each chunk must be
    /// acknowledged by the flash before the next is sent. The first
    /// unacknowledged chunk aborts with [`Error::FirmwareUpgrade`]. Each
    /// erase, program and read step gets the usual one retry after a bus
    /// reset; no rollback is attempted.
    pub fn upgrade_firmware(
        &mut self,
        image: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> Result<()> {
        flash::validate_image(image)?;
        self.ensure_ready()?;
        self.state = SessionState::Upgrading;

        let result = self.upgrade(image, progress);
        self.settle(&result);
        if result.is_ok() {
            log::info!("Firmware upgrade of {} bytes complete", image.len());
        }
        result
    }

    /// Read back the whole upgrade region
    pub fn download_firmware(&mut self, progress: &mut dyn FlashProgress) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        self.state = SessionState::Transferring;

        let total = (flash::UPGRADE_END - flash::UPGRADE_START + 1) as usize;
        let result = self.read_region(flash::UPGRADE_START, total, progress);
        self.settle(&result);
        if result.is_ok() {
            progress.complete();
        }
        result
    }

    fn read_region(
        &mut self,
        start: u32,
        len: usize,
        progress: &mut dyn FlashProgress,
    ) -> Result<Vec<u8>> {
        progress.reading(len);
        let mut data = vec![0u8; len];
        for (i, block) in data.chunks_mut(flash::READ_BLOCK_SIZE).enumerate() {
            let address = start + (i * flash::READ_BLOCK_SIZE) as u32;
            self.flash_step(|tunnel| tunnel.read(address, block))?;
            progress.read_progress((i * flash::READ_BLOCK_SIZE + block.len()).min(len));
        }
        Ok(data)
    }

    fn upgrade(&mut self, image: &[u8], progress: &mut dyn FlashProgress) -> Result<()> {
        let id = self.flash_step(|tunnel| tunnel.read_id())?;
        log::debug!("Flash ID {:02X} {:02X} {:02X}", id[0], id[1], id[2]);

        let sectors =
            ((flash::UPGRADE_END + 1 - flash::UPGRADE_START) / flash::SECTOR_SIZE) as usize;
        log::info!(
            "Erasing flash from 0x{:06X} to 0x{:06X}",
            flash::UPGRADE_START,
            flash::UPGRADE_END
        );
        progress.erasing(sectors, sectors * flash::SECTOR_SIZE as usize);
        for i in 0..sectors {
            let sector = flash::UPGRADE_START + i as u32 * flash::SECTOR_SIZE;
            self.flash_step(|tunnel| tunnel.erase_sector(sector))?;
            progress.erase_progress(i + 1);
        }

        log::info!("Writing {} bytes", image.len());
        progress.writing(image.len());
        for (i, chunk) in image.chunks(flash::PAGE_SIZE).enumerate() {
            let address = flash::UPGRADE_START + (i * flash::PAGE_SIZE) as u32;
            // Reprogramming a page with the same data leaves it unchanged
            self.flash_step(|tunnel| tunnel.program_page(address, chunk))?;
            progress.write_progress(i * flash::PAGE_SIZE + chunk.len());
        }

        if self.config.verify_firmware {
            log::info!("Verifying");
            let readback = self.read_region(flash::UPGRADE_START, image.len(), progress)?;
            if let Some(offset) = readback.iter().zip(image).position(|(a, b)| a != b) {
                return Err(Error::FirmwareUpgrade {
                    address: flash::UPGRADE_START + offset as u32,
                    failure: UpgradeFailure::VerifyMismatch,
                });
            }
        }

        progress.complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_merges_nearby_spans() {
        let spans = vec![0x1030..0x1032, 0x100C..0x100E, 0x100E..0x1010, 0x1020..0x1022];
        assert_eq!(
            coalesce(spans.clone(), 0),
            vec![0x100C..0x1010, 0x1020..0x1022, 0x1030..0x1032]
        );
        assert_eq!(coalesce(spans, 16), vec![0x100C..0x1032]);
    }

    #[test]
    fn preset_range() {
        assert!(check_preset(0, PRESET_FIRST_WRITABLE).is_err());
        assert!(check_preset(1, PRESET_FIRST_WRITABLE).is_ok());
        assert!(check_preset(31, PRESET_FIRST_WRITABLE).is_ok());
        assert!(check_preset(32, 0).is_err());
        assert!(check_preset(0, 0).is_ok());
    }

    #[test]
    fn preset_flags() {
        let flags = PresetFlags(0b1001);
        assert!(flags.is_used(0));
        assert!(!flags.is_used(1));
        assert_eq!(flags.used().collect::<Vec<_>>(), vec![0, 3]);
        assert!(!flags.is_used(40));
    }

    #[test]
    fn info_display() {
        let info = DeviceInfo::from_bytes([2, 7, 3, 1]);
        assert_eq!(info.sw_version(), "1.3");
        assert_eq!(info.to_string(), "hw 2, fpga 7, sw 1.3");
        let boot = DeviceInfo::from_bytes([2, 7, 0, 0]);
        assert!(boot.is_bootloader());
    }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let cfg: SessionConfig =
            serde_json::from_value(serde_json::json!({"poll_interval_ms": 1})).unwrap();
        assert_eq!(cfg.poll_interval_ms, 1);
        assert_eq!(cfg.command_timeout_ms, 5000);
        assert!(cfg.verify_firmware);
    }
}
