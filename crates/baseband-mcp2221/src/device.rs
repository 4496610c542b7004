//! MCP2221A device implementation
//!
//! The chip enumerates as a HID device. Instead of going through a HID
//! library the reports are exchanged directly on the interrupt endpoints
//! via `nusb`, detaching the kernel HID driver first.

use std::time::{Duration, Instant};

use baseband_core::protocol::DEFAULT_SLAVE_ADDRESS;
use baseband_core::{Transport, TransportError, TransportFeatures};
use nusb::descriptors::TransferType;
use nusb::transfer::{Buffer, Direction, In, Interrupt, Out};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{Mcp2221Error, Result};
use crate::protocol::*;

/// Pause between polls of a busy I2C engine
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for opening an MCP2221
#[derive(Debug, Clone)]
pub struct Mcp2221Config {
    /// I2C clock in Hz
    pub frequency: u32,
    /// USB serial number filter
    pub serial: Option<String>,
    /// Which of several matching adapters to open
    pub index: usize,
    /// 7-bit slave address of the baseband
    pub address: u8,
    /// Longest wait for one I2C transfer
    pub timeout: Duration,
}

impl Default for Mcp2221Config {
    fn default() -> Self {
        Mcp2221Config {
            frequency: DEFAULT_FREQUENCY,
            serial: None,
            index: 0,
            address: DEFAULT_SLAVE_ADDRESS,
            timeout: Duration::from_millis(500),
        }
    }
}

impl Mcp2221Config {
    /// Set the bus clock
    pub fn frequency(mut self, frequency: u32) -> Result<Self> {
        if speed_divider(frequency).is_none() {
            return Err(Mcp2221Error::InvalidParameter(format!(
                "Invalid frequency {} Hz: must be between 47000 and {}",
                frequency, MAX_FREQUENCY
            )));
        }
        self.frequency = frequency;
        Ok(self)
    }

    /// Set the 7-bit slave address
    pub fn address(mut self, address: u8) -> Result<Self> {
        if !(0x08..=0x77).contains(&address) {
            return Err(Mcp2221Error::InvalidParameter(format!(
                "Invalid I2C address 0x{:02X}: must be 0x08-0x77",
                address
            )));
        }
        self.address = address;
        Ok(self)
    }
}

/// MCP2221A driving the baseband's I2C bus
pub struct Mcp2221 {
    /// Keeps the interface claimed
    _interface: nusb::Interface,
    out_ep: Endpoint<Interrupt, Out>,
    in_ep: Endpoint<Interrupt, In>,
    config: Mcp2221Config,
}

impl Mcp2221 {
    /// Open an MCP2221 with the given configuration
    pub fn open(config: &Mcp2221Config) -> Result<Self> {
        log::debug!(
            "Looking for MCP2221 VID={:04X} PID={:04X}",
            MCP2221_VID,
            MCP2221_PID
        );

        let device_info = nusb::list_devices()
            .wait()?
            .filter(|d| d.vendor_id() == MCP2221_VID && d.product_id() == MCP2221_PID)
            .filter(|d| {
                config
                    .serial
                    .as_deref()
                    .is_none_or(|s| d.serial_number() == Some(s))
            })
            .nth(config.index)
            .ok_or_else(|| {
                Mcp2221Error::DeviceNotFound(match (&config.serial, config.index) {
                    (Some(s), _) => format!(" with serial {}", s),
                    (None, 0) => String::new(),
                    (None, i) => format!(" at index {}", i),
                })
            })?;

        log::info!(
            "Opening MCP2221 at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| Mcp2221Error::OpenFailed(e.to_string()))?;

        let config_desc = device
            .active_configuration()
            .map_err(|e| Mcp2221Error::OpenFailed(format!("Failed to get config: {}", e)))?;

        // The chip also exposes a CDC serial port; only the HID interface is used
        let mut hid_interface = None;
        for iface in config_desc.interface_alt_settings() {
            if iface.class() != USB_CLASS_HID {
                continue;
            }
            let mut in_ep = None;
            let mut out_ep = None;
            for ep in iface.endpoints() {
                if ep.transfer_type() == TransferType::Interrupt {
                    match ep.direction() {
                        Direction::In => in_ep = Some(ep.address()),
                        Direction::Out => out_ep = Some(ep.address()),
                    }
                }
            }
            if let (Some(i), Some(o)) = (in_ep, out_ep) {
                hid_interface = Some((iface.interface_number(), i, o));
                break;
            }
        }
        let (iface_num, in_addr, out_addr) = hid_interface.ok_or_else(|| {
            Mcp2221Error::NoHidInterface("no interface with interrupt IN and OUT".into())
        })?;

        log::debug!(
            "Using interface {}, IN EP 0x{:02X}, OUT EP 0x{:02X}",
            iface_num,
            in_addr,
            out_addr
        );

        let interface = device
            .detach_and_claim_interface(iface_num)
            .wait()
            .map_err(|e| Mcp2221Error::ClaimFailed(e.to_string()))?;
        let out_ep = interface
            .endpoint::<Interrupt, Out>(out_addr)
            .map_err(|e| Mcp2221Error::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Interrupt, In>(in_addr)
            .map_err(|e| Mcp2221Error::ClaimFailed(e.to_string()))?;

        let mut mcp = Mcp2221 {
            _interface: interface,
            out_ep,
            in_ep,
            config: config.clone(),
        };
        mcp.setup()?;

        log::info!(
            "MCP2221 configured for I2C at {} Hz, slave 0x{:02X}",
            config.frequency,
            config.address
        );
        Ok(mcp)
    }

    /// Cancel any transfer left over from a previous user and set the clock
    fn setup(&mut self) -> Result<()> {
        let divider = speed_divider(self.config.frequency).ok_or_else(|| {
            Mcp2221Error::InvalidParameter(format!("frequency {}", self.config.frequency))
        })?;

        let status = self
            .status(status_report(false, None))
            .map_err(|e| Mcp2221Error::ConfigFailed(e.to_string()))?;
        if status.state != STATE_IDLE {
            log::debug!("I2C engine busy (state 0x{:02X}), cancelling", status.state);
            self.status(status_report(true, None))
                .map_err(|e| Mcp2221Error::ConfigFailed(e.to_string()))?;
        }

        let status = self
            .status(status_report(false, Some(divider)))
            .map_err(|e| Mcp2221Error::ConfigFailed(e.to_string()))?;
        if !status.speed_accepted {
            return Err(Mcp2221Error::ConfigFailed(
                "clock change rejected, the I2C engine is busy".into(),
            ));
        }
        log::debug!("Clock divider {}", divider);
        Ok(())
    }

    /// Send one report and wait for its answer
    fn transfer(&mut self, report: Report) -> std::result::Result<Report, TransportError> {
        self.out_ep.submit(Buffer::from(report.to_vec()));
        let completion = match self.out_ep.wait_next_complete(self.config.timeout) {
            Some(c) => c,
            None => {
                self.drain_all_pending();
                return Err(TransportError::Timeout);
            }
        };
        completion
            .status
            .map_err(|e| TransportError::Usb(e.to_string()))?;

        let mut buf = Buffer::new(REPORT_SIZE);
        buf.set_requested_len(REPORT_SIZE);
        self.in_ep.submit(buf);
        let completion = match self.in_ep.wait_next_complete(self.config.timeout) {
            Some(c) => c,
            None => {
                self.drain_all_pending();
                return Err(TransportError::Timeout);
            }
        };
        completion
            .status
            .map_err(|e| TransportError::Usb(e.to_string()))?;

        let received = &completion.buffer[..completion.actual_len];
        if received.len() != REPORT_SIZE {
            return Err(TransportError::ShortRead {
                expected: REPORT_SIZE,
                got: received.len(),
            });
        }
        if received[0] != report[0] {
            return Err(TransportError::Usb(format!(
                "response to command 0x{:02X} carries 0x{:02X}",
                report[0], received[0]
            )));
        }

        let mut response = [0u8; REPORT_SIZE];
        response.copy_from_slice(received);
        log::trace!(
            "HID 0x{:02X} -> {:02X?}",
            report[0],
            &response[..8]
        );
        Ok(response)
    }

    fn drain_all_pending(&mut self) {
        self.out_ep.cancel_all();
        while self.out_ep.pending() > 0 {
            let _ = self.out_ep.wait_next_complete(Duration::from_secs(1));
        }
        self.in_ep.cancel_all();
        while self.in_ep.pending() > 0 {
            let _ = self.in_ep.wait_next_complete(Duration::from_secs(1));
        }
    }

    fn status(&mut self, report: Report) -> std::result::Result<Status, TransportError> {
        self.transfer(report).map(|r| Status::parse(&r))
    }

    /// Cancel the current transfer after a NACK
    fn abort(&mut self) {
        if let Err(e) = self.status(status_report(true, None)) {
            log::warn!("Failed to cancel I2C transfer: {}", e);
        }
    }

    /// Write the register address and `data`, ending with a STOP unless `command` says otherwise
    fn i2c_write(
        &mut self,
        command: u8,
        register: u16,
        data: &[u8],
    ) -> std::result::Result<(), TransportError> {
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(data);
        let total = u16::try_from(payload.len()).map_err(|_| {
            TransportError::InvalidParameter(format!("{} byte write too long", payload.len()))
        })?;
        let deadline = Instant::now() + self.config.timeout;

        for chunk in payload.chunks(MAX_CHUNK) {
            loop {
                let response = self.transfer(write_report(
                    command,
                    self.config.address,
                    total,
                    chunk,
                ))?;
                if response[1] == RESPONSE_OK {
                    break;
                }
                if Instant::now() >= deadline {
                    log::debug!("I2C engine stayed busy (state 0x{:02X})", response[2]);
                    return Err(TransportError::Timeout);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        loop {
            let status = self.status(status_report(false, None))?;
            if status.address_nack {
                self.abort();
                return Err(TransportError::Nack { address: register });
            }
            if status.state == STATE_IDLE
                || (command == CMD_WRITE_NO_STOP && status.state == STATE_WRITE_NO_STOP)
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::debug!("Write did not complete (state 0x{:02X})", status.state);
                self.abort();
                return Err(TransportError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Read `buf.len()` bytes from the slave
    fn i2c_read(
        &mut self,
        command: u8,
        register: u16,
        buf: &mut [u8],
    ) -> std::result::Result<(), TransportError> {
        let len = u16::try_from(buf.len()).map_err(|_| {
            TransportError::InvalidParameter(format!("{} byte read too long", buf.len()))
        })?;
        let response = self.transfer(read_report(command, self.config.address, len))?;
        if response[1] != RESPONSE_OK {
            self.abort();
            return Err(TransportError::Usb(format!(
                "read rejected (state 0x{:02X})",
                response[2]
            )));
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let response = self.transfer(get_data_report())?;
            if response[1] != RESPONSE_OK {
                if response[1] != GET_DATA_PENDING {
                    self.abort();
                    return Err(TransportError::Usb(format!(
                        "get data failed (0x{:02X})",
                        response[1]
                    )));
                }
                if Instant::now() >= deadline {
                    self.abort();
                    return Err(TransportError::ShortRead {
                        expected: buf.len(),
                        got: filled,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            if response[3] == READ_ERROR {
                self.abort();
                return Err(TransportError::Nack { address: register });
            }
            let n = (response[3] as usize)
                .min(MAX_CHUNK)
                .min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&response[4..4 + n]);
            filled += n;
        }
        Ok(())
    }

    /// Make sure `pin` is designated as GPIO
    fn ensure_gpio(&mut self, pin: u8) -> std::result::Result<(), TransportError> {
        let gp = gp_settings(&self.transfer(get_sram_report())?);
        if is_gpio(&gp, pin) {
            return Ok(());
        }
        log::debug!("Switching GP{} to GPIO (was 0x{:02X})", pin, gp[pin as usize]);
        let response = self.transfer(designate_gpio_report(gp, pin))?;
        if response[1] != RESPONSE_OK {
            return Err(TransportError::Usb(format!("GP{} designation rejected", pin)));
        }
        Ok(())
    }

    fn set_gpio(&mut self, pin: u8, high: bool) -> std::result::Result<(), TransportError> {
        let response = self.transfer(gpio_report(pin, high))?;
        if response[1] != RESPONSE_OK {
            return Err(TransportError::Usb(format!("GP{} update rejected", pin)));
        }
        Ok(())
    }

    /// List attached MCP2221 adapters
    pub fn list_devices() -> Result<Vec<Mcp2221DeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()?
            .filter(|d| d.vendor_id() == MCP2221_VID && d.product_id() == MCP2221_PID)
            .map(|d| Mcp2221DeviceInfo {
                bus: d.busnum(),
                address: d.device_address(),
                serial: d.serial_number().map(str::to_string),
            })
            .collect();
        Ok(devices)
    }
}

impl Transport for Mcp2221 {
    fn name(&self) -> &str {
        "mcp2221"
    }

    fn features(&self) -> TransportFeatures {
        TransportFeatures::CLOCK_STRETCHING
            | TransportFeatures::REPEATED_START
            | TransportFeatures::GPIO
            | TransportFeatures::BUS_RECOVERY
    }

    fn max_transfer_len(&self) -> usize {
        MAX_CHUNK
    }

    fn write(&mut self, address: u16, data: &[u8]) -> std::result::Result<(), TransportError> {
        log::trace!("I2C write 0x{:04X} {} bytes", address, data.len());
        self.i2c_write(CMD_WRITE, address, data)
    }

    fn write_read(
        &mut self,
        address: u16,
        data: &[u8],
        buf: &mut [u8],
    ) -> std::result::Result<(), TransportError> {
        log::trace!(
            "I2C write/read 0x{:04X} {} + {} bytes",
            address,
            data.len(),
            buf.len()
        );
        self.i2c_write(CMD_WRITE_NO_STOP, address, data)?;
        self.i2c_read(CMD_READ_REPEATED, address, buf)
    }

    fn pulse_gpio(
        &mut self,
        pin: u8,
        active_low: bool,
        duration: Duration,
    ) -> std::result::Result<(), TransportError> {
        if !GPIO_PINS.contains(&pin) {
            return Err(TransportError::InvalidParameter(format!(
                "GPIO {} not available on MCP2221 (use GP{}..GP{})",
                pin,
                GPIO_PINS.start(),
                GPIO_PINS.end()
            )));
        }
        self.ensure_gpio(pin)?;
        log::debug!("Driving GP{} {}", pin, if active_low { "low" } else { "high" });
        self.set_gpio(pin, !active_low)?;
        std::thread::sleep(duration);
        self.set_gpio(pin, active_low)?;
        log::debug!("GP{} back {}", pin, if active_low { "high" } else { "low" });
        Ok(())
    }

    fn recover_bus(&mut self) -> std::result::Result<(), TransportError> {
        log::debug!("Recovering I2C bus");
        self.drain_all_pending();
        self.status(status_report(true, None))?;
        std::thread::sleep(POLL_INTERVAL);
        let status = self.status(status_report(false, None))?;
        if status.bus_idle() {
            Ok(())
        } else {
            log::error!(
                "I2C lines still low after cancel (SCL {}, SDA {})",
                status.scl as u8,
                status.sda as u8
            );
            Err(TransportError::BusStuck)
        }
    }
}

/// Information about a connected MCP2221
#[derive(Debug, Clone)]
pub struct Mcp2221DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// Serial number
    pub serial: Option<String>,
}

impl std::fmt::Display for Mcp2221DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MCP2221 at bus {} address {}", self.bus, self.address)?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        Ok(())
    }
}

fn parse_number<T: TryFrom<u64>>(key: &str, value: &str) -> Result<T> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| Mcp2221Error::InvalidParameter(format!("Invalid {} '{}'", key, value)))
}

/// Parse transport options
///
/// Format: "frequency=<Hz>,serial=<serial>,index=<N>,address=<7-bit>,timeout=<ms>"
pub fn parse_options(options: &[(&str, &str)]) -> Result<Mcp2221Config> {
    let mut config = Mcp2221Config::default();

    for (key, value) in options {
        match *key {
            "frequency" | "freq" => {
                config = config.frequency(parse_number(key, value)?)?;
            }
            "serial" => {
                config.serial = Some(value.to_string());
            }
            "index" => {
                config.index = parse_number(key, value)?;
            }
            "address" => {
                config = config.address(parse_number(key, value)?)?;
            }
            "timeout" => {
                config.timeout = Duration::from_millis(parse_number(key, value)?);
            }
            _ => {
                log::warn!("Unknown MCP2221 option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[]).unwrap();
        assert_eq!(config.frequency, 100_000);
        assert_eq!(config.address, 0x58);
        assert!(config.serial.is_none());

        let config = parse_options(&[
            ("frequency", "400000"),
            ("serial", "0001234"),
            ("address", "0x2C"),
            ("timeout", "250"),
        ])
        .unwrap();
        assert_eq!(config.frequency, 400_000);
        assert_eq!(config.serial.as_deref(), Some("0001234"));
        assert_eq!(config.address, 0x2C);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_options() {
        assert!(parse_options(&[("frequency", "1000000")]).is_err());
        assert!(parse_options(&[("frequency", "10000")]).is_err());
        assert!(parse_options(&[("address", "300")]).is_err());
        assert!(parse_options(&[("index", "-1")]).is_err());
    }

    #[test]
    fn test_unknown_option_is_ignored() {
        let config = parse_options(&[("clock_stretching", "off")]).unwrap();
        assert_eq!(config.frequency, DEFAULT_FREQUENCY);
    }
}
