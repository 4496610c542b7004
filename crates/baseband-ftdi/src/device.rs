//! FT232H MPSSE I2C device implementation
//!
//! This module provides the `Ft232h` struct. It speaks the MPSSE protocol
//! directly over raw USB bulk transfers via `nusb` and implements the
//! baseband [`Transport`] trait on top of it.

use std::time::{Duration, Instant};

use baseband_core::protocol::DEFAULT_SLAVE_ADDRESS;
use baseband_core::{Transport, TransportError, TransportFeatures};
use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{FtdiError, Result};
use crate::protocol::*;

/// Configuration for opening an FT232H
#[derive(Debug, Clone)]
pub struct FtdiConfig {
    /// I2C clock in Hz
    pub frequency: u32,
    /// Honour clock stretching through adaptive clocking on AD7
    pub clock_stretching: bool,
    /// USB latency timer in milliseconds
    pub latency_ms: u8,
    /// USB serial number filter
    pub serial: Option<String>,
    /// USB product string filter
    pub description: Option<String>,
    /// Which of several matching adapters to open
    pub index: usize,
    /// 7-bit slave address of the baseband
    pub address: u8,
    /// Longest wait for the adapter to answer
    pub timeout: Duration,
}

impl Default for FtdiConfig {
    fn default() -> Self {
        FtdiConfig {
            frequency: DEFAULT_FREQUENCY,
            clock_stretching: true,
            latency_ms: 4,
            serial: None,
            description: None,
            index: 0,
            address: DEFAULT_SLAVE_ADDRESS,
            timeout: Duration::from_secs(1),
        }
    }
}

impl FtdiConfig {
    /// Set the bus clock
    pub fn frequency(mut self, frequency: u32) -> Result<Self> {
        if clock_divisor(frequency).is_none() {
            return Err(FtdiError::InvalidParameter(format!(
                "Invalid frequency {} Hz: must be between 306 and {}",
                frequency, MAX_FREQUENCY
            )));
        }
        self.frequency = frequency;
        Ok(self)
    }

    /// Set the 7-bit slave address
    pub fn address(mut self, address: u8) -> Result<Self> {
        if !(0x08..=0x77).contains(&address) {
            return Err(FtdiError::InvalidParameter(format!(
                "Invalid I2C address 0x{:02X}: must be 0x08-0x77",
                address
            )));
        }
        self.address = address;
        Ok(self)
    }

    /// Set the USB latency timer
    pub fn latency(mut self, latency_ms: u8) -> Result<Self> {
        if latency_ms == 0 {
            return Err(FtdiError::InvalidParameter(
                "Latency timer must be at least 1 ms".into(),
            ));
        }
        self.latency_ms = latency_ms;
        Ok(self)
    }

    fn matches(&self, device: &nusb::DeviceInfo) -> bool {
        device.vendor_id() == FTDI_VID
            && device.product_id() == FTDI_FT232H_PID
            && self
                .serial
                .as_deref()
                .is_none_or(|s| device.serial_number() == Some(s))
            && self
                .description
                .as_deref()
                .is_none_or(|d| device.product_string() == Some(d))
    }
}

/// FT232H driving the baseband's I2C bus
pub struct Ft232h {
    /// USB interface handle (used for control transfers and keeping the claim alive)
    interface: nusb::Interface,
    /// Bulk OUT endpoint for MPSSE commands
    out_ep: Endpoint<Bulk, Out>,
    /// Bulk IN endpoint for MPSSE responses
    in_ep: Endpoint<Bulk, In>,
    config: FtdiConfig,
    gpio: PinState,
}

impl Ft232h {
    /// Open an FT232H with the given configuration
    pub fn open(config: &FtdiConfig) -> Result<Self> {
        log::debug!(
            "Looking for FT232H VID={:04X} PID={:04X}",
            FTDI_VID,
            FTDI_FT232H_PID
        );

        let device_info = nusb::list_devices()
            .wait()?
            .filter(|d| config.matches(d))
            .nth(config.index)
            .ok_or_else(|| {
                FtdiError::DeviceNotFound(match (&config.serial, config.index) {
                    (Some(s), _) => format!(" with serial {}", s),
                    (None, 0) => String::new(),
                    (None, i) => format!(" at index {}", i),
                })
            })?;

        log::info!(
            "Opening FT232H at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| FtdiError::OpenFailed(e.to_string()))?;
        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| FtdiError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Bulk, Out>(FTDI_WRITE_EP)
            .map_err(|e| FtdiError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(FTDI_READ_EP)
            .map_err(|e| FtdiError::ClaimFailed(e.to_string()))?;

        let mut ft = Ft232h {
            interface,
            out_ep,
            in_ep,
            config: config.clone(),
            gpio: PinState::default(),
        };
        ft.setup()?;

        log::info!(
            "FT232H configured for I2C at {} Hz, slave 0x{:02X}{}",
            clock_divisor(config.frequency).map_or(config.frequency, actual_frequency),
            config.address,
            if config.clock_stretching {
                ", clock stretching on"
            } else {
                ""
            }
        );
        Ok(ft)
    }

    /// Put the chip into MPSSE mode and program the I2C clock
    fn setup(&mut self) -> Result<()> {
        self.control_out(FTDI_REQUEST_RESET, FTDI_RESET_SIO)?;
        self.control_out(FTDI_REQUEST_SET_LATENCY, self.config.latency_ms as u16)?;
        self.control_out(FTDI_REQUEST_SET_BITMODE, (FTDI_BITMODE_RESET as u16) << 8)?;
        self.control_out(FTDI_REQUEST_SET_BITMODE, (FTDI_BITMODE_MPSSE as u16) << 8)?;
        self.control_out(FTDI_REQUEST_RESET, FTDI_RESET_PURGE_RX)?;
        self.control_out(FTDI_REQUEST_RESET, FTDI_RESET_PURGE_TX)?;

        self.synchronise()?;

        let divisor = clock_divisor(self.config.frequency).ok_or_else(|| {
            FtdiError::InvalidParameter(format!("frequency {}", self.config.frequency))
        })?;
        log::debug!(
            "Clock divisor {} ({} Hz)",
            divisor,
            actual_frequency(divisor)
        );

        let mut cmds = Commands::new(self.gpio);
        cmds.idle();
        let mut buf = vec![
            DIS_DIV_5,
            EN_3_PHASE,
            if self.config.clock_stretching {
                CLK_ADAPTIVE
            } else {
                CLK_NO_ADAPTIVE
            },
            TCK_DIVISOR,
            (divisor & 0xFF) as u8,
            (divisor >> 8) as u8,
            LOOPBACK_END,
            DRIVE_ZERO,
            PIN_SCL | PIN_SDA_OUT,
            0x00,
        ];
        for (segment, _) in cmds.finish() {
            buf.extend_from_slice(&segment);
        }
        self.usb_write(&buf).map_err(|e| FtdiError::ConfigFailed(e.to_string()))?;
        Ok(())
    }

    /// Send a bogus opcode and wait for the bad-command echo
    fn synchronise(&mut self) -> Result<()> {
        self.usb_write(&[MPSSE_BOGUS, SEND_IMMEDIATE])
            .map_err(|e| FtdiError::SyncFailed(e.to_string()))?;
        let echo = self
            .usb_read(2)
            .map_err(|e| FtdiError::SyncFailed(e.to_string()))?;
        if echo != [MPSSE_BAD_COMMAND, MPSSE_BOGUS] {
            return Err(FtdiError::SyncFailed(format!("got {:02X?}", echo)));
        }
        log::debug!("MPSSE synchronised");
        Ok(())
    }

    /// Send a vendor control OUT transfer to interface A
    fn control_out(&self, request: u8, value: u16) -> Result<()> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: FTDI_INTERFACE_A,
                    data: &[],
                },
                Duration::from_secs(5),
            )
            .wait()
            .map_err(|e| FtdiError::ConfigFailed(format!("Control transfer failed: {}", e)))?;
        Ok(())
    }

    /// Write MPSSE commands to the bulk OUT endpoint
    fn usb_write(&mut self, data: &[u8]) -> std::result::Result<(), TransportError> {
        self.out_ep.submit(Buffer::from(data.to_vec()));

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

        log::trace!("USB write {} bytes", data.len());
        Ok(())
    }

    /// Read `len` payload bytes from the bulk IN endpoint
    ///
    /// FTDI devices prepend 2 modem status bytes to every packet; they are
    /// stripped here.
    fn usb_read(&mut self, len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        let mut result = Vec::with_capacity(len);
        let max_packet_size = self.in_ep.max_packet_size();
        if max_packet_size <= MODEM_STATUS_SIZE {
            return Err(TransportError::Usb(format!(
                "max packet size {} too small",
                max_packet_size
            )));
        }
        let deadline = Instant::now() + self.config.timeout;

        while result.len() < len {
            let remaining = len - result.len();
            let request_len = remaining
                .div_ceil(max_packet_size - MODEM_STATUS_SIZE)
                .max(1)
                * max_packet_size;
            let mut buf = Buffer::new(request_len);
            buf.set_requested_len(request_len);
            self.in_ep.submit(buf);

            let wait = deadline.saturating_duration_since(Instant::now());
            let completion = match self.in_ep.wait_next_complete(wait) {
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
            for packet in received.chunks(max_packet_size) {
                if packet.len() > MODEM_STATUS_SIZE {
                    let payload = &packet[MODEM_STATUS_SIZE..];
                    let take = payload.len().min(len - result.len());
                    result.extend_from_slice(&payload[..take]);
                }
            }

            if result.len() < len && Instant::now() >= deadline {
                return Err(TransportError::ShortRead {
                    expected: len,
                    got: result.len(),
                });
            }
        }

        log::trace!("USB read {} bytes (payload)", result.len());
        Ok(result)
    }

    /// Cancel and drain all pending transfers on both endpoints.
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

    /// Run a command stream and collect its responses
    fn execute(&mut self, cmds: Commands) -> std::result::Result<Vec<u8>, TransportError> {
        let mut responses = Vec::with_capacity(cmds.responses());
        for (segment, expected) in cmds.finish() {
            self.usb_write(&segment)?;
            if expected > 0 {
                responses.extend(self.usb_read(expected)?);
            }
        }
        Ok(responses)
    }

    /// Release the bus after a NACK so the next transaction starts clean
    fn abort(&mut self) {
        let mut cmds = Commands::new(self.gpio);
        cmds.stop();
        if let Err(e) = self.execute(cmds) {
            log::warn!("Failed to send STOP after NACK: {}", e);
        }
    }

    fn check_acks(
        &mut self,
        acks: &[u8],
        register: u16,
    ) -> std::result::Result<(), TransportError> {
        if let Some(i) = first_nack(acks) {
            log::trace!(
                "NACK on byte {} of transaction at 0x{:04X}",
                i,
                register
            );
            self.abort();
            return Err(TransportError::Nack { address: register });
        }
        Ok(())
    }

    /// Release the I2C lines, leaving driven GPIOs at their level
    fn release_pins(&mut self) -> std::result::Result<(), TransportError> {
        self.usb_write(&[SET_BITS_LOW, self.gpio.value, self.gpio.direction])
    }

    /// Drive `pin` as an output at `high`
    fn set_gpio(&mut self, pin: u8, high: bool) -> std::result::Result<(), TransportError> {
        self.gpio.drive(pin, high);
        let mut cmds = Commands::new(self.gpio);
        cmds.idle();
        self.execute(cmds).map(|_| ())
    }

    /// List attached FT232H adapters
    pub fn list_devices() -> Result<Vec<FtdiDeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()?
            .filter(|d| d.vendor_id() == FTDI_VID && d.product_id() == FTDI_FT232H_PID)
            .map(|d| FtdiDeviceInfo {
                bus: d.busnum(),
                address: d.device_address(),
                serial: d.serial_number().map(str::to_string),
                description: d.product_string().map(str::to_string),
            })
            .collect();
        Ok(devices)
    }
}

impl Drop for Ft232h {
    fn drop(&mut self) {
        // Release the I2C lines on close
        if let Err(e) = self.release_pins() {
            log::warn!("Failed to release pins on close: {}", e);
        }
    }
}

impl Transport for Ft232h {
    fn name(&self) -> &str {
        "ftdi"
    }

    fn features(&self) -> TransportFeatures {
        let mut features = TransportFeatures::REPEATED_START
            | TransportFeatures::GPIO
            | TransportFeatures::BUS_RECOVERY;
        if self.config.clock_stretching {
            features |= TransportFeatures::CLOCK_STRETCHING;
        }
        features
    }

    fn max_transfer_len(&self) -> usize {
        256
    }

    fn write(&mut self, address: u16, data: &[u8]) -> std::result::Result<(), TransportError> {
        log::trace!("I2C write 0x{:04X} {} bytes", address, data.len());
        let cmds = write_transaction(self.config.address, address, data, self.gpio);
        let acks = self.execute(cmds)?;
        self.check_acks(&acks, address)
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
        let cmds = read_transaction(self.config.address, address, data, buf.len(), true, self.gpio);
        let response = self.execute(cmds)?;
        let acks = 3 + data.len() + 1;
        if response.len() != acks + buf.len() {
            return Err(TransportError::ShortRead {
                expected: acks + buf.len(),
                got: response.len(),
            });
        }
        self.check_acks(&response[..acks], address)?;
        buf.copy_from_slice(&response[acks..]);
        Ok(())
    }

    fn pulse_gpio(
        &mut self,
        pin: u8,
        active_low: bool,
        duration: Duration,
    ) -> std::result::Result<(), TransportError> {
        if !GPIO_PINS.contains(&pin) {
            return Err(TransportError::InvalidParameter(format!(
                "GPIO {} not available on FT232H (use AD{}..AD{})",
                pin,
                GPIO_PINS.start(),
                GPIO_PINS.end()
            )));
        }
        log::debug!("Driving AD{} {}", pin, if active_low { "low" } else { "high" });
        self.set_gpio(pin, !active_low)?;
        std::thread::sleep(duration);
        self.set_gpio(pin, active_low)?;
        log::debug!("AD{} back {}", pin, if active_low { "high" } else { "low" });
        Ok(())
    }

    fn recover_bus(&mut self) -> std::result::Result<(), TransportError> {
        log::debug!("Recovering I2C bus");
        self.drain_all_pending();
        if let Err(e) = self.control_out(FTDI_REQUEST_RESET, FTDI_RESET_PURGE_RX) {
            log::warn!("Failed to purge receive buffer: {}", e);
        }

        let mut cmds = Commands::new(self.gpio);
        cmds.clock_out_stuck_slave();
        cmds.stop();
        cmds.sample_pins();
        let pins = self.execute(cmds)?;

        match pins.first() {
            Some(&p) if p & PIN_SCL != 0 && p & PIN_SDA_IN != 0 => Ok(()),
            Some(&p) => {
                log::error!("I2C lines still low after recovery (pins 0x{:02X})", p);
                Err(TransportError::BusStuck)
            }
            None => Err(TransportError::ShortRead {
                expected: 1,
                got: 0,
            }),
        }
    }
}

/// Information about a connected FT232H
#[derive(Debug, Clone)]
pub struct FtdiDeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// Serial number
    pub serial: Option<String>,
    /// Product string
    pub description: Option<String>,
}

impl std::fmt::Display for FtdiDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FT232H at bus {} address {}",
            self.bus, self.address
        )?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        if let Some(description) = &self.description {
            write!(f, " ({})", description)?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" => Ok(true),
        "0" | "off" | "no" | "false" => Ok(false),
        _ => Err(FtdiError::InvalidParameter(format!(
            "Invalid value '{}' for {}: expected on or off",
            value, key
        ))),
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
        .ok_or_else(|| FtdiError::InvalidParameter(format!("Invalid {} '{}'", key, value)))
}

/// Parse transport options
///
/// Format: "frequency=<Hz>,clock_stretching=<on|off>,latency=<ms>,serial=<serial>,
/// description=<product>,index=<N>,address=<7-bit>,timeout=<ms>"
pub fn parse_options(options: &[(&str, &str)]) -> Result<FtdiConfig> {
    let mut config = FtdiConfig::default();

    for (key, value) in options {
        match *key {
            "frequency" | "freq" => {
                config = config.frequency(parse_number(key, value)?)?;
            }
            "clock_stretching" => {
                config.clock_stretching = parse_bool(key, value)?;
            }
            "latency" => {
                config = config.latency(parse_number(key, value)?)?;
            }
            "serial" => {
                config.serial = Some(value.to_string());
            }
            "description" => {
                config.description = Some(value.to_string());
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
                log::warn!("Unknown FTDI option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let config = parse_options(&[]).unwrap();
        assert_eq!(config.frequency, 50_000);
        assert!(config.clock_stretching);
        assert_eq!(config.latency_ms, 4);
        assert_eq!(config.address, 0x58);
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[
            ("frequency", "100000"),
            ("clock_stretching", "off"),
            ("serial", "FT1234"),
            ("address", "0x59"),
            ("index", "1"),
        ])
        .unwrap();
        assert_eq!(config.frequency, 100_000);
        assert!(!config.clock_stretching);
        assert_eq!(config.serial.as_deref(), Some("FT1234"));
        assert_eq!(config.address, 0x59);
        assert_eq!(config.index, 1);
    }

    #[test]
    fn test_invalid_options() {
        assert!(parse_options(&[("frequency", "5000000")]).is_err());
        assert!(parse_options(&[("frequency", "fast")]).is_err());
        assert!(parse_options(&[("address", "0x80")]).is_err());
        assert!(parse_options(&[("latency", "0")]).is_err());
        assert!(parse_options(&[("clock_stretching", "maybe")]).is_err());
    }
}
