//! Flash SPI tunnel
//!
//! The board's FPGA acts as SPI master for its configuration flash
//! (an M25P80, 1 MiB). The host drives it through the register window at
//! 0x7000: the low twelve address bits give the number of SPI bytes to
//! clock (opcode, address, payload and read-back together), the payload
//! starts with the opcode and an optional 24-bit big-endian address, and
//! reads are a combined write/read of the same register.
//!
//! Program and erase are confined to the upgrade region in the upper half
//! of the chip; the golden image in the lower half is never touched.

use crate::error::{Error, Result, UpgradeFailure};
use crate::protocol::REG_FLASH;
use crate::transport::Transport;
use std::time::{Duration, Instant};

// ============================================================================
// Geometry
// ============================================================================

/// Flash chip size
pub const FLASH_SIZE: u32 = 0x10_0000;
/// First byte of the upgrade region
pub const UPGRADE_START: u32 = 0x08_0000;
/// Last byte of the upgrade region
pub const UPGRADE_END: u32 = 0x0F_FFFF;
/// Erase granularity
pub const SECTOR_SIZE: u32 = 0x1_0000;
/// Program granularity, and the firmware chunk size
pub const PAGE_SIZE: usize = 256;
/// Block size used when reading the image back
pub const READ_BLOCK_SIZE: usize = 1024;
/// Images must be larger than this
pub const MIN_FIRMWARE_SIZE: usize = 400_000;
/// Images must be smaller than this
pub const MAX_FIRMWARE_SIZE: usize = (UPGRADE_END - UPGRADE_START) as usize;

// ============================================================================
// M25P80 opcodes
// ============================================================================

/// Write Enable
pub const WRITE_ENABLE: u8 = 0x06;
/// Write Disable
pub const WRITE_DISABLE: u8 = 0x04;
/// Read Identification
pub const READ_IDENTIFICATION: u8 = 0x9F;
/// Read Status Register
pub const READ_STATUS_REGISTER: u8 = 0x05;
/// Read Data Bytes
pub const READ_DATA_BYTES: u8 = 0x03;
/// Page Program
pub const PAGE_PROGRAM: u8 = 0x02;
/// Sector Erase (64 KiB)
pub const SECTOR_ERASE: u8 = 0xD8;
/// Bulk Erase. Refused by [`FlashTunnel`].
pub const BULK_ERASE: u8 = 0xC7;

/// Status register: write in progress
pub const STATUS_WIP: u8 = 1 << 0;
/// Status register: write enable latch
pub const STATUS_WEL: u8 = 1 << 1;

/// Whether `opcode` is followed by a 24-bit address
pub const fn has_address(opcode: u8) -> bool {
    matches!(opcode, READ_DATA_BYTES | PAGE_PROGRAM | SECTOR_ERASE)
}

/// Register address for a tunnelled SPI transaction
pub fn tunnel_address(opcode: u8, out_len: usize, in_len: usize) -> Result<u16> {
    let count = 1 + if has_address(opcode) { 3 } else { 0 } + out_len + in_len;
    if count > 0x0FFF {
        return Err(Error::validation(
            "flash transfer length",
            count,
            "tunnel carries at most 4095 bytes",
        ));
    }
    Ok(REG_FLASH + count as u16)
}

/// Check an image against the upgrade region
pub fn validate_image(image: &[u8]) -> Result<()> {
    if image.len() <= MIN_FIRMWARE_SIZE || image.len() >= MAX_FIRMWARE_SIZE {
        return Err(Error::validation(
            "firmware image size",
            image.len(),
            format!(
                "expected more than {} and less than {} bytes",
                MIN_FIRMWARE_SIZE, MAX_FIRMWARE_SIZE
            ),
        ));
    }
    Ok(())
}

fn check_writable(address: u32) -> Result<()> {
    if !(UPGRADE_START..=UPGRADE_END).contains(&address) {
        return Err(Error::validation(
            "flash address",
            format!("0x{:06X}", address),
            "program and erase are limited to the upgrade region",
        ));
    }
    Ok(())
}

/// Timing limits for flash operations
#[derive(Debug, Clone, Copy)]
pub struct FlashTiming {
    /// Longest wait for a page program
    pub page_timeout: Duration,
    /// Longest wait for a sector erase
    pub erase_timeout: Duration,
    /// Pause between status polls during erase
    pub erase_poll: Duration,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(3),
            erase_timeout: Duration::from_secs(15),
            erase_poll: Duration::from_millis(10),
        }
    }
}

/// SPI flash access through the baseband register window
pub struct FlashTunnel<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    timing: FlashTiming,
}

impl<'a, T: Transport + ?Sized> FlashTunnel<'a, T> {
    /// Wrap a transport
    pub fn new(transport: &'a mut T, timing: FlashTiming) -> Self {
        Self { transport, timing }
    }

    /// Issue one SPI transaction
    ///
    /// Refuses bulk erase, addresses past the chip, and program or erase
    /// outside the upgrade region, before any I/O.
    pub fn command(
        &mut self,
        opcode: u8,
        address: Option<u32>,
        out: &[u8],
        read: &mut [u8],
    ) -> Result<()> {
        if opcode == BULK_ERASE {
            return Err(Error::validation(
                "flash opcode",
                format!("0x{:02X}", opcode),
                "bulk erase is not allowed",
            ));
        }
        if has_address(opcode) != address.is_some() {
            return Err(Error::validation(
                "flash opcode",
                format!("0x{:02X}", opcode),
                "address presence does not match opcode",
            ));
        }

        let mut payload = Vec::with_capacity(4 + out.len());
        payload.push(opcode);
        if let Some(addr) = address {
            if addr >= FLASH_SIZE {
                return Err(Error::validation(
                    "flash address",
                    format!("0x{:06X}", addr),
                    "past the end of the chip",
                ));
            }
            if matches!(opcode, PAGE_PROGRAM | SECTOR_ERASE) {
                check_writable(addr)?;
            }
            payload.extend_from_slice(&addr.to_be_bytes()[1..]);
        }
        payload.extend_from_slice(out);

        let register = tunnel_address(opcode, out.len(), read.len())?;
        if read.is_empty() {
            self.transport.write(register, &payload)?;
        } else {
            self.transport.write_read(register, &payload, read)?;
        }
        Ok(())
    }

    /// Manufacturer, memory type and capacity
    pub fn read_id(&mut self) -> Result<[u8; 3]> {
        let mut id = [0u8; 3];
        self.command(READ_IDENTIFICATION, None, &[], &mut id)?;
        Ok(id)
    }

    /// Status register
    pub fn read_status(&mut self) -> Result<u8> {
        let mut status = [0u8; 1];
        self.command(READ_STATUS_REGISTER, None, &[], &mut status)?;
        Ok(status[0])
    }

    /// Read `buf.len()` bytes from `address`
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.command(READ_DATA_BYTES, Some(address), &[], buf)
    }

    /// Set the write enable latch and confirm it took
    fn write_enable(&mut self, address: u32) -> Result<()> {
        self.command(WRITE_ENABLE, None, &[], &mut [])?;
        let status = self.read_status()?;
        if status & STATUS_WEL == 0 {
            return Err(Error::FirmwareUpgrade {
                address,
                failure: UpgradeFailure::WriteEnableRejected,
            });
        }
        Ok(())
    }

    /// Poll until WIP clears, returning the final status
    fn wait_idle(&mut self, address: u32, timeout: Duration, poll: Duration) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.read_status()?;
            if status & STATUS_WIP == 0 {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(Error::FirmwareUpgrade {
                    address,
                    failure: UpgradeFailure::Timeout,
                });
            }
            if !poll.is_zero() {
                std::thread::sleep(poll);
            }
        }
    }

    /// Erase the sector containing `address`
    pub fn erase_sector(&mut self, address: u32) -> Result<()> {
        let sector = address & !(SECTOR_SIZE - 1);
        check_writable(sector)?;
        log::debug!("Erasing flash sector at 0x{:06X}", sector);
        self.write_enable(sector)?;
        self.command(SECTOR_ERASE, Some(sector), &[], &mut [])?;
        self.wait_idle(sector, self.timing.erase_timeout, self.timing.erase_poll)?;
        Ok(())
    }

    /// Program one chunk and check that the chip acknowledged it
    ///
    /// A chunk is acknowledged when the write enable latch was set before
    /// programming, WIP clears within the page timeout, and the latch is
    /// clear afterwards.
    pub fn program_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() > PAGE_SIZE {
            return Err(Error::validation(
                "flash chunk length",
                data.len(),
                format!("expected 1..={}", PAGE_SIZE),
            ));
        }
        check_writable(address)?;
        log::trace!("Programming {} bytes at 0x{:06X}", data.len(), address);
        self.write_enable(address)?;
        self.command(PAGE_PROGRAM, Some(address), data, &mut [])?;
        let status = self.wait_idle(address, self.timing.page_timeout, Duration::ZERO)?;
        if status & STATUS_WEL != 0 {
            return Err(Error::FirmwareUpgrade {
                address,
                failure: UpgradeFailure::NotAcknowledged,
            });
        }
        Ok(())
    }

    /// Clear the write enable latch
    pub fn write_disable(&mut self) -> Result<()> {
        self.command(WRITE_DISABLE, None, &[], &mut [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::TransportFeatures;

    /// Records transactions; status reads return `status`
    struct Recorder {
        log: Vec<(u16, Vec<u8>, usize)>,
        status: u8,
    }

    impl Transport for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn features(&self) -> TransportFeatures {
            TransportFeatures::empty()
        }

        fn write(&mut self, address: u16, data: &[u8]) -> std::result::Result<(), TransportError> {
            self.log.push((address, data.to_vec(), 0));
            Ok(())
        }

        fn write_read(
            &mut self,
            address: u16,
            data: &[u8],
            buf: &mut [u8],
        ) -> std::result::Result<(), TransportError> {
            self.log.push((address, data.to_vec(), buf.len()));
            buf.fill(self.status);
            Ok(())
        }
    }

    fn recorder(status: u8) -> Recorder {
        Recorder {
            log: Vec::new(),
            status,
        }
    }

    #[test]
    fn tunnel_register_counts_spi_bytes() {
        assert_eq!(tunnel_address(WRITE_ENABLE, 0, 0).unwrap(), 0x7001);
        assert_eq!(tunnel_address(READ_STATUS_REGISTER, 0, 1).unwrap(), 0x7002);
        assert_eq!(tunnel_address(PAGE_PROGRAM, 256, 0).unwrap(), 0x7104);
        assert_eq!(tunnel_address(READ_DATA_BYTES, 0, 1024).unwrap(), 0x7404);
        assert!(tunnel_address(READ_DATA_BYTES, 0, 4096).is_err());
    }

    #[test]
    fn read_sends_big_endian_address() {
        let mut t = recorder(0);
        let mut buf = [0u8; 4];
        FlashTunnel::new(&mut t, FlashTiming::default())
            .read(0x08_1234, &mut buf)
            .unwrap();
        assert_eq!(t.log, vec![(0x7008, vec![0x03, 0x08, 0x12, 0x34], 4)]);
    }

    #[test]
    fn refuses_writes_outside_upgrade_region() {
        let mut t = recorder(STATUS_WEL);
        let mut tunnel = FlashTunnel::new(&mut t, FlashTiming::default());
        assert!(matches!(
            tunnel.program_page(0x00_1000, &[0; 16]),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            tunnel.command(SECTOR_ERASE, Some(0x07_0000), &[], &mut []),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            tunnel.command(BULK_ERASE, None, &[], &mut []),
            Err(Error::Validation { .. })
        ));
        assert!(t.log.is_empty());
    }

    #[test]
    fn latched_wel_is_not_acknowledged() {
        // WEL stays set and WIP is clear: programming "finished" without effect
        let mut t = recorder(STATUS_WEL);
        let err = FlashTunnel::new(&mut t, FlashTiming::default())
            .program_page(0x08_0000, &[0xAA; 256])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FirmwareUpgrade {
                address: 0x08_0000,
                failure: UpgradeFailure::NotAcknowledged
            }
        ));
    }

    #[test]
    fn rejected_write_enable_stops_before_program() {
        let mut t = recorder(0);
        let err = FlashTunnel::new(&mut t, FlashTiming::default())
            .program_page(0x08_0000, &[0xAA; 256])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FirmwareUpgrade {
                failure: UpgradeFailure::WriteEnableRejected,
                ..
            }
        ));
        assert!(!t.log.iter().any(|(_, d, _)| d.first() == Some(&PAGE_PROGRAM)));
    }

    #[test]
    fn image_size_limits() {
        assert!(validate_image(&vec![0; MIN_FIRMWARE_SIZE]).is_err());
        assert!(validate_image(&vec![0; MIN_FIRMWARE_SIZE + 1]).is_ok());
        assert!(validate_image(&vec![0; MAX_FIRMWARE_SIZE]).is_err());
    }
}
