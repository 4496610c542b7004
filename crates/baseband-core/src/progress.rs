//! Progress reporting for long flash operations

/// Progress callback for firmware upgrade and download
///
/// All methods have empty defaults so implementations only override what
/// they display.
pub trait FlashProgress {
    /// Called when starting to erase `sectors` sectors
    fn erasing(&mut self, sectors: usize, bytes: usize) {
        let _ = (sectors, bytes);
    }

    /// Called after each sector is erased
    fn erase_progress(&mut self, sectors_erased: usize) {
        let _ = sectors_erased;
    }

    /// Called when starting to program `total_bytes`
    fn writing(&mut self, total_bytes: usize) {
        let _ = total_bytes;
    }

    /// Called after each acknowledged chunk
    fn write_progress(&mut self, bytes_written: usize) {
        let _ = bytes_written;
    }

    /// Called when starting to read back `total_bytes`
    fn reading(&mut self, total_bytes: usize) {
        let _ = total_bytes;
    }

    /// Called after each block read
    fn read_progress(&mut self, bytes_read: usize) {
        let _ = bytes_read;
    }

    /// Called when the operation has finished
    fn complete(&mut self) {}
}

/// A no-op progress reporter
pub struct NoProgress;

impl FlashProgress for NoProgress {}
