//! Firmware upgrade and download

use super::{BoardSession, CmdResult};
use baseband_core::FlashProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;

/// Progress bars for the erase, write and read phases
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new() -> Self {
        Self { bar: None }
    }

    fn start(&mut self, len: u64, unit: &str, message: &'static str) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
        let template = format!(
            "{{msg:8}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {} ({{eta}})",
            unit
        );
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar().template(&template) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(message);
        self.bar = Some(bar);
    }

    fn set(&self, pos: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(pos as u64);
        }
    }
}

impl FlashProgress for BarProgress {
    fn erasing(&mut self, sectors: usize, _bytes: usize) {
        self.start(sectors as u64, "{pos}/{len} sectors", "Erasing");
    }

    fn erase_progress(&mut self, sectors_erased: usize) {
        self.set(sectors_erased);
    }

    fn writing(&mut self, total_bytes: usize) {
        self.start(total_bytes as u64, "{bytes}/{total_bytes}", "Writing");
    }

    fn write_progress(&mut self, bytes_written: usize) {
        self.set(bytes_written);
    }

    fn reading(&mut self, total_bytes: usize) {
        self.start(total_bytes as u64, "{bytes}/{total_bytes}", "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        self.set(bytes_read);
    }

    fn complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message("Done");
        }
    }
}

/// Write `path` to the upgrade region
pub fn cmd_upgrade(session: &mut BoardSession, path: &Path) -> CmdResult {
    let image = fs::read(path)?;
    println!("Upgrading firmware with {} ({} bytes)", path.display(), image.len());

    let mut progress = BarProgress::new();
    let result = session.upgrade_firmware(&image, &mut progress);
    if let Some(bar) = progress.bar.take() {
        bar.abandon();
    }
    result?;

    println!("Firmware upgrade complete, reboot the baseband to start the new image");
    Ok(())
}

/// Save the upgrade region to `path`
pub fn cmd_download_firmware(session: &mut BoardSession, path: &Path) -> CmdResult {
    let mut progress = BarProgress::new();
    let data = session.download_firmware(&mut progress)?;
    fs::write(path, &data)?;
    println!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
