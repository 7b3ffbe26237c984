//! esptool command construction and the programmer adapter

use std::path::Path;
use std::thread;
use std::time::Duration;

use seqflash_core::config::ProgrammerSettings;
use seqflash_core::image::FlashImageSet;
use seqflash_core::lifecycle::ImageProgrammer;
use seqflash_core::StepError;

use crate::error::{EsptoolError, Result};
use crate::process::{run_bounded, tail, ProcessOutput};

/// Characters of output shown after a successful erase
const ERASE_TAIL: usize = 200;
/// Characters of output shown after a failed write
const WRITE_TAIL: usize = 500;
/// Characters of output shown for connection probes
const PROBE_TAIL: usize = 300;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const HELP_TIMEOUT: Duration = Duration::from_secs(5);

/// Adapter around the esptool command line
#[derive(Debug, Clone)]
pub struct EspTool {
    settings: ProgrammerSettings,
    baud: u32,
    settle: Duration,
}

impl EspTool {
    /// Adapter running at `baud`, sleeping `settle` before each step
    pub fn new(settings: ProgrammerSettings, baud: u32, settle: Duration) -> Self {
        Self {
            settings,
            baud,
            settle,
        }
    }

    /// Program name or path being invoked
    pub fn program(&self) -> &str {
        &self.settings.tool
    }

    fn connection_args(&self, port: &str, chip: &str) -> Vec<String> {
        vec![
            "--port".to_string(),
            port.to_string(),
            "--baud".to_string(),
            self.baud.to_string(),
            "--chip".to_string(),
            chip.to_string(),
        ]
    }

    /// Arguments for a full-chip erase
    pub fn erase_args(&self, port: &str, chip: &str) -> Vec<String> {
        let mut args = self.connection_args(port, chip);
        args.push("erase_flash".to_string());
        args
    }

    /// Arguments for writing `images`, in set order
    pub fn write_args(
        &self,
        port: &str,
        chip: &str,
        images: &FlashImageSet,
        verify: bool,
    ) -> Vec<String> {
        let mut args = self.connection_args(port, chip);
        args.extend([
            "write_flash".to_string(),
            "--flash_mode".to_string(),
            self.settings.flash_mode.clone(),
            "--flash_freq".to_string(),
            self.settings.flash_freq.clone(),
            "--flash_size".to_string(),
            self.settings.flash_size.clone(),
        ]);
        if verify {
            args.push("--verify".to_string());
        }
        for image in images.iter() {
            args.push(image.address.clone());
            args.push(image.path.display().to_string());
        }
        args
    }

    fn run(&self, args: &[String], timeout: Duration) -> Result<ProcessOutput> {
        run_bounded(&self.settings.tool, args, timeout)
    }

    fn check_status(&self, output: &ProcessOutput) -> Result<()> {
        if output.success() {
            Ok(())
        } else {
            Err(EsptoolError::Failed {
                tool: self.settings.tool.clone(),
                status: output.status.to_string(),
            })
        }
    }

    /// Erase the whole flash
    pub fn erase_flash(&self, port: &str, chip: &str) -> Result<()> {
        log::info!("Erasing flash on {}...", port);
        thread::sleep(self.settle);

        let args = self.erase_args(port, chip);
        let output = self.run(&args, Duration::from_secs(self.settings.erase_timeout_secs))?;
        if let Err(e) = self.check_status(&output) {
            log::warn!("Flash erase failed on {}", port);
            log::info!("STDOUT: {}", output.stdout);
            log::info!("STDERR: {}", output.stderr);
            return Err(e);
        }

        log::info!("Flash erased successfully on {}", port);
        log::info!("Erase output: {}", tail(&output.stdout, ERASE_TAIL));
        Ok(())
    }

    /// Write every image, optionally verifying
    pub fn write_flash(
        &self,
        port: &str,
        chip: &str,
        images: &FlashImageSet,
        verify: bool,
    ) -> Result<()> {
        log::info!("Flashing firmware to {}...", port);
        thread::sleep(self.settle);

        if !port_exists(port) {
            return Err(EsptoolError::PortVanished(port.to_string()));
        }

        for image in images.iter() {
            log::info!("  {}: {}", image.address, image.file_name());
        }

        let args = self.write_args(port, chip, images, verify);
        let output = self.run(&args, Duration::from_secs(self.settings.write_timeout_secs))?;
        if let Err(e) = self.check_status(&output) {
            log::warn!("Firmware flash failed on {}", port);
            log::info!("STDOUT: {}", tail(&output.stdout, WRITE_TAIL));
            log::info!("STDERR: {}", tail(&output.stderr, WRITE_TAIL));
            return Err(e);
        }

        log::info!("Firmware flashed successfully on {}", port);
        Ok(())
    }

    /// Query chip and flash identity without writing anything
    ///
    /// A failing `chip_id` fails the test; `flash_id` is informational.
    pub fn test_connection(&self, port: &str) -> Result<()> {
        let output = self.probe(port, "chip_id")?;
        self.check_status(&output)?;

        let output = self.probe(port, "flash_id")?;
        if let Err(e) = self.check_status(&output) {
            log::warn!("flash_id failed on {}: {}", port, e);
        }
        Ok(())
    }

    fn probe(&self, port: &str, command: &str) -> Result<ProcessOutput> {
        log::info!("Running {} on {}...", command, port);
        let args = vec!["--port".to_string(), port.to_string(), command.to_string()];
        let output = self.run(&args, PROBE_TIMEOUT)?;
        let text = if output.success() {
            &output.stdout
        } else {
            &output.stderr
        };
        log::info!("{} output: {}", command, tail(text, PROBE_TAIL));
        Ok(output)
    }

    /// Check that the tool can be started
    pub fn probe_available(&self) -> Result<()> {
        let output = self.run(&["--help".to_string()], HELP_TIMEOUT)?;
        self.check_status(&output)
    }
}

/// Device paths must still exist; bare names such as `COM3` are trusted
fn port_exists(port: &str) -> bool {
    if port.contains('/') {
        Path::new(port).exists()
    } else {
        true
    }
}

impl ImageProgrammer for EspTool {
    fn erase(&mut self, port: &str, chip: &str) -> std::result::Result<(), StepError> {
        self.erase_flash(port, chip).map_err(|e| e.into_step("erase"))
    }

    fn write(
        &mut self,
        port: &str,
        chip: &str,
        images: &FlashImageSet,
        verify: bool,
    ) -> std::result::Result<(), StepError> {
        self.write_flash(port, chip, images, verify)
            .map_err(|e| e.into_step("write"))
    }
}
