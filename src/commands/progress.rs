//! Operator progress display for the provisioning loop

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use seqflash_core::identity::abbreviate_key;
use seqflash_core::lifecycle::{DeviceState, LifecycleObserver};
use seqflash_core::record::AttemptRecord;

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {prefix} {msg}")?)
}

/// Spinner per lifecycle phase plus a banner per finished device
pub struct IndicatifObserver {
    current: Option<ProgressBar>,
}

impl IndicatifObserver {
    pub fn new() -> Self {
        Self { current: None }
    }

    fn spin(&mut self, device_number: u32, message: String) {
        let pb = match self.current.take() {
            Some(pb) => pb,
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
        };
        pb.set_prefix(format!("[#{}]", device_number));
        pb.set_message(message);
        self.current = Some(pb);
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current.take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for IndicatifObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleObserver for IndicatifObserver {
    fn state_changed(&mut self, device_number: u32, state: DeviceState) {
        match state {
            DeviceState::WaitingPresent => {
                self.spin(device_number, "Waiting for device to be connected...".to_string())
            }
            DeviceState::Connected | DeviceState::Classifying => {}
            DeviceState::Erasing
            | DeviceState::Flashing
            | DeviceState::Reading
            | DeviceState::WaitingAbsent => {
                let mut message = state.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                self.spin(device_number, format!("{}...", message))
            }
            DeviceState::Succeeded | DeviceState::Failed => self.finish(),
        }
    }

    fn cycle_finished(&mut self, record: &AttemptRecord) {
        self.finish();
        print_banner(record);
    }
}

fn print_banner(record: &AttemptRecord) {
    println!();
    if record.success {
        println!("Device #{} completed successfully!", record.device_number);
        if let Some(serial) = &record.serial_number {
            println!("  Serial Number: {}", serial);
        }
        if let Some(key) = &record.public_key {
            println!("  Public Key:    {}", abbreviate_key(key));
        }
    } else {
        println!("Device #{} failed!", record.device_number);
        for error in &record.errors {
            println!("  Error: {}", error);
        }
    }
    for warning in &record.warnings {
        println!("  Warning: {}", warning);
    }
    println!();
}
