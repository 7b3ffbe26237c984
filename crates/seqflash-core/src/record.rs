//! Per-device attempt records and the end-of-run tally

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::identity::{abbreviate_key, IdentityResult};

/// Error recorded when the write step fails
pub const ERR_FLASH_FAILED: &str = "Firmware flash failed";
/// Error recorded when the identity read produced nothing
pub const ERR_READ_FAILED: &str = "Failed to read serial output";
/// Error recorded when the read ran but a field is missing
pub const ERR_FIELDS_MISSING: &str = "Could not extract serial number or public key";
/// Error recorded when a stop was requested before the cycle finished
pub const ERR_INTERRUPTED: &str = "Interrupted by operator";
/// Warning recorded when erase fails
pub const WARN_ERASE_FAILED: &str =
    "Flash erase failed, but continuing with flashing (this is normal for fresh devices)";
/// Warning recorded when the device looks like it did not boot
pub const WARN_BOOT_SUSPECT: &str =
    "Device appears to have boot issues - firmware may not be flashed correctly";

/// Outcome of one physical device cycle
///
/// Field names follow the summary file format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based sequence number, gapless for the run
    pub device_number: u32,
    /// Port the device was attached to
    pub port: String,
    /// Both identity fields extracted after a successful write
    pub success: bool,
    /// Extracted device identifier
    pub serial_number: Option<String>,
    /// Extracted public key token
    pub public_key: Option<String>,
    /// Errors in the order they occurred
    pub errors: Vec<String>,
    /// Warnings in the order they occurred
    pub warnings: Vec<String>,
    /// Console lines captured during the identity read
    pub output_lines: Vec<String>,
    /// Healthy-boot marker seen, if a read happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_success: Option<bool>,
    /// When processing of this device started
    pub timestamp: DateTime<Local>,
}

impl AttemptRecord {
    /// Start a record for a newly connected device
    pub fn new(device_number: u32, port: impl Into<String>) -> Self {
        Self {
            device_number,
            port: port.into(),
            success: false,
            serial_number: None,
            public_key: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            output_lines: Vec::new(),
            boot_success: None,
            timestamp: Local::now(),
        }
    }

    /// Record an error and log it for the operator
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("Device #{}: {}", self.device_number, message);
        self.errors.push(message);
    }

    /// Record a warning and log it for the operator
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Device #{}: {}", self.device_number, message);
        self.warnings.push(message);
    }

    /// Copy identity fields and diagnostics from a read
    ///
    /// Partial values are kept even when the cycle fails.
    pub fn absorb(&mut self, identity: IdentityResult) {
        self.serial_number = identity.device_id.clone();
        self.public_key = identity.public_key.clone();
        self.boot_success = Some(identity.boot_success);
        if identity.boot_suspect() {
            self.warn(WARN_BOOT_SUSPECT);
        }
        self.output_lines = identity.output_lines;
    }

    /// Decide the outcome after a read attempt
    pub fn classify(&mut self) {
        self.success = self.serial_number.is_some() && self.public_key.is_some();
        if !self.success {
            self.error(ERR_FIELDS_MISSING);
        }
    }
}

/// A failed device and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDevice {
    /// Sequence number
    pub device_number: u32,
    /// Recorded errors
    pub reasons: Vec<String>,
}

/// A provisioned device for the tally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    /// Sequence number
    pub device_number: u32,
    /// Device identifier
    pub serial_number: String,
    /// Abbreviated public key
    pub key_display: String,
}

/// Aggregate view over a run, derived from the records
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Devices attempted
    pub total: usize,
    /// Devices provisioned
    pub successful: usize,
    /// Devices that failed
    pub failed: usize,
    /// Successful devices in sequence order
    pub provisioned: Vec<ProvisionedDevice>,
    /// Failed devices in sequence order
    pub failures: Vec<FailedDevice>,
}

impl SessionSummary {
    /// Compute the tally from a run's records
    pub fn from_records(records: &[AttemptRecord]) -> Self {
        let provisioned: Vec<ProvisionedDevice> = records
            .iter()
            .filter(|r| r.success)
            .map(|r| ProvisionedDevice {
                device_number: r.device_number,
                serial_number: r.serial_number.clone().unwrap_or_default(),
                key_display: r.public_key.as_deref().map(abbreviate_key).unwrap_or_default(),
            })
            .collect();
        let failures: Vec<FailedDevice> = records
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailedDevice {
                device_number: r.device_number,
                reasons: r.errors.clone(),
            })
            .collect();

        Self {
            total: records.len(),
            successful: provisioned.len(),
            failed: failures.len(),
            provisioned,
            failures,
        }
    }

    /// Success percentage, or `None` for an empty run
    pub fn success_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.successful as f64 / self.total as f64 * 100.0)
        }
    }
}
