//! Station configuration
//!
//! Built-in defaults can be overridden by a TOML file:
//!
//! ```toml
//! [serial]
//! baud = 115200
//! read_timeout_secs = 30
//!
//! [timing]
//! poll_interval_ms = 500
//! removal_timeout_ms = 120000
//!
//! [programmer]
//! tool = "esptool.py"
//! flash_mode = "dio"
//!
//! [[identity.device_id]]
//! label = "serial number"
//! pattern = 'serial number:\s*(zap-[A-Fa-f0-9]+)'
//! ```
//!
//! Every section and key is optional. Command-line flags are applied on top
//! by the binary after loading.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level station configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Serial console settings
    pub serial: SerialSettings,
    /// Delays, polling and timeouts
    pub timing: Timing,
    /// External programmer invocation
    pub programmer: ProgrammerSettings,
    /// Identity extraction rules
    pub identity: IdentitySettings,
}

impl StationConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Serial console settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSettings {
    /// Baud rate for both the programmer and the console
    pub baud: u32,
    /// How long to scan console output for identity, in seconds
    pub read_timeout_secs: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 115_200,
            read_timeout_secs: 30,
        }
    }
}

impl SerialSettings {
    /// Identity read window
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Delays, polling intervals and timeouts, all in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timing {
    /// Interval between presence probes
    pub poll_interval_ms: u64,
    /// Pause after a device appears before touching it
    pub presence_settle_ms: u64,
    /// Pause before each programmer invocation
    pub tool_settle_ms: u64,
    /// Pause between a successful write and the identity read
    pub boot_settle_ms: u64,
    /// How long to wait for the operator to remove a device
    pub removal_timeout_ms: u64,
    /// Pause after removal before waiting for the next device
    pub post_removal_pause_ms: u64,
    /// Hold time for each reset line transition
    pub reset_hold_ms: u64,
    /// Settle time after the final reset transition
    pub reset_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            presence_settle_ms: 1_000,
            tool_settle_ms: 1_500,
            boot_settle_ms: 2_000,
            removal_timeout_ms: 120_000,
            post_removal_pause_ms: 1_000,
            reset_hold_ms: 100,
            reset_settle_ms: 500,
        }
    }
}

impl Timing {
    /// All delays zero and a short removal timeout; used by tests
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 0,
            presence_settle_ms: 0,
            tool_settle_ms: 0,
            boot_settle_ms: 0,
            removal_timeout_ms: 50,
            post_removal_pause_ms: 0,
            reset_hold_ms: 0,
            reset_settle_ms: 0,
        }
    }

    /// Interval between presence probes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause after a device appears
    pub fn presence_settle(&self) -> Duration {
        Duration::from_millis(self.presence_settle_ms)
    }

    /// Pause before each programmer invocation
    pub fn tool_settle(&self) -> Duration {
        Duration::from_millis(self.tool_settle_ms)
    }

    /// Pause before the identity read
    pub fn boot_settle(&self) -> Duration {
        Duration::from_millis(self.boot_settle_ms)
    }

    /// Removal wait budget
    pub fn removal_timeout(&self) -> Duration {
        Duration::from_millis(self.removal_timeout_ms)
    }

    /// Pause after removal
    pub fn post_removal_pause(&self) -> Duration {
        Duration::from_millis(self.post_removal_pause_ms)
    }

    /// Reset line hold time
    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    /// Settle time after reset
    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

/// External programmer invocation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgrammerSettings {
    /// Program name or path of the flashing tool
    pub tool: String,
    /// `--flash_mode` value
    pub flash_mode: String,
    /// `--flash_freq` value
    pub flash_freq: String,
    /// `--flash_size` value
    pub flash_size: String,
    /// Erase budget in seconds
    pub erase_timeout_secs: u64,
    /// Write budget in seconds
    pub write_timeout_secs: u64,
}

impl Default for ProgrammerSettings {
    fn default() -> Self {
        Self {
            tool: "esptool.py".to_string(),
            flash_mode: "dio".to_string(),
            flash_freq: "80m".to_string(),
            flash_size: "detect".to_string(),
            erase_timeout_secs: 60,
            write_timeout_secs: 120,
        }
    }
}

/// One configured extraction pattern
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    /// Human-readable label used in logs
    pub label: String,
    /// Regular expression with a single capture group
    pub pattern: String,
}

/// Identity extraction overrides
///
/// An empty list keeps the built-in rules for that field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentitySettings {
    /// Device identifier patterns, highest priority first
    pub device_id: Vec<PatternSpec>,
    /// Public key patterns, highest priority first
    pub public_key: Vec<PatternSpec>,
    /// Substrings that indicate a healthy boot
    pub boot_markers: Vec<String>,
    /// Substrings that indicate a boot failure
    pub fault_markers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recommended_values() {
        let cfg = StationConfig::default();
        assert_eq!(cfg.serial.baud, 115_200);
        assert_eq!(cfg.serial.read_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.timing.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.timing.removal_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.programmer.erase_timeout_secs, 60);
        assert_eq!(cfg.programmer.write_timeout_secs, 120);
        assert!(cfg.identity.device_id.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
[serial]
baud = 460800

[timing]
removal_timeout_ms = 5000

[[identity.device_id]]
label = "uid"
pattern = 'uid=(dev-[0-9a-f]+)'
"#;
        let cfg = StationConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.serial.baud, 460_800);
        assert_eq!(cfg.serial.read_timeout_secs, 30);
        assert_eq!(cfg.timing.removal_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.timing.poll_interval_ms, 500);
        assert_eq!(cfg.identity.device_id.len(), 1);
        assert_eq!(cfg.identity.device_id[0].label, "uid");
        assert_eq!(cfg.programmer.tool, "esptool.py");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(StationConfig::from_toml_str("[serial]\nbaudrate = 9600\n").is_err());
    }
}
