//! seqflash-serial - Serial port backends for seqflash
//!
//! This crate implements the two lifecycle traits that talk to the serial
//! port directly:
//!
//! - [`SerialPortMonitor`] - presence probe (enumeration plus a brief open)
//! - [`SerialIdentityReader`] - reset the device via DTR and scan its boot
//!   console for identity lines
//!
//! It also provides port enumeration and auto-detection of the USB-UART
//! bridge a device is most likely attached to.
//!
//! # Example
//!
//! ```no_run
//! use seqflash_core::identity::RuleSet;
//! use seqflash_core::lifecycle::IdentityReader;
//! use seqflash_serial::{ResetTiming, SerialIdentityReader};
//! use std::time::Duration;
//!
//! let mut reader = SerialIdentityReader::new(115200, RuleSet::default(), ResetTiming::default());
//! let identity = reader.read_identity("/dev/ttyUSB0", Duration::from_secs(30))?;
//! println!("{:?} {:?}", identity.device_id, identity.public_key);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod discovery;
pub mod error;
pub mod lines;
pub mod monitor;
pub mod reader;

pub use discovery::{enumerate_ports, select_device_port, PortDescription};
pub use error::{Result, SerialError};
pub use monitor::SerialPortMonitor;
pub use reader::{Console, ResetTiming, SerialConsole, SerialIdentityReader};
