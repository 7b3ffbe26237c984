//! seqflash-esptool - esptool adapter for seqflash
//!
//! [`EspTool`] implements the lifecycle's image programmer by invoking the
//! esptool command line as a child process. Every invocation has a
//! wall-clock budget; a tool that outlives it is killed.
//!
//! # Example
//!
//! ```no_run
//! use seqflash_core::config::ProgrammerSettings;
//! use seqflash_core::image::FlashImageSet;
//! use seqflash_esptool::EspTool;
//! use std::time::Duration;
//!
//! let images = FlashImageSet::from_specs(["0x0:bootloader.bin", "0x10000:firmware.bin"])?;
//! let tool = EspTool::new(ProgrammerSettings::default(), 115200, Duration::from_millis(1500));
//! tool.erase_flash("/dev/ttyUSB0", "auto")?;
//! tool.write_flash("/dev/ttyUSB0", "auto", &images, true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod process;
pub mod tool;

pub use error::{EsptoolError, Result};
pub use tool::EspTool;
