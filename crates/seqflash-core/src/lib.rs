//! seqflash-core - Core library for sequential device provisioning
//!
//! This crate holds everything about a provisioning run that does not touch
//! hardware directly: the flash image set and build-layout detection, the
//! identity rule table used to scrape device identity from console output,
//! the attempt records and result sink, and the device lifecycle controller.
//!
//! Hardware access is behind three traits so backends live in their own
//! crates:
//!
//! - [`lifecycle::PortMonitor`] - presence/absence sensing of the port
//! - [`lifecycle::ImageProgrammer`] - erase and write via an external tool
//! - [`lifecycle::IdentityReader`] - reset the device and scan its console
//!
//! # Example
//!
//! ```ignore
//! use seqflash_core::lifecycle::{Controller, RunSettings};
//!
//! let mut controller = Controller::new(monitor, programmer, reader, settings);
//! let session = controller.run(&mut ledger);
//! seqflash_core::sink::write_summary(&session.records, &paths.summary)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod identity;
pub mod image;
pub mod lifecycle;
pub mod record;
pub mod sink;

pub use error::{Error, Result, StepError};
