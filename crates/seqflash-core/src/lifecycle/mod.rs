//! Device lifecycle
//!
//! The controller drives one device at a time through:
//!
//! ```text
//! WaitingPresent -> Connected -> Erasing -> Flashing -> Reading -> Classifying
//!     -> Succeeded | Failed -> WaitingAbsent -> WaitingPresent ...
//! ```
//!
//! Hardware is reached only through the traits in this module, which keeps
//! the state machine independent of serial and process plumbing.

mod controller;
mod presence;

pub use controller::{Controller, RunEnd, RunSettings, Session};
pub use presence::{await_absent, await_present, Presence, Removal, StopSignal};

use std::fmt;
use std::time::Duration;

use crate::error::StepError;
use crate::identity::IdentityResult;
use crate::image::FlashImageSet;
use crate::record::AttemptRecord;

/// Presence sensor for a named port
pub trait PortMonitor {
    /// True iff the port is enumerated and can be opened right now
    ///
    /// Never fails: absence and transient inaccessibility both read as
    /// "not present".
    fn is_present(&mut self, port: &str) -> bool;
}

/// Erases and writes device flash through an external programmer
pub trait ImageProgrammer {
    /// Erase the whole flash
    fn erase(&mut self, port: &str, chip: &str) -> Result<(), StepError>;

    /// Write every image in one invocation, optionally verifying
    fn write(
        &mut self,
        port: &str,
        chip: &str,
        images: &FlashImageSet,
        verify: bool,
    ) -> Result<(), StepError>;
}

/// Resets a device and harvests its identity from the console
pub trait IdentityReader {
    /// Read for at most `timeout`; the port must be closed on return
    fn read_identity(&mut self, port: &str, timeout: Duration) -> Result<IdentityResult, StepError>;
}

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Polling for a device to appear
    WaitingPresent,
    /// Device detected, settling
    Connected,
    /// Erasing flash
    Erasing,
    /// Writing images
    Flashing,
    /// Scanning console output
    Reading,
    /// Deciding the outcome
    Classifying,
    /// Cycle succeeded
    Succeeded,
    /// Cycle failed
    Failed,
    /// Polling for the device to be removed
    WaitingAbsent,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingPresent => "waiting for device",
            Self::Connected => "connected",
            Self::Erasing => "erasing flash",
            Self::Flashing => "writing firmware",
            Self::Reading => "reading identity",
            Self::Classifying => "classifying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::WaitingAbsent => "waiting for removal",
        };
        f.write_str(s)
    }
}

/// Receives progress from the controller, e.g. to drive a spinner
///
/// All methods default to doing nothing.
pub trait LifecycleObserver {
    /// The device with this sequence number entered `state`
    ///
    /// While waiting for presence the number is the one the next device
    /// will get.
    fn state_changed(&mut self, _device_number: u32, _state: DeviceState) {}

    /// A cycle finished and its record is final
    fn cycle_finished(&mut self, _record: &AttemptRecord) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}
