//! Presence and absence waits
//!
//! Both waits are blocking polls with a fixed sleep between probes. Device
//! attach and detach are human-paced, so nothing here is asynchronous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::PortMonitor;

/// Shared flag used to request the run to stop (e.g. from a Ctrl+C handler)
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// A fresh, unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at the next poll
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of [`await_present`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The port is present
    Present,
    /// A stop was requested first
    Interrupted,
}

/// Outcome of [`await_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The port went away
    Removed,
    /// The timeout elapsed with the port still present
    TimedOut,
    /// A stop was requested first
    Interrupted,
}

/// Block until the port is present; there is no timeout
pub fn await_present<M: PortMonitor + ?Sized>(
    monitor: &mut M,
    port: &str,
    poll: Duration,
    stop: &StopSignal,
) -> Presence {
    loop {
        if stop.is_requested() {
            return Presence::Interrupted;
        }
        if monitor.is_present(port) {
            return Presence::Present;
        }
        thread::sleep(poll);
    }
}

/// Block until the port is gone or `timeout` elapses
pub fn await_absent<M: PortMonitor + ?Sized>(
    monitor: &mut M,
    port: &str,
    timeout: Duration,
    poll: Duration,
    stop: &StopSignal,
) -> Removal {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if stop.is_requested() {
            return Removal::Interrupted;
        }
        if !monitor.is_present(port) {
            return Removal::Removed;
        }
        thread::sleep(poll);
    }
    Removal::TimedOut
}
