//! The device lifecycle controller

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use super::{
    await_absent, await_present, DeviceState, IdentityReader, ImageProgrammer, LifecycleObserver,
    NoopObserver, PortMonitor, Presence, Removal, StopSignal,
};
use crate::config::Timing;
use crate::image::FlashImageSet;
use crate::record::{
    AttemptRecord, ERR_FLASH_FAILED, ERR_INTERRUPTED, ERR_READ_FAILED, WARN_ERASE_FAILED,
};
use crate::sink::Ledger;

/// Everything the controller needs to know about a run
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Port devices are attached to
    pub port: String,
    /// Chip type token passed to the programmer
    pub chip: String,
    /// Images written to every device
    pub images: FlashImageSet,
    /// Erase before writing
    pub erase: bool,
    /// Ask the programmer to verify after writing
    pub verify: bool,
    /// Identity read window
    pub read_timeout: Duration,
    /// Delays and polling
    pub timing: Timing,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Operator requested a stop
    Interrupted,
    /// A device was not removed in time
    RemovalTimeout,
}

/// Result of a run: every attempt in sequence order
#[derive(Debug, Clone)]
pub struct Session {
    /// All attempt records
    pub records: Vec<AttemptRecord>,
    /// Why the run ended
    pub end: RunEnd,
}

/// Drives devices one at a time through erase, write and identity read
pub struct Controller<M, P, R> {
    monitor: M,
    programmer: P,
    reader: R,
    settings: RunSettings,
    stop: StopSignal,
    observer: Box<dyn LifecycleObserver>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<M, P, R> Controller<M, P, R>
where
    M: PortMonitor,
    P: ImageProgrammer,
    R: IdentityReader,
{
    /// Create a controller with no observer and a fresh stop signal
    pub fn new(monitor: M, programmer: P, reader: R, settings: RunSettings) -> Self {
        Self {
            monitor,
            programmer,
            reader,
            settings,
            stop: StopSignal::new(),
            observer: Box::new(NoopObserver),
        }
    }

    /// Use an externally owned stop signal
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Report progress to `observer`
    pub fn with_observer(mut self, observer: Box<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Handle to this controller's stop signal
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The port monitor
    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    /// The programmer backend
    pub fn programmer(&self) -> &P {
        &self.programmer
    }

    /// The identity reader backend
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Run until interrupted or a device is not removed in time
    ///
    /// Successful devices are appended to `ledger` as soon as they are
    /// classified. The returned session holds every attempt, including the
    /// one in flight when the run ended.
    pub fn run(&mut self, ledger: &mut dyn Ledger) -> Session {
        let mut records: Vec<AttemptRecord> = Vec::new();
        let mut sequence: u32 = 0;
        let timing = self.settings.timing.clone();
        let port = self.settings.port.clone();

        let end = loop {
            self.observer
                .state_changed(sequence + 1, DeviceState::WaitingPresent);
            log::info!("--- Waiting for device #{} on {} ---", sequence + 1, port);

            if await_present(&mut self.monitor, &port, timing.poll_interval(), &self.stop)
                == Presence::Interrupted
            {
                break RunEnd::Interrupted;
            }

            sequence += 1;
            self.observer.state_changed(sequence, DeviceState::Connected);
            log::info!(
                "Device #{} detected on {}. Starting flash process...",
                sequence,
                port
            );
            thread::sleep(timing.presence_settle());

            let mut record = AttemptRecord::new(sequence, port.as_str());
            self.process_device(&mut record);

            if record.success {
                if let Err(e) = ledger.append(&record) {
                    record.warn(format!("Failed to append result to ledger: {}", e));
                }
            }
            self.observer.state_changed(
                sequence,
                if record.success {
                    DeviceState::Succeeded
                } else {
                    DeviceState::Failed
                },
            );
            self.observer.cycle_finished(&record);
            records.push(record);

            self.observer
                .state_changed(sequence, DeviceState::WaitingAbsent);
            log::info!("Please disconnect the device from port {}.", port);
            match await_absent(
                &mut self.monitor,
                &port,
                timing.removal_timeout(),
                timing.poll_interval(),
                &self.stop,
            ) {
                Removal::Removed => {
                    log::info!("Device disconnected from {}. Ready for the next one.", port);
                    thread::sleep(timing.post_removal_pause());
                }
                Removal::TimedOut => {
                    log::error!(
                        "Timed out waiting for device on {} to be disconnected. Stopping.",
                        port
                    );
                    break RunEnd::RemovalTimeout;
                }
                Removal::Interrupted => break RunEnd::Interrupted,
            }
        };

        log::info!("Run ended after {} device(s): {:?}", records.len(), end);
        Session { records, end }
    }

    /// Run the per-device steps, converting a panic into a recorded error
    fn process_device(&mut self, record: &mut AttemptRecord) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_steps(record)));
        if let Err(payload) = outcome {
            record.success = false;
            record.error(format!("Unexpected error: {}", panic_message(payload.as_ref())));
        }
    }

    /// Record an interruption if a stop was requested
    ///
    /// Checked between steps: the step in flight always finishes, later
    /// steps are skipped and the outcome of an interrupted step is not
    /// blamed on the device.
    fn interrupted(&self, record: &mut AttemptRecord) -> bool {
        if !self.stop.is_requested() {
            return false;
        }
        record.error(ERR_INTERRUPTED);
        true
    }

    fn run_steps(&mut self, record: &mut AttemptRecord) {
        let settings = &self.settings;
        let number = record.device_number;

        if self.interrupted(record) {
            return;
        }

        if settings.erase {
            self.observer.state_changed(number, DeviceState::Erasing);
            let erased = self.programmer.erase(&settings.port, &settings.chip);
            if self.interrupted(record) {
                return;
            }
            match erased {
                Ok(()) => log::info!("Flash erase completed successfully"),
                Err(e) => {
                    log::warn!("Flash erase failed on {}: {}", settings.port, e);
                    record.warn(WARN_ERASE_FAILED);
                }
            }
        }

        self.observer.state_changed(number, DeviceState::Flashing);
        let written = self.programmer.write(
            &settings.port,
            &settings.chip,
            &settings.images,
            settings.verify,
        );
        if self.interrupted(record) {
            return;
        }
        if let Err(e) = written {
            log::error!("Firmware flash failed on {}: {}", settings.port, e);
            record.error(ERR_FLASH_FAILED);
            return;
        }
        log::info!("Firmware flashed successfully on {}", settings.port);

        thread::sleep(settings.timing.boot_settle());

        self.observer.state_changed(number, DeviceState::Reading);
        let read = self
            .reader
            .read_identity(&settings.port, settings.read_timeout);

        self.observer.state_changed(number, DeviceState::Classifying);
        match read {
            Ok(identity) => {
                record.absorb(identity);
                record.classify();
            }
            Err(e) => {
                log::error!("Serial read error on {}: {}", settings.port, e);
                record.error(ERR_READ_FAILED);
            }
        }
    }
}
