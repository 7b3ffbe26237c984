//! Lifecycle controller tests driven by scripted fake backends

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Local;
use seqflash_core::config::Timing;
use seqflash_core::identity::IdentityResult;
use seqflash_core::image::{FlashImage, FlashImageSet};
use seqflash_core::lifecycle::{
    Controller, DeviceState, IdentityReader, ImageProgrammer, LifecycleObserver, PortMonitor,
    RunEnd, RunSettings, StopSignal,
};
use seqflash_core::record::{
    AttemptRecord, ERR_FIELDS_MISSING, ERR_FLASH_FAILED, ERR_INTERRUPTED, ERR_READ_FAILED,
    WARN_ERASE_FAILED,
};
use seqflash_core::sink::LedgerRow;
use seqflash_core::StepError;

const PORT: &str = "/dev/ttyUSB0";

/// Answers presence probes from a script. When the script runs out it
/// either keeps reporting the device as stuck, or requests a stop.
struct ScriptedMonitor {
    script: VecDeque<bool>,
    stuck_after_script: bool,
    stop: StopSignal,
    probes: usize,
}

impl ScriptedMonitor {
    fn new(script: &[bool], stop: &StopSignal) -> Self {
        Self {
            script: script.iter().copied().collect(),
            stuck_after_script: false,
            stop: stop.clone(),
            probes: 0,
        }
    }

    /// One present probe then one absent probe per device
    fn devices(count: usize, stop: &StopSignal) -> Self {
        let script: Vec<bool> = (0..count).flat_map(|_| [true, false]).collect();
        Self::new(&script, stop)
    }
}

impl PortMonitor for ScriptedMonitor {
    fn is_present(&mut self, port: &str) -> bool {
        assert_eq!(port, PORT);
        self.probes += 1;
        match self.script.pop_front() {
            Some(answer) => answer,
            None if self.stuck_after_script => true,
            None => {
                self.stop.request();
                false
            }
        }
    }
}

#[derive(Default)]
struct FakeProgrammer {
    erase_fails: bool,
    /// Sequence numbers (1-based call index) whose write fails
    failing_writes: Vec<usize>,
    /// Requested while the tool runs, like Ctrl+C from the terminal
    stop_during_erase: Option<StopSignal>,
    stop_during_write: Option<StopSignal>,
    erases: usize,
    writes: usize,
}

impl ImageProgrammer for FakeProgrammer {
    fn erase(&mut self, _port: &str, _chip: &str) -> Result<(), StepError> {
        self.erases += 1;
        if let Some(stop) = &self.stop_during_erase {
            stop.request();
            return Err(StepError::ToolFailed {
                tool: "esptool.py".into(),
                status: "signal: 2 (SIGINT)".into(),
            });
        }
        if self.erase_fails {
            return Err(StepError::ToolFailed {
                tool: "esptool.py".into(),
                status: "exit status: 2".into(),
            });
        }
        Ok(())
    }

    fn write(
        &mut self,
        _port: &str,
        chip: &str,
        images: &FlashImageSet,
        verify: bool,
    ) -> Result<(), StepError> {
        self.writes += 1;
        assert_eq!(chip, "auto");
        assert_eq!(images.len(), 2);
        assert!(verify);
        if let Some(stop) = &self.stop_during_write {
            stop.request();
            return Err(StepError::ToolFailed {
                tool: "esptool.py".into(),
                status: "signal: 2 (SIGINT)".into(),
            });
        }
        if self.failing_writes.contains(&self.writes) {
            return Err(StepError::ToolFailed {
                tool: "esptool.py".into(),
                status: "exit status: 1".into(),
            });
        }
        Ok(())
    }
}

enum Reply {
    Identity(Option<&'static str>, Option<String>),
    Fail,
    Panic,
}

#[derive(Default)]
struct FakeReader {
    replies: VecDeque<Reply>,
    stop_during_read: Option<StopSignal>,
    reads: usize,
}

impl FakeReader {
    fn with(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            stop_during_read: None,
            reads: 0,
        }
    }
}

impl IdentityReader for FakeReader {
    fn read_identity(&mut self, port: &str, timeout: Duration) -> Result<IdentityResult, StepError> {
        self.reads += 1;
        if let Some(stop) = &self.stop_during_read {
            stop.request();
        }
        assert_eq!(timeout, Duration::from_secs(30));
        match self.replies.pop_front().expect("unexpected identity read") {
            Reply::Identity(id, key) => Ok(IdentityResult {
                port: port.to_string(),
                device_id: id.map(String::from),
                public_key: key,
                output_lines: vec!["booting...".into()],
                boot_success: true,
                boot_fault: false,
                timestamp: Local::now(),
            }),
            Reply::Fail => Err(StepError::Serial {
                port: port.to_string(),
                message: "device vanished".into(),
            }),
            Reply::Panic => panic!("reader exploded"),
        }
    }
}

fn key() -> String {
    "f".repeat(64)
}

fn ok(id: &'static str) -> Reply {
    Reply::Identity(Some(id), Some(key()))
}

fn settings(erase: bool) -> RunSettings {
    RunSettings {
        port: PORT.to_string(),
        chip: "auto".to_string(),
        images: FlashImageSet::from_entries([
            FlashImage::new("0x0", "bootloader.bin"),
            FlashImage::new("0x10000", "firmware.bin"),
        ])
        .unwrap(),
        erase,
        verify: true,
        read_timeout: Duration::from_secs(30),
        timing: Timing::immediate(),
    }
}

fn numbers(records: &[AttemptRecord]) -> Vec<u32> {
    records.iter().map(|r| r.device_number).collect()
}

#[test]
fn provisions_devices_in_sequence() {
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(2, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![ok("zap-1A2B3C"), ok("zap-00FF")]),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(session.end, RunEnd::Interrupted);
    assert_eq!(numbers(&session.records), vec![1, 2]);
    assert!(session.records.iter().all(|r| r.success));
    assert_eq!(session.records[0].serial_number.as_deref(), Some("zap-1A2B3C"));
    assert_eq!(
        ledger,
        vec![
            LedgerRow {
                serial: "zap-1A2B3C".into(),
                public_key: key()
            },
            LedgerRow {
                serial: "zap-00FF".into(),
                public_key: key()
            },
        ]
    );
    assert_eq!(controller.programmer().erases, 2);
    assert_eq!(controller.programmer().writes, 2);
}

#[test]
fn flash_failure_skips_identity_read() {
    let stop = StopSignal::new();
    let programmer = FakeProgrammer {
        failing_writes: vec![1],
        ..Default::default()
    };
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        programmer,
        FakeReader::default(),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    let record = &session.records[0];
    assert!(!record.success);
    assert_eq!(record.errors, vec![ERR_FLASH_FAILED.to_string()]);
    assert!(record.serial_number.is_none());
    assert!(record.public_key.is_none());
    assert_eq!(controller.reader().reads, 0);
    assert!(ledger.is_empty());
}

#[test]
fn erase_failure_is_only_a_warning() {
    let stop = StopSignal::new();
    let programmer = FakeProgrammer {
        erase_fails: true,
        ..Default::default()
    };
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        programmer,
        FakeReader::with(vec![ok("zap-1")]),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    let record = &session.records[0];
    assert!(record.success);
    assert_eq!(record.warnings, vec![WARN_ERASE_FAILED.to_string()]);
    assert_eq!(controller.programmer().writes, 1);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn erase_can_be_skipped() {
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![ok("zap-1")]),
        settings(false),
    )
    .with_stop_signal(stop);

    controller.run(&mut Vec::<LedgerRow>::new());
    assert_eq!(controller.programmer().erases, 0);
    assert_eq!(controller.programmer().writes, 1);
}

#[test]
fn missing_field_fails_but_keeps_partial_value() {
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(2, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![
            Reply::Identity(Some("zap-77"), None),
            Reply::Identity(None, Some(key())),
        ]),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(session.records[0].serial_number.as_deref(), Some("zap-77"));
    assert_eq!(session.records[1].public_key, Some(key()));
    for record in &session.records {
        assert!(!record.success);
        assert_eq!(record.errors, vec![ERR_FIELDS_MISSING.to_string()]);
        assert_eq!(record.output_lines, vec!["booting...".to_string()]);
    }
    assert!(ledger.is_empty());
}

#[test]
fn read_failure_is_distinguished_from_missing_fields() {
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![Reply::Fail]),
        settings(true),
    )
    .with_stop_signal(stop);

    let session = controller.run(&mut Vec::<LedgerRow>::new());
    assert_eq!(session.records[0].errors, vec![ERR_READ_FAILED.to_string()]);
    assert!(session.records[0].boot_success.is_none());
    assert!(session.records[0].serial_number.is_none());
    assert!(session.records[0].public_key.is_none());
}

#[test]
fn panic_in_a_step_is_recorded_and_run_continues() {
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(2, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![Reply::Panic, ok("zap-2")]),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(numbers(&session.records), vec![1, 2]);
    assert!(!session.records[0].success);
    assert_eq!(
        session.records[0].errors,
        vec!["Unexpected error: reader exploded".to_string()]
    );
    assert!(session.records[1].success);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn removal_timeout_ends_run_with_stuck_record() {
    let stop = StopSignal::new();
    let mut monitor = ScriptedMonitor::new(&[true, false, true], &stop);
    monitor.stuck_after_script = true;
    let mut controller = Controller::new(
        monitor,
        FakeProgrammer {
            failing_writes: vec![2],
            ..Default::default()
        },
        FakeReader::with(vec![ok("zap-1")]),
        settings(true),
    )
    .with_stop_signal(stop.clone());

    let session = controller.run(&mut Vec::<LedgerRow>::new());

    assert_eq!(session.end, RunEnd::RemovalTimeout);
    assert!(!stop.is_requested());
    assert_eq!(numbers(&session.records), vec![1, 2]);
    assert!(session.records[0].success);
    // The stuck device keeps the outcome it had when the wait began
    assert!(!session.records[1].success);
    assert_eq!(session.records[1].errors, vec![ERR_FLASH_FAILED.to_string()]);
}

#[test]
fn absent_port_blocks_until_interrupted() {
    struct NeverPresent {
        probes: usize,
        stop: StopSignal,
    }

    impl PortMonitor for NeverPresent {
        fn is_present(&mut self, _port: &str) -> bool {
            self.probes += 1;
            if self.probes == 200 {
                self.stop.request();
            }
            false
        }
    }

    let stop = StopSignal::new();
    let mut controller = Controller::new(
        NeverPresent {
            probes: 0,
            stop: stop.clone(),
        },
        FakeProgrammer::default(),
        FakeReader::default(),
        settings(true),
    )
    .with_stop_signal(stop);

    let session = controller.run(&mut Vec::<LedgerRow>::new());
    assert_eq!(session.end, RunEnd::Interrupted);
    assert!(session.records.is_empty());
    assert_eq!(controller.monitor().probes, 200);
    assert_eq!(controller.programmer().writes, 0);
}

#[test]
fn ledger_matches_successes_and_numbers_are_gapless() {
    let stop = StopSignal::new();
    let programmer = FakeProgrammer {
        failing_writes: vec![2, 5],
        ..Default::default()
    };
    let mut controller = Controller::new(
        ScriptedMonitor::devices(6, &stop),
        programmer,
        FakeReader::with(vec![
            ok("zap-1"),
            Reply::Fail,
            ok("zap-4"),
            ok("zap-6"),
        ]),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(numbers(&session.records), vec![1, 2, 3, 4, 5, 6]);
    let successes: Vec<String> = session
        .records
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.serial_number.clone())
        .collect();
    assert_eq!(successes, vec!["zap-1", "zap-4", "zap-6"]);
    let rows: Vec<String> = ledger.iter().map(|r| r.serial.clone()).collect();
    assert_eq!(rows, successes);
}

#[test]
fn observer_sees_state_sequence() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<(u32, DeviceState)>>>);

    impl LifecycleObserver for Recorder {
        fn state_changed(&mut self, device_number: u32, state: DeviceState) {
            self.0.borrow_mut().push((device_number, state));
        }
    }

    let seen = Rc::new(RefCell::new(Vec::new()));
    let stop = StopSignal::new();
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        FakeProgrammer::default(),
        FakeReader::with(vec![ok("zap-1")]),
        settings(true),
    )
    .with_stop_signal(stop)
    .with_observer(Box::new(Recorder(seen.clone())));

    controller.run(&mut Vec::<LedgerRow>::new());

    let states: Vec<DeviceState> = seen.borrow().iter().map(|(_, s)| *s).collect();
    assert_eq!(
        states,
        vec![
            DeviceState::WaitingPresent,
            DeviceState::Connected,
            DeviceState::Erasing,
            DeviceState::Flashing,
            DeviceState::Reading,
            DeviceState::Classifying,
            DeviceState::Succeeded,
            DeviceState::WaitingAbsent,
            DeviceState::WaitingPresent,
        ]
    );
    assert_eq!(seen.borrow().last().map(|(n, _)| *n), Some(2));
}

#[test]
fn stop_during_erase_skips_remaining_steps() {
    let stop = StopSignal::new();
    let programmer = FakeProgrammer {
        stop_during_erase: Some(stop.clone()),
        ..Default::default()
    };
    let mut controller = Controller::new(
        ScriptedMonitor::devices(2, &stop),
        programmer,
        FakeReader::default(),
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(session.end, RunEnd::Interrupted);
    assert_eq!(numbers(&session.records), vec![1]);
    let record = &session.records[0];
    assert!(!record.success);
    assert_eq!(record.errors, vec![ERR_INTERRUPTED.to_string()]);
    assert!(record.warnings.is_empty());
    assert_eq!(controller.programmer().writes, 0);
    assert_eq!(controller.reader().reads, 0);
    assert!(ledger.is_empty());
}

#[test]
fn stop_during_write_is_not_a_flash_failure() {
    let stop = StopSignal::new();
    let programmer = FakeProgrammer {
        stop_during_write: Some(stop.clone()),
        ..Default::default()
    };
    let mut controller = Controller::new(
        ScriptedMonitor::devices(1, &stop),
        programmer,
        FakeReader::default(),
        settings(true),
    )
    .with_stop_signal(stop);

    let session = controller.run(&mut Vec::<LedgerRow>::new());

    assert_eq!(session.end, RunEnd::Interrupted);
    assert_eq!(session.records[0].errors, vec![ERR_INTERRUPTED.to_string()]);
    assert_eq!(controller.programmer().writes, 1);
    assert_eq!(controller.reader().reads, 0);
}

#[test]
fn stop_during_read_still_records_the_device() {
    let stop = StopSignal::new();
    let mut reader = FakeReader::with(vec![ok("zap-1A2B3C"), ok("zap-00FF")]);
    reader.stop_during_read = Some(stop.clone());
    let mut controller = Controller::new(
        ScriptedMonitor::devices(2, &stop),
        FakeProgrammer::default(),
        reader,
        settings(true),
    )
    .with_stop_signal(stop);

    let mut ledger: Vec<LedgerRow> = Vec::new();
    let session = controller.run(&mut ledger);

    assert_eq!(session.end, RunEnd::Interrupted);
    assert_eq!(numbers(&session.records), vec![1]);
    assert!(session.records[0].success);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].serial, "zap-1A2B3C");
}
