//! Identity reader over the device's boot console
//!
//! The device is reset by toggling DTR, any input buffered before the reset
//! is discarded, and the console is scanned line by line until both identity
//! fields are found or the read window closes.

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use seqflash_core::config::Timing;
use seqflash_core::identity::{IdentityResult, IdentityScanner, RuleSet};
use seqflash_core::lifecycle::IdentityReader;
use seqflash_core::StepError;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{Result, SerialError};
use crate::lines::LineBuffer;

/// Per-read poll interval on the console
pub const READ_POLL: Duration = Duration::from_millis(100);

/// Console operations the reader needs
pub trait Console {
    /// Drive the reset control line
    fn set_reset_line(&mut self, asserted: bool) -> Result<()>;

    /// Drop any input received so far
    fn discard_input(&mut self) -> Result<()>;

    /// Read available bytes, waiting at most one poll interval
    ///
    /// Returns 0 if nothing arrived in time.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Reset line hold times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetTiming {
    /// Hold for each intermediate transition
    pub hold: Duration,
    /// Settle after the final transition
    pub settle: Duration,
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self {
            hold: Duration::from_millis(100),
            settle: Duration::from_millis(500),
        }
    }
}

impl From<&Timing> for ResetTiming {
    fn from(timing: &Timing) -> Self {
        Self {
            hold: timing.reset_hold(),
            settle: timing.reset_settle(),
        }
    }
}

/// Serial port console
pub struct SerialConsole {
    port: Box<dyn SerialPort>,
}

impl SerialConsole {
    /// Open `device` at `baud`, 8N1, no flow control
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()
            .map_err(|source| SerialError::OpenFailed {
                port: device.to_string(),
                source,
            })?;

        log::debug!("Opened serial port {} at {} baud", device, baud);
        Ok(Self { port })
    }
}

impl Console for SerialConsole {
    fn set_reset_line(&mut self, asserted: bool) -> Result<()> {
        self.port.write_data_terminal_ready(asserted)?;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        settle_read(self.port.read(buf))
    }
}

/// Map a raw port read onto the console contract
///
/// A poll that timed out, would block, or was cut short by a signal (the
/// Ctrl+C handler) is an empty read, not a failure.
fn settle_read(read: std::io::Result<usize>) -> Result<usize> {
    match read {
        Ok(n) => Ok(n),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        Err(e) => Err(SerialError::Io(e)),
    }
}

/// Pulse the reset line: deassert, assert, release, then settle
pub fn reset_device<C: Console + ?Sized>(console: &mut C, timing: &ResetTiming) -> Result<()> {
    console.set_reset_line(false)?;
    thread::sleep(timing.hold);
    console.set_reset_line(true)?;
    thread::sleep(timing.hold);
    console.set_reset_line(false)?;
    thread::sleep(timing.settle);
    Ok(())
}

/// Scan console output for identity until complete or `timeout` elapses
///
/// Reading stops after the chunk that completes both fields; every complete
/// line of that chunk is kept in the output.
pub fn scan_console<C: Console + ?Sized>(
    console: &mut C,
    rules: &RuleSet,
    port: &str,
    timeout: Duration,
) -> Result<IdentityResult> {
    let mut scanner = IdentityScanner::new(rules);
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let n = console.read_chunk(&mut buf)?;
        if n == 0 {
            continue;
        }
        // The whole chunk is recorded even if an earlier line completes the scan
        for line in lines.push(&buf[..n]) {
            observe_line(&mut scanner, port, &line);
        }
        if scanner.is_complete() {
            log::info!("Found both serial number and public key!");
            break;
        }
    }

    if !scanner.is_complete() {
        if let Some(line) = lines.finish() {
            observe_line(&mut scanner, port, &line);
        }
    }

    let result = scanner.finish(port);
    if result.boot_suspect() {
        log::warn!("Device appears to have boot issues - firmware may not be flashed correctly");
    }
    Ok(result)
}

fn observe_line(scanner: &mut IdentityScanner<'_>, port: &str, line: &str) {
    log::info!("[{}] {}", port, line);
    let findings = scanner.feed(line);
    if findings.boot_fault {
        log::warn!("Boot issue detected: {}", line);
    }
    if let Some(id) = &findings.device_id {
        log::info!("Found Serial Number: {}", id);
    }
    if let Some(key) = &findings.public_key {
        log::info!("Found Public Key: {}", key);
    }
}

/// Identity reader that opens the port for each read
#[derive(Debug, Clone)]
pub struct SerialIdentityReader {
    baud: u32,
    rules: RuleSet,
    reset: ResetTiming,
}

impl SerialIdentityReader {
    /// Reader at `baud` using `rules`
    pub fn new(baud: u32, rules: RuleSet, reset: ResetTiming) -> Self {
        Self { baud, rules, reset }
    }

    fn read(&self, port: &str, timeout: Duration) -> Result<IdentityResult> {
        log::info!("Reading serial output from {}...", port);
        let mut console = SerialConsole::open(port, self.baud)?;
        reset_device(&mut console, &self.reset)?;
        console.discard_input()?;
        scan_console(&mut console, &self.rules, port, timeout)
        // console dropped here, releasing the port
    }
}

impl IdentityReader for SerialIdentityReader {
    fn read_identity(
        &mut self,
        port: &str,
        timeout: Duration,
    ) -> std::result::Result<IdentityResult, StepError> {
        self.read(port, timeout).map_err(|e| e.into_step(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Console that replays chunks and records reset transitions
    #[derive(Default)]
    struct ReplayConsole {
        chunks: VecDeque<Vec<u8>>,
        reset_levels: Vec<bool>,
        reads: usize,
        fail_after_chunks: bool,
    }

    impl ReplayConsole {
        fn with(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                ..Default::default()
            }
        }
    }

    impl Console for ReplayConsole {
        fn set_reset_line(&mut self, asserted: bool) -> Result<()> {
            self.reset_levels.push(asserted);
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            self.chunks.clear();
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.reads += 1;
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.fail_after_chunks => Err(SerialError::Io(std::io::Error::new(
                    ErrorKind::BrokenPipe,
                    "unplugged",
                ))),
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(0)
                }
            }
        }
    }

    #[test]
    fn test_reset_sequence() {
        let mut console = ReplayConsole::default();
        let timing = ResetTiming {
            hold: Duration::ZERO,
            settle: Duration::ZERO,
        };
        reset_device(&mut console, &timing).unwrap();
        assert_eq!(console.reset_levels, vec![false, true, false]);
    }

    #[test]
    fn test_scan_stops_early_when_complete() {
        let key = "f".repeat(64);
        let key_line = format!("Public Key: {}\r\n", key);
        let mut console = ReplayConsole::with(&[
            b"booting...\r\nSerial Number: zap-1A2B3C\r\n",
            key_line.as_bytes(),
            b"app_main running\r\n",
        ]);

        let result = scan_console(
            &mut console,
            &RuleSet::default(),
            "/dev/ttyUSB0",
            Duration::from_secs(30),
        )
        .unwrap();

        assert_eq!(result.device_id.as_deref(), Some("zap-1A2B3C"));
        assert_eq!(result.public_key.as_deref(), Some(key.as_str()));
        assert_eq!(console.reads, 2);
        assert_eq!(console.chunks.len(), 1);
        assert_eq!(result.output_lines.len(), 3);
    }

    #[test]
    fn test_scan_times_out_with_partial_result() {
        let mut console = ReplayConsole::with(&[b"ready\n", b"serial: zap-0c"]);
        let result = scan_console(
            &mut console,
            &RuleSet::default(),
            "COM4",
            Duration::from_millis(30),
        )
        .unwrap();

        assert!(result.boot_success);
        // The unterminated last line is still scanned
        assert_eq!(result.device_id.as_deref(), Some("zap-0c"));
        assert!(result.public_key.is_none());
    }

    #[test]
    fn test_scan_propagates_io_error() {
        let mut console = ReplayConsole::with(&[b"booting\n"]);
        console.fail_after_chunks = true;
        let err = scan_console(
            &mut console,
            &RuleSet::default(),
            "COM4",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, SerialError::Io(_)));
        assert!(matches!(
            err.into_step("COM4"),
            StepError::Serial { port, .. } if port == "COM4"
        ));
    }

    #[test]
    fn test_completing_chunk_is_fully_recorded() {
        let key = "a".repeat(32);
        let tail_chunk = format!("Public Key: {}\r\napp_main running\r\n", key);
        let mut console = ReplayConsole::with(&[
            b"Serial Number: zap-77\r\n",
            tail_chunk.as_bytes(),
            b"never read\r\n",
        ]);

        let result = scan_console(
            &mut console,
            &RuleSet::default(),
            "COM4",
            Duration::from_secs(30),
        )
        .unwrap();

        assert!(result.is_complete());
        assert!(result.boot_success);
        assert_eq!(
            result.output_lines,
            vec![
                "Serial Number: zap-77".to_string(),
                format!("Public Key: {}", key),
                "app_main running".to_string(),
            ]
        );
        assert_eq!(console.chunks.len(), 1);
    }

    #[test]
    fn test_settle_read_treats_signal_as_empty_read() {
        for kind in [ErrorKind::Interrupted, ErrorKind::TimedOut, ErrorKind::WouldBlock] {
            let read = Err(std::io::Error::new(kind, "no data"));
            assert_eq!(settle_read(read).unwrap(), 0);
        }
        assert_eq!(settle_read(Ok(7)).unwrap(), 7);
        assert!(matches!(
            settle_read(Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone"))),
            Err(SerialError::Io(_))
        ));
    }

    /// Console whose raw reads are interrupted by signals between chunks
    struct SignalledConsole {
        reads: VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl Console for SignalledConsole {
        fn set_reset_line(&mut self, _asserted: bool) -> Result<()> {
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
            let raw = match self.reads.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "idle")),
            };
            settle_read(raw)
        }
    }

    #[test]
    fn test_signal_during_read_keeps_scanned_identity() {
        let key = "b".repeat(40);
        let interrupted = || std::io::Error::new(ErrorKind::Interrupted, "EINTR");
        let mut console = SignalledConsole {
            reads: VecDeque::from(vec![
                Ok(b"Serial Number: zap-1A2B3C\n".to_vec()),
                Err(interrupted()),
                Err(interrupted()),
                Ok(format!("public key: {}\n", key).into_bytes()),
            ]),
        };

        let result = scan_console(
            &mut console,
            &RuleSet::default(),
            "/dev/ttyUSB0",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(result.device_id.as_deref(), Some("zap-1A2B3C"));
        assert_eq!(result.public_key.as_deref(), Some(key.as_str()));
    }
}
