//! Bounded child process execution
//!
//! The calling thread owns the `Child` and polls `try_wait` until the
//! deadline. Output pipes are drained by helper threads so a chatty tool
//! never blocks on a full pipe. On timeout the child is killed, reaped with
//! a bounded wait, and the helper threads are joined with a bounded wait.
//!
//! On unix the child runs in its own process group, so Ctrl+C at the
//! terminal reaches only the station. A stop then takes effect between
//! steps instead of killing the tool mid-write.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{EsptoolError, Result};

/// Wait for a killed child to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for pipe readers after the child is gone
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const POLL: Duration = Duration::from_millis(10);

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Captured standard output, lossily decoded
    pub stdout: String,
    /// Captured standard error, lossily decoded
    pub stderr: String,
}

impl ProcessOutput {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `program` with `args`, killing it if it outlives `timeout`
pub fn run_bounded(program: &str, args: &[String], timeout: Duration) -> Result<ProcessOutput> {
    log::debug!("Running: {} {}", program, args.join(" "));

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|source| EsptoolError::Launch {
            tool: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                log::debug!("try_wait on {} failed: {}", program, e);
                break None;
            }
        }
        if Instant::now() >= deadline {
            log::debug!("{} exceeded {:?}, killing", program, timeout);
            let _ = child.kill();
            let _ = bounded_reap(&mut child);
            drop(child);
            join_bounded(stdout);
            join_bounded(stderr);
            return Err(EsptoolError::TimedOut {
                tool: program.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL);
    };

    let status = match status {
        Some(status) => status,
        None => bounded_reap(&mut child).ok_or_else(|| EsptoolError::Failed {
            tool: program.to_string(),
            status: "unknown status".to_string(),
        })?,
    };

    Ok(ProcessOutput {
        status,
        stdout: join_bounded(stdout),
        stderr: join_bounded(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_bounded(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    let deadline = Instant::now() + JOIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            // A grandchild still holds the pipe; abandon the reader
            return String::new();
        }
        thread::sleep(POLL);
    }
    handle
        .join()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn bounded_reap(child: &mut Child) -> Option<ExitStatus> {
    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            return None;
        }
        thread::sleep(POLL);
    }
}

/// Last `max_chars` characters of `text`
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
