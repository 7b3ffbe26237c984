//! Result sink: incremental ledger and end-of-run summary
//!
//! Successful devices are appended to the ledger as soon as they are
//! classified, so an abrupt termination loses at most the device in
//! flight. The full list of attempts is written to the summary file once,
//! when the run ends.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{Error, Result};
use crate::record::AttemptRecord;

/// Ledger column names
pub const LEDGER_HEADER: [&str; 5] = [
    "ecc_serial",
    "mac_eth0",
    "mac_wlan0",
    "helium_public_key",
    "full_public_key",
];

/// Default output base name
pub const DEFAULT_OUTPUT_BASE: &str = "flash_results";

/// Destination for successful devices, written one row at a time
pub trait Ledger {
    /// Append a row for a successful record
    fn append(&mut self, record: &AttemptRecord) -> Result<()>;
}

/// One ledger row; the network-address and derived-key columns are reserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    /// Device identifier
    pub serial: String,
    /// Full public key token
    pub public_key: String,
}

impl LedgerRow {
    /// Project a record onto the ledger columns
    pub fn from_record(record: &AttemptRecord) -> Self {
        Self {
            serial: record.serial_number.clone().unwrap_or_default(),
            public_key: record.public_key.clone().unwrap_or_default(),
        }
    }

    fn fields(&self) -> [&str; 5] {
        [&self.serial, "", "", "", &self.public_key]
    }
}

impl Ledger for Vec<LedgerRow> {
    fn append(&mut self, record: &AttemptRecord) -> Result<()> {
        self.push(LedgerRow::from_record(record));
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[&str]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// CSV ledger file, header written once on creation
#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    /// Ledger at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Ledger for CsvLedger {
    fn append(&mut self, record: &AttemptRecord) -> Result<()> {
        let exists = self.path.is_file();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;

        let mut out = String::new();
        if !exists {
            out.push_str(&csv_line(&LEDGER_HEADER));
        }
        out.push_str(&csv_line(&LedgerRow::from_record(record).fields()));

        file.write_all(out.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| Error::io(&self.path, e))?;
        log::info!(
            "Result for device #{} appended to: {}",
            record.device_number,
            self.path.display()
        );
        Ok(())
    }
}

/// Ledger and summary file locations for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Base name with timestamp, without extension
    pub base: String,
    /// CSV ledger path
    pub ledger: PathBuf,
    /// JSON summary path
    pub summary: PathBuf,
}

impl OutputPaths {
    /// Derive paths from an optional base name; a timestamp is always appended
    pub fn new(base: Option<&str>, started: DateTime<Local>) -> Self {
        let base = format!(
            "{}_{}",
            base.unwrap_or(DEFAULT_OUTPUT_BASE),
            started.format("%Y%m%d_%H%M%S")
        );
        Self {
            ledger: PathBuf::from(format!("{}.csv", base)),
            summary: PathBuf::from(format!("{}.json", base)),
            base,
        }
    }
}

/// Write every attempt as pretty-printed JSON
pub fn write_summary(records: &[AttemptRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| Error::io(path, e))?;
    Ok(())
}
