//! Error types for seqflash-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up a run or writing its results
#[derive(Debug, Error)]
pub enum Error {
    /// A flash image file given explicitly does not exist
    #[error("Flash file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    /// An `ADDR:FILE` spec could not be parsed
    #[error("Invalid file format '{0}'. Use addr:file format (e.g., 0x1000:bootloader.bin)")]
    InvalidImageSpec(String),

    /// The same address was given twice
    #[error("Duplicate flash address: {0}")]
    DuplicateAddress(String),

    /// The image set would be empty
    #[error("No flash images specified")]
    EmptyImageSet,

    /// Build directory missing
    #[error("Build directory not found: {}", .0.display())]
    BuildDirNotFound(PathBuf),

    /// No layout strategy matched the files in a build directory
    #[error("No flash files found in {}\nAvailable files: {available:?}\nMake sure to build the project first.", .dir.display())]
    NoLayoutMatched {
        /// Directory that was inspected
        dir: PathBuf,
        /// Regular files that were present
        available: Vec<String>,
    },

    /// None of the known build environments produced an image set
    #[error("Could not auto-detect build environment. Available environments: {0:?}\nUse --build-dir <dir> to specify manually.")]
    NoBuildEnvironment(Vec<String>),

    /// An identity pattern failed to compile
    #[error("Invalid identity pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern text
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// An identity pattern compiled but does not capture exactly one group
    #[error("Identity pattern '{0}' must contain exactly one capture group")]
    PatternCaptureCount(String),

    /// Station configuration could not be parsed
    #[error("Failed to parse config {}: {source}", .path.display())]
    Config {
        /// Path of the config file
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Summary serialization failed
    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    /// File I/O failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for seqflash-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single lifecycle step, reported by a backend
///
/// Backends map their own errors into this type at the trait boundary. The
/// controller decides what a failure means for the cycle; the message is
/// only used for operator logs.
#[derive(Debug, Error)]
pub enum StepError {
    /// The port disappeared before the step could start
    #[error("Port {0} no longer exists. Device may have disconnected.")]
    PortVanished(String),

    /// The external tool ran and exited unsuccessfully
    #[error("{tool} exited with {status}")]
    ToolFailed {
        /// Tool that was run
        tool: String,
        /// Exit status description
        status: String,
    },

    /// The step exceeded its wall-clock budget
    #[error("{step} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Name of the step
        step: &'static str,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// The external tool could not be started
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        /// Tool that was run
        tool: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// The serial connection failed
    #[error("Serial error on {port}: {message}")]
    Serial {
        /// Port in use
        port: String,
        /// Description of the failure
        message: String,
    },
}
