//! Error types for serial operations

use seqflash_core::StepError;
use thiserror::Error;

/// Serial backend errors
#[derive(Debug, Error)]
pub enum SerialError {
    /// Failed to open the port
    #[error("Failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Failed to drive a control line or clear buffers
    #[error("Serial control error: {0}")]
    Control(#[from] serialport::Error),

    /// Read failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port enumeration failed
    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
}

impl SerialError {
    /// Convert into a lifecycle step error for `port`
    pub fn into_step(self, port: &str) -> StepError {
        StepError::Serial {
            port: port.to_string(),
            message: self.to_string(),
        }
    }
}

/// Result type for serial operations
pub type Result<T> = std::result::Result<T, SerialError>;
