//! Error types for external tool invocations

use std::time::Duration;

use seqflash_core::StepError;
use thiserror::Error;

/// Failures running the flashing tool
#[derive(Debug, Error)]
pub enum EsptoolError {
    /// The tool binary could not be started
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool did not exit within its budget and was killed
    #[error("{tool} timed out after {}s", .timeout.as_secs())]
    TimedOut { tool: String, timeout: Duration },

    /// The tool exited unsuccessfully
    #[error("{tool} exited with {status}")]
    Failed { tool: String, status: String },

    /// The target port is gone
    #[error("Port {0} no longer exists")]
    PortVanished(String),
}

impl EsptoolError {
    /// Convert into a lifecycle step error, naming the step on timeout
    pub fn into_step(self, step: &'static str) -> StepError {
        match self {
            EsptoolError::Launch { tool, source } => StepError::Launch { tool, source },
            EsptoolError::TimedOut { timeout, .. } => StepError::Timeout { step, timeout },
            EsptoolError::Failed { tool, status } => StepError::ToolFailed { tool, status },
            EsptoolError::PortVanished(port) => StepError::PortVanished(port),
        }
    }
}

/// Result type for tool invocations
pub type Result<T> = std::result::Result<T, EsptoolError>;
