use std::time::Duration;
use thiserror::Error;

use crate::matrix::command::DeviceRole;

/// Errors raised while building or running a conformance suite
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A test set declared an empty value set or an out-of-range value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Sample width other than 1, 2 or 4 bytes
    #[error("Unsupported sample width: {0} bytes")]
    InvalidFormat(u16),

    /// Fixture write/read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The subject could not be started
    #[error("Failed to launch {role} process: {source}")]
    ProcessLaunch {
        role: DeviceRole,
        #[source]
        source: std::io::Error,
    },

    /// Exit status disagrees with the expected outcome
    #[error("{role} process {status} but was expected to {}", expectation(.expected_failure))]
    ProcessExitMismatch {
        role: DeviceRole,
        expected_failure: bool,
        status: String,
    },

    /// Measured duration outside the tolerance window
    #[error("Measured duration {measured:.3}s outside [{low:.3}s, {high:.3}s]")]
    TimingMismatch { measured: f64, low: f64, high: f64 },

    /// The subject exceeded the configured process timeout and was killed
    #[error("{role} process did not exit within {timeout:?}")]
    ProcessTimeout { role: DeviceRole, timeout: Duration },
}

fn expectation(expected_failure: &bool) -> &'static str {
    if *expected_failure {
        "fail"
    } else {
        "succeed"
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
