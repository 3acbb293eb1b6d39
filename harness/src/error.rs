//! Error types for the harness

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running boot tests
#[derive(Error, Debug)]
pub enum Error {
    /// Unresolvable machine/test/build spec or invalid directories.
    /// Fatal before any test runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A build could not be configured for the required architectures.
    #[error("Build {build} failed to configure: {reason}")]
    BuildConfiguration { build: String, reason: String },

    /// A guarded wait exceeded its deadline
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Failure while booting or capturing a test
    #[error("Execution error: {0}")]
    Execution(String),

    /// An external command exited unsuccessfully
    #[error("Command `{command}` failed: {status}")]
    Command { command: String, status: String },

    /// The classifier failed after output capture succeeded
    #[error("Result processing error: {0}")]
    ResultProcessing(String),

    /// Victim machine lifecycle errors
    #[error("Machine {machine}: {reason}")]
    Machine { machine: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn machine(machine: &str, reason: impl Into<String>) -> Self {
        Error::Machine {
            machine: machine.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the whole run before execution starts.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Error::Config(_) | Error::BuildConfiguration { .. })
    }
}

impl From<rustix::io::Errno> for Error {
    fn from(errno: rustix::io::Errno) -> Self {
        Error::Io(errno.into())
    }
}

impl From<globset::Error> for Error {
    fn from(err: globset::Error) -> Self {
        Error::Config(err.to_string())
    }
}
