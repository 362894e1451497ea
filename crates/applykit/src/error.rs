//! Error types for plan application and probing.

use std::io;
use std::path::PathBuf;

/// Result type alias for applykit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while applying a plan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem operation failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        /// What was being done (e.g. "writing").
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// File content in the plan is not valid base64.
    #[error("decoding content of {path}: {message}")]
    Decode {
        /// Target path of the file.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// Permission string is not an octal mode.
    #[error("invalid permissions {value:?} for {path}")]
    Permissions {
        /// Target path of the file.
        path: String,
        /// Offending permission string.
        value: String,
    },

    /// An instruction failed on every attempt.
    #[error("instruction {name} failed after {attempts} attempt(s): {message}")]
    InstructionFailed {
        /// Instruction name.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        message: String,
    },

    /// An instruction could not be started.
    #[error("running instruction {name}: {message}")]
    Spawn {
        /// Instruction name.
        name: String,
        /// Why it could not run.
        message: String,
    },

    /// Probe definition is invalid.
    #[error("invalid probe {name}: {message}")]
    InvalidProbe {
        /// Probe name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// TLS material for a probe could not be loaded.
    #[error("loading TLS material {path}: {message}")]
    Tls {
        /// File that failed.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Health check failed.
    #[error("check {url} failed: {message}")]
    Check {
        /// Probe URL.
        url: String,
        /// Failure description.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an I/O error with context.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Create a health check error.
    pub fn check(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Check {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
