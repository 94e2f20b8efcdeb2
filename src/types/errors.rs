//! Error types for accept.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default result type for accept.
pub type AcceptResult<T> = Result<T, AcceptError>;

/// Errors that can surface from accept.
#[derive(Error, Debug)]
pub enum AcceptError {
    /// An actionable condition the user can fix (missing tool, bad directory).
    #[error("{0}")]
    User(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Memo store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Job arguments could not be canonically serialized. Always a bug in
    /// the caller that built the job.
    #[error("Job argument cannot be fingerprinted: {0}")]
    UnhashableArgument(String),

    #[error("No job handler registered for '{0}'")]
    UnknownJob(String),

    #[error("Job '{function}' failed: {message}")]
    JobFailed { function: String, message: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Memo store is corrupted: {0}")]
    CacheCorrupted(String),
}

impl AcceptError {
    /// Creates a user-facing error.
    pub fn user<S: Into<String>>(msg: S) -> Self {
        Self::User(msg.into())
    }

    /// Whether this error is a recognized, user-facing condition rather
    /// than an unclassified fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::User(_) | Self::Scheduler(_) | Self::CacheCorrupted(_)
        )
    }
}

/// Failure of a job, in a form that survives the trip back from a worker
/// process on another machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// True when the job hit a user-facing condition.
    pub user: bool,
    pub message: String,
}

impl JobFailure {
    /// Captures an error raised by a job handler.
    pub fn from_error(err: &AcceptError) -> Self {
        Self {
            user: err.is_user_facing(),
            message: err.to_string(),
        }
    }

    /// Turns the failure back into an error for the caller of `get`.
    pub fn into_error(self, function: &str) -> AcceptError {
        if self.user {
            AcceptError::User(self.message)
        } else {
            AcceptError::JobFailed {
                function: function.to_string(),
                message: self.message,
            }
        }
    }
}
