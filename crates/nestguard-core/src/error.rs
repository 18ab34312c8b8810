//! Error types for nestguard.

use thiserror::Error;

/// Result type alias using nestguard's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for nestguard operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration store could not be read.
    #[error("Configuration load error: {0}")]
    ConfigurationLoad(String),

    /// A configuration failed validation (e.g. thresholds out of order).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The analysis collaborator did not supply a result.
    #[error("Analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    /// A job handler or collaborator failed.
    #[error("Job execution error: {0}")]
    JobExecution(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Moderation record not found
    #[error("Moderation record not found: {0}")]
    RecordNotFound(uuid::Uuid),

    /// Appeal not found
    #[error("Appeal not found: {0}")]
    AppealNotFound(uuid::Uuid),

    /// A state transition that the workflow does not permit.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The pending queue reached its configured bound.
    #[error("Job queue full: {0} pending")]
    QueueFull(usize),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Shorthand for an [`Error::InvalidTransition`].
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
