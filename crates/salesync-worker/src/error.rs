//! Worker error taxonomy
//!
//! Per-row failures ([`WorkerError::Transient`], [`WorkerError::Permanent`],
//! [`WorkerError::MalformedPayload`], [`WorkerError::Database`]) are caught by
//! the stage that owns the row and turned into a queue transition.
//! [`WorkerError::InfrastructureUnavailable`] escapes the batch and aborts the
//! current loop iteration.

use thiserror::Error;

use crate::queue::FailureClass;

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Permanent upstream failure: {0}")]
    Permanent(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Attempts exhausted after {attempts} tries: {message}")]
    AttemptsExhausted { attempts: i32, message: String },

    #[error("Durable store unavailable: {0}")]
    InfrastructureUnavailable(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] salesync_common::CommonError),
}

impl WorkerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// True when the durable store itself cannot be reached
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, WorkerError::InfrastructureUnavailable(_))
    }

    /// Failure class used when this error ends a row's attempt
    pub fn failure_class(&self) -> FailureClass {
        match self {
            WorkerError::Permanent(_) => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        if is_connectivity_error(&err) {
            WorkerError::InfrastructureUnavailable(err)
        } else {
            WorkerError::Database(err)
        }
    }
}

fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
