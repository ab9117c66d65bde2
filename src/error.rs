use crate::broker::Action;
use crate::messages::CaptureState;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the persistence, capture and mix pipelines.
///
/// Every variant is recoverable: retrying the initiating call once the
/// precondition is fixed is always valid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("worker terminated")]
    Terminated,

    #[error("no response after {0:?}")]
    TimedOut(Duration),

    #[error("input device denied: {0}")]
    DeviceDenied(String),

    #[error("none of the preferred recording formats is supported")]
    NoSupportedFormat,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("catalog request failed: {0}")]
    Catalog(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::OperationFailed(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::OperationFailed(format!("wav encoding: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Catalog(e.to_string())
    }
}

/// A failed broker call, tagged with the action that was requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{action} failed: {error}")]
pub struct CallError {
    pub action: Action,
    #[source]
    pub error: Error,
}

impl CallError {
    pub fn new(action: Action, error: Error) -> Self {
        Self { action, error }
    }
}
