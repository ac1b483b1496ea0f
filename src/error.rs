use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::types::RecordKind;

/// Result type for rollcall operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the attendance core.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input; rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The enrollment queue is at capacity. Retry later.
    #[error("enrollment queue full ({size}/{max})")]
    QueueFull { size: usize, max: usize },

    /// The biometric terminal could not be reached (network error or timeout).
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The biometric terminal answered but refused the enrollment.
    #[error("device rejected enrollment: [{code}] {message}")]
    DeviceRejected { code: String, message: String },

    /// An attendance event could not be attributed to any enrolled employee.
    #[error("no employee enrolled for device identifier {0}")]
    UnknownDeviceIdentifier(String),

    /// A second event of the same kind for a day that already has one.
    #[error("duplicate {kind} for employee {employee_id} on {date}")]
    DuplicateEvent {
        employee_id: Uuid,
        date: NaiveDate,
        kind: RecordKind,
    },

    /// An event that would require resequencing the day's state machine.
    #[error("out-of-order {kind} for employee {employee_id} on {date}")]
    OutOfOrderEvent {
        employee_id: Uuid,
        date: NaiveDate,
        kind: RecordKind,
    },

    /// Requested entity not found.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// A unique key was violated on insert.
    #[error("{resource} already exists: {id}")]
    Conflict { resource: &'static str, id: String },

    /// Hashing or verifying a self-service credential failed.
    #[error("credential error: {0}")]
    Credential(String),

    /// Database operation failed.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unexpected error with full context chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error came from the device side of a registration
    /// attempt (as opposed to validation or storage).
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnreachable(_) | Error::DeviceRejected { .. }
        )
    }
}
