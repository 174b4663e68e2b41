//! Error taxonomy for the history store
//!
//! Driver-specific failures are wrapped exactly once at the store boundary
//! into this stable set of kinds; everything above the managers matches on
//! the kind, never on driver details.

use std::fmt;

/// Errors surfaced by the history managers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Optimistic-concurrency violation: duplicate key, stale range/tx token,
    /// or a fork in progress blocking deletion
    ConditionFailed(String),

    /// Requested range anchor (or branch) does not exist
    EntityNotExists(String),

    /// Transient backpressure; caller should retry later
    ServiceBusy(String),

    /// Malformed request (bad token, invalid fork point)
    InvalidRequest(String),

    /// Unexpected store or driver failure
    Internal(String),

    /// Per-call deadline expired
    Timeout(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::ConditionFailed(msg) => write!(f, "condition failed: {}", msg),
            HistoryError::EntityNotExists(msg) => write!(f, "entity not exists: {}", msg),
            HistoryError::ServiceBusy(msg) => write!(f, "service busy: {}", msg),
            HistoryError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            HistoryError::Internal(msg) => write!(f, "internal error: {}", msg),
            HistoryError::Timeout(msg) => write!(f, "timeout: {}", msg),
        }
    }
}

impl std::error::Error for HistoryError {}

/// Errors reported by a storage driver, before wrapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Primary-key violation (the driver-specific duplicate-entry code)
    DuplicateEntry(String),

    /// Row addressed by an update or lock does not exist
    NoRows(String),

    /// Anything else the driver reports
    Io(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::DuplicateEntry(msg) => write!(f, "duplicate entry: {}", msg),
            DriverError::NoRows(msg) => write!(f, "no rows: {}", msg),
            DriverError::Io(msg) => write!(f, "driver io: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}
