//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::entities::FormulaId;

/// Validation failures of the formula engine.
///
/// These are ordinary values reported to the caller; the engine never
/// panics and a failed operation leaves state unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("already added a formula today, try again tomorrow")]
    AlreadyAddedToday,

    #[error("formula name must not be empty")]
    EmptyName,

    #[error("parent formula not found: {0}")]
    UnknownParent(FormulaId),

    #[error("invalid formula payload: {0}")]
    InvalidPayload(String),
}

/// Chain-protocol violations of the window state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("a reservation window is already open")]
    ReservationOpen,

    #[error("a task is already running")]
    TaskRunning,

    #[error("no task is running")]
    NoTaskRunning,
}
