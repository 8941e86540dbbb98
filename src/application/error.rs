//! Application-level errors (wraps domain errors)

use thiserror::Error;

use crate::domain::{ChainError, FormulaError};

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Formula(#[from] FormulaError),

    #[error("{0}")]
    Chain(#[from] ChainError),

    #[error("config error: {message}")]
    Config { message: String },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
