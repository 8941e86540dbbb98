//! CLI-level errors (wraps infrastructure errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::domain::{ChainError, FormulaError};
use crate::infrastructure::InfraError;

/// CLI errors are the top-level error type.
/// These are what get displayed to the user.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Infra(#[from] InfraError),

    #[error("{0}")]
    Application(#[from] ApplicationError),

    #[error("{0}")]
    Formula(#[from] FormulaError),

    #[error("{0}")]
    Chain(#[from] ChainError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Get the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgs(_) => crate::exitcode::USAGE,
            CliError::Formula(_) | CliError::Chain(_) => crate::exitcode::DATAERR,
            CliError::Application(ApplicationError::Config { .. }) => crate::exitcode::CONFIG,
            CliError::Application(_) => crate::exitcode::SOFTWARE,
            CliError::Infra(e) => match e {
                InfraError::Io { .. } => crate::exitcode::IOERR,
                InfraError::Data { .. } => crate::exitcode::DATAERR,
                InfraError::Application(_) => crate::exitcode::SOFTWARE,
            },
        }
    }
}
