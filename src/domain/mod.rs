//! Domain layer: entities and business rules
//!
//! This layer is independent of external concerns (no I/O, no CLI, no
//! config loading).

pub mod entities;
pub mod error;

pub use entities::*;
pub use error::{ChainError, FormulaError};
