//! Application services

pub mod chain;
pub mod formula;

pub use chain::{ChainService, ChainStatus, Completion, WindowState};
pub use formula::{ActiveTier, AdvanceOutcome, FormulaTree};
