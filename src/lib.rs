//! cadence: personal discipline tracker
//!
//! Two cooperating pieces: the chain-delay protocol (commitment windows
//! that build a task chain) and the formula tree engine (a persisted
//! hierarchy of routines with round-robin level progression).

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
