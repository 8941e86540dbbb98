//! I/O boundary traits for testability
//!
//! These traits abstract the wall clock and the persistence side effect,
//! allowing services to be tested with fixed dates and counting hooks.

use chrono::{Local, NaiveDate, NaiveDateTime};

use crate::domain::TreeSnapshot;

/// Wall-clock abstraction so date-gated logic is testable.
pub trait Clock: Send + Sync {
    /// Current calendar date (local time).
    fn today(&self) -> NaiveDate;

    /// Current timestamp (local time, no timezone).
    fn now(&self) -> NaiveDateTime;
}

/// Persistence callback invoked by the formula engine after each
/// committed mutation, and only then. Dry-runs and validation failures
/// never reach it.
///
/// Implementations receive the full snapshot so they can write without
/// holding a reference back into the engine. They must not panic;
/// failures are theirs to report.
pub trait PersistenceHook: Send + Sync {
    fn persist(&self, snapshot: &TreeSnapshot);
}

// ============================================================
// REAL IMPLEMENTATIONS
// ============================================================

/// Real clock backed by local time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}
