//! Domain entities: core data structures

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Identifier of a formula node. Assigned as `max(existing) + 1`.
pub type FormulaId = u32;

/// Activity state of a formula.
///
/// The wire format keeps the original labels so exported data stays
/// interchangeable with files written by earlier versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "活跃")]
    Active,
    #[serde(rename = "未执行")]
    Inactive,
}

/// A named routine in the hierarchy.
///
/// Root formulas represent top-level recurring practices, children
/// represent sub-steps or sub-variants. `children` is a redundant
/// adjacency index: it must always equal the set of ids whose `parent`
/// points here, and the engine maintains it on every insert and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub id: FormulaId,
    pub name: String,
    pub parent: Option<FormulaId>,
    #[serde(default)]
    pub children: Vec<FormulaId>,
    pub status: Status,
    pub last_active_time: Option<NaiveDate>,
}

impl Formula {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

/// Full persisted state of the formula engine.
///
/// `active_tree_progress` maps root ids to their current breadth-first
/// tier; JSON encodes the keys as strings in transit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub last_addition_date: Option<NaiveDate>,
    #[serde(default)]
    pub active_tree_progress: BTreeMap<FormulaId, u32>,
}

/// One committed node of the task chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNode {
    pub id: u32,
    pub name: String,
    pub timestamp: NaiveDateTime,
}

/// A behavior permanently exempted from breaking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: u32,
    pub description: String,
    pub timestamp: NaiveDateTime,
    pub permanent: bool,
}

/// Default window lengths, persisted alongside the data they govern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub reservation_minutes: i64,
    pub task_minutes: i64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            reservation_minutes: 15,
            task_minutes: 30,
        }
    }
}

/// Everything the protocol persists in one file.
///
/// Unknown keys in an existing file are ignored and missing keys are
/// filled with defaults, so older files keep loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolData {
    pub task_chain: Vec<ChainNode>,
    pub allowed_violations: Vec<Violation>,
    pub formulas: TreeSnapshot,
    pub settings: ProtocolSettings,
    pub longest_chain: usize,
    pub task_history: Vec<String>,
    /// Deadline of an open reservation window, if any
    pub reservation_until: Option<NaiveDateTime>,
    /// Deadline of the running task, if any
    pub task_until: Option<NaiveDateTime>,
}
