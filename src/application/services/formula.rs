//! Formula tree engine
//!
//! Owns the forest of formula nodes, the per-root level cursor, and all
//! structural operations. The engine performs no I/O itself: an injected
//! persistence hook is invoked exactly once after each committed mutation,
//! and never on dry-runs or validation failures.
//!
//! All operations are synchronous and the engine holds no locks; callers
//! that share it across threads must serialize access externally.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, instrument};

use crate::domain::{Formula, FormulaError, FormulaId, Status, TreeSnapshot};
use crate::infrastructure::traits::{Clock, PersistenceHook};

/// Outcome of advancing a tracked root one breadth-first tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The root is not in the progress map; nothing happened.
    NotTracked,
    /// Moved down to the contained level.
    Descended(u32),
    /// The deepest tier was done; the cursor wrapped back to level 0.
    Wrapped,
}

/// Current work tier of one tracked root, for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTier {
    pub root_id: FormulaId,
    pub root_name: String,
    pub level: u32,
    pub names: Vec<String>,
}

/// Number of days after which an active formula counts as stale.
const STALE_AFTER_DAYS: i64 = 7;

pub struct FormulaTree {
    formulas: Vec<Formula>,
    last_addition_date: Option<NaiveDate>,
    progress: BTreeMap<FormulaId, u32>,
    clock: Arc<dyn Clock>,
    hook: Option<Arc<dyn PersistenceHook>>,
}

impl FormulaTree {
    /// Create an engine pre-seeded with the demo forest
    /// (A → B → D, A → C). Call [`load`](Self::load) before first use to
    /// start from persisted state instead.
    pub fn new(clock: Arc<dyn Clock>, hook: Option<Arc<dyn PersistenceHook>>) -> Self {
        let today = clock.today();
        Self {
            formulas: seed_forest(today),
            last_addition_date: None,
            progress: BTreeMap::new(),
            clock,
            hook,
        }
    }

    /// Replace all in-memory state with a snapshot. Does not persist.
    pub fn load(&mut self, snapshot: TreeSnapshot) {
        self.formulas = snapshot.formulas;
        self.last_addition_date = snapshot.last_addition_date;
        self.progress = snapshot.active_tree_progress;
    }

    /// Produce the full state for persistence.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            formulas: self.formulas.clone(),
            last_addition_date: self.last_addition_date,
            active_tree_progress: self.progress.clone(),
        }
    }

    /// Invoke the persistence hook after a committed mutation.
    fn commit(&self) {
        if let Some(hook) = &self.hook {
            hook.persist(&self.snapshot());
        }
    }

    // ------------------------------------------------------------
    // Structural mutations
    // ------------------------------------------------------------

    /// Add a new formula, subject to the daily-addition gate: at most one
    /// add per calendar day succeeds across the whole forest.
    ///
    /// Returns the id of the new node.
    #[instrument(level = "debug", skip(self))]
    pub fn add(&mut self, name: &str, parent: Option<FormulaId>) -> Result<FormulaId, FormulaError> {
        let today = self.clock.today();
        if self.last_addition_date == Some(today) {
            return Err(FormulaError::AlreadyAddedToday);
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(FormulaError::EmptyName);
        }

        if let Some(parent_id) = parent {
            if self.get(parent_id).is_none() {
                return Err(FormulaError::UnknownParent(parent_id));
            }
        }

        // Ids grow from the current maximum; gaps from deletions stay.
        let id = self.formulas.iter().map(|f| f.id).max().unwrap_or(0) + 1;

        if let Some(parent_id) = parent {
            if let Some(p) = self.formulas.iter_mut().find(|f| f.id == parent_id) {
                p.children.push(id);
            }
        }

        self.formulas.push(Formula {
            id,
            name: name.to_string(),
            parent,
            children: Vec::new(),
            status: Status::Inactive,
            last_active_time: None,
        });
        self.last_addition_date = Some(today);

        debug!("add: '{name}' as id {id}, parent {parent:?}");
        self.commit();
        Ok(id)
    }

    /// Remove a formula together with its entire descendant subtree.
    ///
    /// With `confirm == false` this is a dry-run: it returns the names of
    /// the nodes that would be removed without mutating anything. Callers
    /// are expected to preview first and commit with `confirm == true`.
    ///
    /// Returns `None` if the id matches nothing.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&mut self, id: FormulaId, confirm: bool) -> Option<Vec<String>> {
        let doomed = self.subtree_ids(id);
        if doomed.is_empty() {
            return None;
        }

        let names: Vec<String> = doomed
            .iter()
            .filter_map(|&d| self.get(d))
            .map(|f| f.name.clone())
            .collect();

        if !confirm {
            return Some(names);
        }

        self.formulas.retain(|f| !doomed.contains(&f.id));
        for f in &mut self.formulas {
            f.children.retain(|c| !doomed.contains(c));
        }
        // A removed root must not keep a level cursor.
        for d in &doomed {
            self.progress.remove(d);
        }

        debug!("remove: dropped {} nodes", names.len());
        self.commit();
        Some(names)
    }

    /// Pre-order closure of a subtree, the node itself first.
    /// Empty if the id matches nothing.
    fn subtree_ids(&self, id: FormulaId) -> Vec<FormulaId> {
        let mut out = Vec::new();
        if self.get(id).is_some() {
            self.collect_subtree(id, &mut out);
        }
        out
    }

    fn collect_subtree(&self, id: FormulaId, out: &mut Vec<FormulaId>) {
        out.push(id);
        for f in &self.formulas {
            if f.parent == Some(id) {
                self.collect_subtree(f.id, out);
            }
        }
    }

    /// Rename a formula. Returns false on an empty trimmed name or an
    /// unknown id, without persisting.
    #[instrument(level = "debug", skip(self))]
    pub fn rename(&mut self, id: FormulaId, new_name: &str) -> bool {
        let name = new_name.trim();
        if name.is_empty() {
            return false;
        }
        let Some(f) = self.formulas.iter_mut().find(|f| f.id == id) else {
            return false;
        };
        f.name = name.to_string();
        self.commit();
        true
    }

    /// Toggle a formula between active and inactive, returning the new
    /// status (`None` for an unknown id).
    ///
    /// Activating sets `last_active_time` to today and, for a root,
    /// (re)starts level tracking at 0. Deactivating a root drops it from
    /// the progress map; the activation date is deliberately kept.
    #[instrument(level = "debug", skip(self))]
    pub fn toggle_status(&mut self, id: FormulaId) -> Option<Status> {
        let today = self.clock.today();
        let f = self.formulas.iter_mut().find(|f| f.id == id)?;
        let is_root = f.parent.is_none();

        let new_status = match f.status {
            Status::Active => {
                f.status = Status::Inactive;
                Status::Inactive
            }
            Status::Inactive => {
                f.status = Status::Active;
                f.last_active_time = Some(today);
                Status::Active
            }
        };

        if is_root {
            match new_status {
                Status::Active => {
                    self.progress.insert(id, 0);
                }
                Status::Inactive => {
                    self.progress.remove(&id);
                }
            }
        }

        self.commit();
        Some(new_status)
    }

    /// Delete every formula. The progress map and the daily-addition gate
    /// are left untouched.
    pub fn clear(&mut self) {
        self.formulas.clear();
        self.commit();
    }

    // ------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------

    pub fn get(&self, id: FormulaId) -> Option<&Formula> {
        self.formulas.iter().find(|f| f.id == id)
    }

    /// First formula with the given name; names are not unique.
    pub fn get_by_name(&self, name: &str) -> Option<&Formula> {
        self.formulas.iter().find(|f| f.name == name)
    }

    pub fn roots(&self) -> Vec<&Formula> {
        self.formulas.iter().filter(|f| f.is_root()).collect()
    }

    /// Direct children only, in insertion order.
    pub fn children(&self, parent_id: FormulaId) -> Vec<&Formula> {
        self.formulas
            .iter()
            .filter(|f| f.parent == Some(parent_id))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.formulas.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Formula> {
        self.formulas.iter()
    }

    /// Level cursor of a tracked root, if any.
    pub fn progress_of(&self, root_id: FormulaId) -> Option<u32> {
        self.progress.get(&root_id).copied()
    }

    /// All nodes at a breadth-first tier below `root_id` (the root itself
    /// is level 0). Recomputed from scratch on every call.
    ///
    /// Unknown roots and tiers beyond the deepest yield an empty list.
    pub fn nodes_at_level(&self, root_id: FormulaId, level: u32) -> Vec<&Formula> {
        let Some(root) = self.get(root_id) else {
            return Vec::new();
        };

        let mut frontier = vec![root];
        for _ in 0..level {
            if frontier.is_empty() {
                return Vec::new();
            }
            frontier = frontier
                .iter()
                .flat_map(|f| self.children(f.id))
                .collect();
        }
        frontier
    }

    /// Advance a tracked root one tier. When the next tier is empty the
    /// cursor wraps back to 0, completing one round-robin cycle.
    #[instrument(level = "debug", skip(self))]
    pub fn advance_level(&mut self, root_id: FormulaId) -> AdvanceOutcome {
        let Some(&current) = self.progress.get(&root_id) else {
            return AdvanceOutcome::NotTracked;
        };

        if self.nodes_at_level(root_id, current + 1).is_empty() {
            self.progress.insert(root_id, 0);
            self.commit();
            AdvanceOutcome::Wrapped
        } else {
            self.progress.insert(root_id, current + 1);
            self.commit();
            AdvanceOutcome::Descended(current + 1)
        }
    }

    /// Current tier of every tracked root, ordered by root id.
    ///
    /// Tracked roots whose node has vanished are skipped.
    pub fn active_tiers(&self) -> Vec<ActiveTier> {
        self.progress
            .iter()
            .filter_map(|(&root_id, &level)| {
                let root = self.get(root_id)?;
                Some(ActiveTier {
                    root_id,
                    root_name: root.name.clone(),
                    level,
                    names: self
                        .nodes_at_level(root_id, level)
                        .iter()
                        .map(|f| f.name.clone())
                        .collect(),
                })
            })
            .collect()
    }

    /// Names of active formulas whose last activation lies strictly more
    /// than a week in the past. Active nodes without a date never count.
    pub fn stale_formulas(&self) -> Vec<String> {
        let cutoff = self.clock.today() - Duration::days(STALE_AFTER_DAYS);
        self.formulas
            .iter()
            .filter(|f| f.is_active())
            .filter(|f| f.last_active_time.is_some_and(|d| d < cutoff))
            .map(|f| f.name.clone())
            .collect()
    }

    // ------------------------------------------------------------
    // Interchange
    // ------------------------------------------------------------

    /// Serialize the bare node list as pretty JSON.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.formulas).unwrap_or_else(|_| "[]".to_string())
    }

    /// Replace the node list from a JSON payload. A malformed payload
    /// leaves state unchanged. The progress map and the daily-addition
    /// gate are not touched either way.
    #[instrument(level = "debug", skip_all)]
    pub fn import_json(&mut self, payload: &str) -> Result<usize, FormulaError> {
        let formulas: Vec<Formula> = serde_json::from_str(payload)
            .map_err(|e| FormulaError::InvalidPayload(e.to_string()))?;

        let count = formulas.len();
        self.formulas = formulas;
        debug!("import: replaced forest with {count} nodes");
        self.commit();
        Ok(count)
    }
}

/// The 4-node demo forest seeded on first run: A → B → D, A → C.
fn seed_forest(today: NaiveDate) -> Vec<Formula> {
    vec![
        Formula {
            id: 1,
            name: "Formula A".to_string(),
            parent: None,
            children: vec![2, 3],
            status: Status::Active,
            last_active_time: Some(today),
        },
        Formula {
            id: 2,
            name: "Formula B".to_string(),
            parent: Some(1),
            children: vec![4],
            status: Status::Active,
            last_active_time: Some(today),
        },
        Formula {
            id: 3,
            name: "Formula C".to_string(),
            parent: Some(1),
            children: Vec::new(),
            status: Status::Inactive,
            last_active_time: None,
        },
        Formula {
            id: 4,
            name: "Formula D".to_string(),
            parent: Some(2),
            children: Vec::new(),
            status: Status::Inactive,
            last_active_time: None,
        },
    ]
}
