//! Tests for the formula tree engine

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rstest::{fixture, rstest};

use cadence::application::services::formula::{AdvanceOutcome, FormulaTree};
use cadence::domain::{Formula, FormulaError, FormulaId, Status, TreeSnapshot};
use cadence::infrastructure::traits::{Clock, PersistenceHook};
use cadence::util::testing;

/// Clock with a settable date, for exercising the daily gate and staleness.
struct FixedClock {
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    fn advance_days(&self, days: i64) {
        let mut today = self.today.lock().unwrap();
        *today += Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }

    fn now(&self) -> NaiveDateTime {
        self.today().and_hms_opt(12, 0, 0).unwrap()
    }
}

/// Hook that only counts invocations.
#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
}

impl CountingHook {
    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PersistenceHook for CountingHook {
    fn persist(&self, _snapshot: &TreeSnapshot) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn day_one() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
}

fn node(
    id: FormulaId,
    name: &str,
    parent: Option<FormulaId>,
    children: Vec<FormulaId>,
    status: Status,
    last_active_time: Option<NaiveDate>,
) -> Formula {
    Formula {
        id,
        name: name.to_string(),
        parent,
        children,
        status,
        last_active_time,
    }
}

/// The spec scenario forest: A(1) -> B(2) -> D(4), A -> C(3), all inactive.
fn demo_snapshot() -> TreeSnapshot {
    TreeSnapshot {
        formulas: vec![
            node(1, "A", None, vec![2, 3], Status::Inactive, None),
            node(2, "B", Some(1), vec![4], Status::Inactive, None),
            node(3, "C", Some(1), vec![], Status::Inactive, None),
            node(4, "D", Some(2), vec![], Status::Inactive, None),
        ],
        last_addition_date: None,
        active_tree_progress: Default::default(),
    }
}

#[fixture]
fn demo() -> (Arc<FixedClock>, FormulaTree) {
    testing::init_test_setup();
    let clock = Arc::new(FixedClock::new(day_one()));
    let mut tree = FormulaTree::new(clock.clone(), None);
    tree.load(demo_snapshot());
    (clock, tree)
}

/// Children index must mirror parent pointers exactly, for every node.
fn assert_children_invariant(tree: &FormulaTree) {
    for f in tree.iter() {
        let indexed: BTreeSet<FormulaId> = f.children.iter().copied().collect();
        let derived: BTreeSet<FormulaId> = tree
            .iter()
            .filter(|m| m.parent == Some(f.id))
            .map(|m| m.id)
            .collect();
        assert_eq!(indexed, derived, "children index out of sync for {}", f.id);
    }
}

// ------------------------------------------------------------
// add
// ------------------------------------------------------------

#[rstest]
fn given_forest_when_adding_then_id_is_max_plus_one(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    let id = tree.add("E", Some(1)).unwrap();
    assert_eq!(id, 5);
    assert_children_invariant(&tree);
}

#[rstest]
fn given_gapped_ids_when_adding_then_id_follows_current_max(demo: (Arc<FixedClock>, FormulaTree)) {
    let (clock, mut tree) = demo;
    // Drop the middle of the forest, leaving ids {1, 3}
    tree.remove(2, true).unwrap();
    clock.advance_days(1);
    let id = tree.add("E", None).unwrap();
    assert_eq!(id, 4);
}

#[test]
fn given_empty_forest_when_adding_then_first_id_is_one() {
    let clock = Arc::new(FixedClock::new(day_one()));
    let mut tree = FormulaTree::new(clock, None);
    tree.load(TreeSnapshot::default());
    assert_eq!(tree.add("first", None).unwrap(), 1);
}

#[rstest]
fn given_one_add_today_when_adding_again_then_daily_gate_blocks(
    demo: (Arc<FixedClock>, FormulaTree),
) {
    let (clock, mut tree) = demo;
    tree.add("E", None).unwrap();

    // Same day: always refused, whatever the arguments
    assert_eq!(tree.add("F", None), Err(FormulaError::AlreadyAddedToday));
    assert_eq!(tree.add("G", Some(1)), Err(FormulaError::AlreadyAddedToday));
    assert_eq!(tree.count(), 5);

    clock.advance_days(1);
    assert!(tree.add("F", None).is_ok());
}

#[rstest]
fn given_bad_arguments_when_adding_then_nothing_changes(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    assert_eq!(tree.add("   ", None), Err(FormulaError::EmptyName));
    assert_eq!(tree.add("E", Some(99)), Err(FormulaError::UnknownParent(99)));
    assert_eq!(tree.count(), 4);
}

#[rstest]
fn given_padded_name_when_adding_then_name_is_trimmed(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    let id = tree.add("  spaced out  ", None).unwrap();
    assert_eq!(tree.get(id).unwrap().name, "spaced out");
    assert_eq!(tree.get(id).unwrap().status, Status::Inactive);
    assert_eq!(tree.get(id).unwrap().last_active_time, None);
}

// ------------------------------------------------------------
// remove
// ------------------------------------------------------------

#[rstest]
fn given_dry_run_when_removing_then_nothing_changes(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    let names = tree.remove(1, false).unwrap();
    assert_eq!(names, vec!["A", "B", "D", "C"]); // pre-order
    assert_eq!(tree.count(), 4);
}

#[rstest]
fn given_confirmation_when_removing_then_whole_subtree_goes(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    let names = tree.remove(2, true).unwrap();
    assert_eq!(names, vec!["B", "D"]);
    assert_eq!(tree.count(), 2);
    assert!(tree.get(2).is_none());
    assert!(tree.get(4).is_none());
    // A's children list no longer references the removed subtree
    assert_eq!(tree.get(1).unwrap().children, vec![3]);
    assert_children_invariant(&tree);
}

#[rstest]
fn given_unknown_id_when_removing_then_none(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    assert!(tree.remove(42, true).is_none());
    assert_eq!(tree.count(), 4);
}

#[rstest]
fn given_tracked_root_when_removing_then_progress_entry_goes(
    demo: (Arc<FixedClock>, FormulaTree),
) {
    let (_, mut tree) = demo;
    tree.toggle_status(1).unwrap();
    assert_eq!(tree.progress_of(1), Some(0));

    tree.remove(1, true).unwrap();
    assert_eq!(tree.progress_of(1), None);
}

// ------------------------------------------------------------
// rename / toggle
// ------------------------------------------------------------

#[rstest]
fn given_valid_name_when_renaming_then_trimmed_name_sticks(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    assert!(tree.rename(3, "  C prime "));
    assert_eq!(tree.get(3).unwrap().name, "C prime");

    assert!(!tree.rename(3, "   "));
    assert!(!tree.rename(99, "whatever"));
    assert_eq!(tree.get(3).unwrap().name, "C prime");
}

#[rstest]
fn given_root_when_toggling_then_progress_follows_status(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;

    assert_eq!(tree.toggle_status(1), Some(Status::Active));
    assert_eq!(tree.progress_of(1), Some(0));
    assert_eq!(tree.get(1).unwrap().last_active_time, Some(day_one()));

    assert_eq!(tree.toggle_status(1), Some(Status::Inactive));
    assert_eq!(tree.progress_of(1), None);
    // The activation date survives deactivation
    assert_eq!(tree.get(1).unwrap().last_active_time, Some(day_one()));
}

#[rstest]
fn given_child_when_toggling_then_no_progress_entry(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    assert_eq!(tree.toggle_status(2), Some(Status::Active));
    assert_eq!(tree.progress_of(2), None);
    assert_eq!(tree.toggle_status(99), None);
}

// ------------------------------------------------------------
// levels and round-robin traversal
// ------------------------------------------------------------

#[rstest]
fn given_demo_forest_when_querying_levels_then_tiers_match(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, tree) = demo;
    let names = |level| -> Vec<String> {
        tree.nodes_at_level(1, level)
            .iter()
            .map(|f| f.name.clone())
            .collect()
    };
    assert_eq!(names(0), vec!["A"]);
    assert_eq!(names(1), vec!["B", "C"]);
    assert_eq!(names(2), vec!["D"]);
    assert!(names(3).is_empty());
    assert!(names(17).is_empty());
    assert!(tree.nodes_at_level(42, 0).is_empty());
}

#[rstest]
fn given_tracked_root_when_advancing_then_levels_cycle(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    tree.toggle_status(1).unwrap();

    assert_eq!(tree.advance_level(1), AdvanceOutcome::Descended(1));
    assert_eq!(tree.progress_of(1), Some(1));
    assert_eq!(tree.advance_level(1), AdvanceOutcome::Descended(2));
    assert_eq!(tree.progress_of(1), Some(2));
    assert_eq!(tree.advance_level(1), AdvanceOutcome::Wrapped);
    assert_eq!(tree.progress_of(1), Some(0));
}

#[rstest]
fn given_untracked_root_when_advancing_then_nothing_happens(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    assert_eq!(tree.advance_level(1), AdvanceOutcome::NotTracked);
    assert_eq!(tree.progress_of(1), None);
}

#[rstest]
fn given_tracked_roots_when_listing_tiers_then_ordered_by_id(demo: (Arc<FixedClock>, FormulaTree)) {
    let (clock, mut tree) = demo;
    clock.advance_days(1);
    let other_root = tree.add("Z", None).unwrap();
    tree.toggle_status(other_root).unwrap();
    tree.toggle_status(1).unwrap();
    tree.advance_level(1);

    let tiers = tree.active_tiers();
    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[0].root_id, 1);
    assert_eq!(tiers[0].level, 1);
    assert_eq!(tiers[0].names, vec!["B", "C"]);
    assert_eq!(tiers[1].root_id, other_root);
    assert_eq!(tiers[1].names, vec!["Z"]);
}

// ------------------------------------------------------------
// staleness
// ------------------------------------------------------------

#[test]
fn given_week_old_activation_when_checking_then_only_strictly_stale_names() {
    let today = day_one();
    let clock = Arc::new(FixedClock::new(today));
    let mut tree = FormulaTree::new(clock, None);
    tree.load(TreeSnapshot {
        formulas: vec![
            node(1, "stale", None, vec![], Status::Active, Some(today - Duration::days(8))),
            node(2, "edge", None, vec![], Status::Active, Some(today - Duration::days(7))),
            node(3, "fresh", None, vec![], Status::Active, Some(today)),
            node(4, "dateless", None, vec![], Status::Active, None),
            node(5, "dormant", None, vec![], Status::Inactive, Some(today - Duration::days(30))),
        ],
        last_addition_date: None,
        active_tree_progress: Default::default(),
    });

    assert_eq!(tree.stale_formulas(), vec!["stale"]);
}

// ------------------------------------------------------------
// interchange
// ------------------------------------------------------------

#[rstest]
fn given_export_when_importing_then_node_list_roundtrips(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    tree.toggle_status(1).unwrap();
    let before: Vec<Formula> = tree.iter().cloned().collect();

    let payload = tree.export_json();
    tree.clear();
    assert_eq!(tree.import_json(&payload).unwrap(), 4);

    let after: Vec<Formula> = tree.iter().cloned().collect();
    assert_eq!(before, after);
}

#[rstest]
fn given_malformed_payload_when_importing_then_state_is_untouched(
    demo: (Arc<FixedClock>, FormulaTree),
) {
    let (_, mut tree) = demo;
    assert!(matches!(
        tree.import_json("{not json"),
        Err(FormulaError::InvalidPayload(_))
    ));
    assert!(matches!(
        tree.import_json(r#"{"formulas": 1}"#),
        Err(FormulaError::InvalidPayload(_))
    ));
    assert_eq!(tree.count(), 4);
}

#[rstest]
fn given_import_when_replacing_forest_then_progress_and_gate_survive(
    demo: (Arc<FixedClock>, FormulaTree),
) {
    let (_, mut tree) = demo;
    tree.toggle_status(1).unwrap();
    tree.add("E", None).unwrap();

    tree.import_json(r#"[]"#).unwrap();
    assert_eq!(tree.count(), 0);

    let snapshot = tree.snapshot();
    // Deliberately untouched by import; see design notes on dangling entries
    assert_eq!(snapshot.active_tree_progress.get(&1), Some(&0));
    assert_eq!(snapshot.last_addition_date, Some(day_one()));
}

#[rstest]
fn given_clear_when_emptying_then_progress_and_gate_survive(demo: (Arc<FixedClock>, FormulaTree)) {
    let (_, mut tree) = demo;
    tree.toggle_status(1).unwrap();
    tree.clear();
    assert_eq!(tree.count(), 0);
    assert_eq!(tree.snapshot().active_tree_progress.get(&1), Some(&0));
}

#[test]
fn given_status_when_serializing_then_wire_labels_are_kept() {
    let json = serde_json::to_string(&Status::Active).unwrap();
    assert_eq!(json, "\"活跃\"");
    let status: Status = serde_json::from_str("\"未执行\"").unwrap();
    assert_eq!(status, Status::Inactive);
}

// ------------------------------------------------------------
// persistence hook contract
// ------------------------------------------------------------

#[test]
fn given_hook_when_mutating_then_persisted_exactly_once_per_commit() {
    testing::init_test_setup();
    let clock = Arc::new(FixedClock::new(day_one()));
    let hook = Arc::new(CountingHook::default());
    let mut tree = FormulaTree::new(clock.clone(), Some(hook.clone()));
    tree.load(demo_snapshot());

    // Validation failures and dry-runs never persist
    assert!(tree.add(" ", None).is_err());
    assert!(tree.remove(1, false).is_some());
    assert!(tree.remove(42, true).is_none());
    assert!(!tree.rename(1, " "));
    assert_eq!(tree.toggle_status(99), None);
    assert_eq!(tree.advance_level(7), AdvanceOutcome::NotTracked);
    assert!(tree.import_json("nope").is_err());
    assert_eq!(hook.count(), 0);

    // Each committed mutation persists exactly once
    tree.add("E", None).unwrap();
    assert_eq!(hook.count(), 1);
    tree.toggle_status(1).unwrap();
    assert_eq!(hook.count(), 2);
    tree.advance_level(1);
    assert_eq!(hook.count(), 3);
    tree.rename(3, "C2");
    assert_eq!(hook.count(), 4);
    tree.remove(2, true).unwrap();
    assert_eq!(hook.count(), 5);
    tree.clear();
    assert_eq!(hook.count(), 6);
}

// ------------------------------------------------------------
// seeding
// ------------------------------------------------------------

#[test]
fn given_no_load_when_constructed_then_demo_forest_is_seeded() {
    let clock = Arc::new(FixedClock::new(day_one()));
    let tree = FormulaTree::new(clock, None);

    assert_eq!(tree.count(), 4);
    let roots = tree.roots();
    assert_eq!(roots.len(), 1);
    assert!(roots[0].is_active());
    assert_eq!(roots[0].last_active_time, Some(day_one()));
    assert_children_invariant(&tree);

    let names: Vec<String> = tree
        .nodes_at_level(roots[0].id, 1)
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names.len(), 2);
}
