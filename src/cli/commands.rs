//! Command dispatch: wire settings, store, and services together

use std::fs;
use std::sync::Arc;

use clap::CommandFactory;
use clap_complete::generate;
use colored::Colorize;
use tracing::{debug, instrument};

use crate::application::services::chain::WindowState;
use crate::application::{AdvanceOutcome, ChainService, FormulaTree};
use crate::cli::args::{ChainCommands, Cli, Commands, ConfigCommands, FormulaCommands};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, Settings};
use crate::domain::{Formula, ProtocolData, ProtocolSettings, Status};
use crate::infrastructure::store::ProtocolStore;
use crate::infrastructure::traits::{Clock, SystemClock};

pub fn execute_command(cli: &Cli, settings: &Settings) -> CliResult<()> {
    match &cli.command {
        Some(Commands::Formula { command }) => formula_command(cli, settings, command),
        Some(Commands::Chain { command }) => chain_command(cli, settings, command),
        Some(Commands::Status) => _status(cli, settings),
        Some(Commands::Config { command }) => config_command(settings, command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        None => Ok(()),
    }
}

/// Everything a command needs: the store, the loaded data, a clock.
struct Workspace {
    store: ProtocolStore,
    data: ProtocolData,
    clock: Arc<dyn Clock>,
    /// No data file existed yet (first run).
    fresh: bool,
}

fn open_workspace(cli: &Cli, settings: &Settings) -> CliResult<Workspace> {
    let path = cli
        .data_file
        .clone()
        .unwrap_or_else(|| settings.data_file.clone());
    let store = ProtocolStore::new(path);
    let fresh = !store.exists();
    let mut data = store.load()?;
    if fresh {
        data.settings = ProtocolSettings {
            reservation_minutes: settings.reservation_minutes,
            task_minutes: settings.task_minutes,
        };
    }
    debug!("open_workspace: {} (fresh: {fresh})", store.path().display());
    Ok(Workspace {
        store,
        data,
        clock: Arc::new(SystemClock),
        fresh,
    })
}

impl Workspace {
    /// Build the formula engine with the store as its persistence hook.
    /// On first run the engine keeps its seeded demo forest.
    fn formula_tree(&self) -> FormulaTree {
        let mut tree = FormulaTree::new(self.clock.clone(), Some(Arc::new(self.store.clone())));
        if !self.fresh {
            tree.load(self.data.formulas.clone());
        }
        tree
    }

    fn chain_service(&self) -> ChainService {
        ChainService::new(self.clock.clone())
    }
}

// ------------------------------------------------------------
// formula
// ------------------------------------------------------------

fn formula_command(cli: &Cli, settings: &Settings, command: &FormulaCommands) -> CliResult<()> {
    let ws = open_workspace(cli, settings)?;
    let mut tree = ws.formula_tree();

    match command {
        FormulaCommands::Add { name, parent } => _add(&mut tree, name, *parent),
        FormulaCommands::Remove { id, yes } => _remove(&mut tree, *id, *yes),
        FormulaCommands::Rename { id, name } => _rename(&mut tree, *id, name),
        FormulaCommands::Toggle { id } => _toggle(&mut tree, *id),
        FormulaCommands::Tree => _tree(&tree),
        FormulaCommands::Active => _active(&tree),
        FormulaCommands::Advance { root_id } => _advance(&mut tree, *root_id),
        FormulaCommands::Stale => _stale(&tree),
        FormulaCommands::Export { output } => _export(&tree, output.as_deref()),
        FormulaCommands::Import { file } => _import(&mut tree, file),
        FormulaCommands::Clear { yes } => _clear(&mut tree, *yes),
    }
}

#[instrument(skip(tree))]
fn _add(tree: &mut FormulaTree, name: &str, parent: Option<u32>) -> CliResult<()> {
    let id = tree.add(name, parent)?;
    output::success(&format!("formula '{}' added (id {id})", name.trim()));
    Ok(())
}

#[instrument(skip(tree))]
fn _remove(tree: &mut FormulaTree, id: u32, yes: bool) -> CliResult<()> {
    match tree.remove(id, yes) {
        None => {
            output::warning(&format!("no formula with id {id}"));
            Ok(())
        }
        Some(names) if !yes => {
            output::header(&format!("would remove {} formula(s):", names.len()));
            for name in &names {
                output::detail(name);
            }
            output::info("re-run with --yes to delete");
            Ok(())
        }
        Some(names) => {
            output::success(&format!("removed {} formula(s)", names.len()));
            for name in &names {
                output::detail(name);
            }
            Ok(())
        }
    }
}

#[instrument(skip(tree))]
fn _rename(tree: &mut FormulaTree, id: u32, name: &str) -> CliResult<()> {
    if tree.rename(id, name) {
        output::success(&format!("formula {id} renamed to '{}'", name.trim()));
        Ok(())
    } else {
        Err(CliError::InvalidArgs(format!(
            "cannot rename formula {id}: empty name or unknown id"
        )))
    }
}

#[instrument(skip(tree))]
fn _toggle(tree: &mut FormulaTree, id: u32) -> CliResult<()> {
    match tree.toggle_status(id) {
        Some(Status::Active) => output::success(&format!("formula {id} is now active")),
        Some(Status::Inactive) => output::success(&format!("formula {id} is now inactive")),
        None => output::warning(&format!("no formula with id {id}")),
    }
    Ok(())
}

fn _tree(tree: &FormulaTree) -> CliResult<()> {
    if tree.count() == 0 {
        output::info("no formulas yet");
        return Ok(());
    }
    for root in tree.roots() {
        println!("{}", render_node(tree, root));
    }
    Ok(())
}

fn render_node(tree: &FormulaTree, f: &Formula) -> termtree::Tree<String> {
    let status = match f.status {
        Status::Active => "active".green().to_string(),
        Status::Inactive => "inactive".dimmed().to_string(),
    };
    let label = format!("{} [#{}] {}", f.name, f.id, status);
    termtree::Tree::new(label).with_leaves(
        tree.children(f.id)
            .into_iter()
            .map(|child| render_node(tree, child)),
    )
}

fn _active(tree: &FormulaTree) -> CliResult<()> {
    let tiers = tree.active_tiers();
    if tiers.is_empty() {
        output::info("no active formula trees");
        return Ok(());
    }
    for tier in tiers {
        output::header(&format!("{} (level {})", tier.root_name, tier.level));
        if tier.names.is_empty() {
            output::detail("(no formulas at this level)");
        } else {
            for name in &tier.names {
                output::detail(name);
            }
        }
    }
    Ok(())
}

#[instrument(skip(tree))]
fn _advance(tree: &mut FormulaTree, root_id: u32) -> CliResult<()> {
    match tree.advance_level(root_id) {
        AdvanceOutcome::NotTracked => output::warning(&format!(
            "root {root_id} is not tracked; toggle it active first"
        )),
        AdvanceOutcome::Descended(level) => {
            output::success(&format!("advanced to level {level}"))
        }
        AdvanceOutcome::Wrapped => output::success("cycle complete, back to level 0"),
    }
    Ok(())
}

fn _stale(tree: &FormulaTree) -> CliResult<()> {
    let stale = tree.stale_formulas();
    if stale.is_empty() {
        output::info("nothing stale");
    } else {
        output::header("inactive for over a week:");
        for name in &stale {
            output::failure(name);
        }
    }
    Ok(())
}

fn _export(tree: &FormulaTree, output_path: Option<&std::path::Path>) -> CliResult<()> {
    let payload = tree.export_json();
    match output_path {
        Some(path) => {
            fs::write(path, payload).map_err(|e| {
                crate::infrastructure::InfraError::io(format!("write {}", path.display()), e)
            })?;
            output::success(&format!("exported to {}", path.display()));
        }
        None => output::info(&payload),
    }
    Ok(())
}

#[instrument(skip(tree))]
fn _import(tree: &mut FormulaTree, file: &std::path::Path) -> CliResult<()> {
    let payload = fs::read_to_string(file).map_err(|e| {
        crate::infrastructure::InfraError::io(format!("read {}", file.display()), e)
    })?;
    let count = tree.import_json(&payload)?;
    output::success(&format!("imported {count} formula(s)"));
    Ok(())
}

fn _clear(tree: &mut FormulaTree, yes: bool) -> CliResult<()> {
    if !yes {
        output::header(&format!("would delete all {} formula(s)", tree.count()));
        output::info("re-run with --yes to delete");
        return Ok(());
    }
    tree.clear();
    output::success("all formulas deleted");
    Ok(())
}

// ------------------------------------------------------------
// chain
// ------------------------------------------------------------

fn chain_command(cli: &Cli, settings: &Settings, command: &ChainCommands) -> CliResult<()> {
    let mut ws = open_workspace(cli, settings)?;
    let service = ws.chain_service();

    match command {
        ChainCommands::Reserve { minutes } => {
            let deadline = service.start_reservation(&mut ws.data, *minutes)?;
            ws.store.save(&ws.data)?;
            output::success(&format!(
                "reservation open, start a task before {}",
                deadline.format("%H:%M:%S")
            ));
        }
        ChainCommands::Start { name, minutes } => {
            let node = service.start_task(&mut ws.data, name.as_deref(), *minutes)?;
            ws.store.save(&ws.data)?;
            output::success(&format!("task #{} [{}] started", node.id, node.name));
        }
        ChainCommands::Done => {
            let done = service.complete_task(&mut ws.data)?;
            ws.store.save(&ws.data)?;
            let timing = if done.early { "early" } else { "on time" };
            output::success(&format!(
                "task #{} [{}] completed {timing}, chain length {}",
                done.node.id, done.node.name, done.chain_len
            ));
            if done.new_record {
                output::header(&format!("new record: longest chain is {}", done.chain_len));
            }
        }
        ChainCommands::Cancel => {
            service.cancel_task(&mut ws.data)?;
            ws.store.save(&ws.data)?;
            output::success("task cancelled");
        }
        ChainCommands::Reset { reason } => {
            let archived = service.reset_chain(&mut ws.data, reason);
            ws.store.save(&ws.data)?;
            match archived {
                Some(line) => output::success(&format!("chain broken ({reason}): {line}")),
                None => output::info("chain was already empty"),
            }
        }
        ChainCommands::Allow { description } => {
            let violation = service.allow_violation(&mut ws.data, description);
            ws.store.save(&ws.data)?;
            output::success(&format!(
                "behavior permanently allowed (#{}): {}",
                violation.id, violation.description
            ));
        }
        ChainCommands::Status => _chain_status(&ws, &service),
        ChainCommands::History => {
            if ws.data.task_history.is_empty() {
                output::info("no archived chains");
            } else {
                output::header("archived chains:");
                for line in &ws.data.task_history {
                    output::detail(line);
                }
            }
        }
        ChainCommands::Violations => {
            if ws.data.allowed_violations.is_empty() {
                output::info("no allowed behaviors");
            } else {
                output::header("permanently allowed behaviors:");
                for v in &ws.data.allowed_violations {
                    output::detail(&format!("#{} {} ({})", v.id, v.description, v.timestamp));
                }
            }
        }
    }
    Ok(())
}

fn _chain_status(ws: &Workspace, service: &ChainService) {
    let status = service.status(&ws.data);

    output::header("chain status");
    output::detail(&format!(
        "reservation: {}",
        describe_window(status.reservation, "missed")
    ));
    output::detail(&format!("task: {}", describe_window(status.task, "due")));
    output::detail(&format!(
        "chain length: {} (longest: {})",
        status.chain_len, status.longest_chain
    ));
    for node in &ws.data.task_chain {
        output::detail(&format!(
            "  #{} [{}] - {}",
            node.id,
            node.name,
            node.timestamp.format("%Y-%m-%d %H:%M:%S")
        ));
    }
}

fn describe_window(state: WindowState, expired_label: &str) -> String {
    match state {
        WindowState::Closed => "closed".to_string(),
        WindowState::Open { remaining_secs } => format!(
            "open ({}:{:02} remaining)",
            remaining_secs / 60,
            remaining_secs % 60
        ),
        WindowState::Expired => expired_label.to_string(),
    }
}

// ------------------------------------------------------------
// status / config
// ------------------------------------------------------------

fn _status(cli: &Cli, settings: &Settings) -> CliResult<()> {
    let ws = open_workspace(cli, settings)?;
    let service = ws.chain_service();
    _chain_status(&ws, &service);

    let tree = ws.formula_tree();
    let stale = tree.stale_formulas();
    if !stale.is_empty() {
        output::header("stale formulas (active, untouched for over a week)");
        for name in &stale {
            output::failure(name);
        }
    }
    _active(&tree)
}

fn config_command(settings: &Settings, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            output::info(&format!("data_file = {}", settings.data_file.display()));
            output::info(&format!(
                "reservation_minutes = {}",
                settings.reservation_minutes
            ));
            output::info(&format!("task_minutes = {}", settings.task_minutes));
        }
        ConfigCommands::Path => match global_config_path() {
            Some(path) => output::info(&path.display()),
            None => output::warning("no config directory available"),
        },
    }
    Ok(())
}
