//! CLI command implementations
//!
//! Every command loads configuration first, then the revision graph, and only
//! then opens the database. Graph errors therefore never touch the database.
//! Successful output is a single JSON document on stdout.

use std::fs;
use std::path::Path;

use serde_json::json;
use tracing::{info, warn};

use crate::config::{Config, Overrides};
use crate::logging::init_logging;
use crate::migrations::{
    CancellationToken, DatabaseConnection, Direction, HeadPolicy, MigrationRunner, NewRevision,
    RevisionGenerator, RevisionStore, SqliteConnection, Target,
};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::write_response;
use super::signal::install_interrupt_handler;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let cancel = CancellationToken::new();
    if matches!(
        cli.command,
        Command::Upgrade { dry_run: false, .. } | Command::Downgrade { dry_run: false, .. }
    ) {
        install_interrupt_handler(cancel.clone())?;
    }
    run_command_with(cli, &cancel)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cli: Cli) -> CliResult<()> {
    run_command_with(cli, &CancellationToken::new())
}

/// Run a command; `cancel` stops upgrades and downgrades between steps
pub fn run_command_with(cli: Cli, cancel: &CancellationToken) -> CliResult<()> {
    let overrides = Overrides::from_env().merge(Overrides {
        database: cli.database,
        revisions_dir: None,
    });
    let config = Config::load(&cli.config, overrides)?;
    init_logging(&config.logging);

    match cli.command {
        Command::Upgrade { target, dry_run } => {
            migrate(&config, &target, Direction::Upgrade, dry_run, cancel)
        }
        Command::Downgrade { target, dry_run } => {
            migrate(&config, &target, Direction::Downgrade, dry_run, cancel)
        }
        Command::Current => current(&config),
        Command::History => history(&config),
        Command::Heads => heads(&config),
        Command::Log => log(&config),
        Command::Check => check(&config),
        Command::Revision {
            message,
            parents,
            branch_label,
            depends_on,
        } => revision(
            &config,
            NewRevision {
                message,
                parents,
                branch_label,
                depends_on,
            },
        ),
        Command::Merge { message } => merge(&config, &message),
        Command::Stamp { target } => stamp(&config, &target),
        Command::Unlock => unlock(&config),
    }
}

/// Upgrade or downgrade to a target, or print the plan with `dry_run`
///
/// A failed or cancelled step is reported on stdout like any other run, then
/// returned as an error so the process exits non-zero.
pub fn migrate(
    config: &Config,
    target: &str,
    direction: Direction,
    dry_run: bool,
    cancel: &CancellationToken,
) -> CliResult<()> {
    let runner = load_runner(config)?.with_cancellation(cancel.clone());
    let target = Target::parse(target)?;
    let mut conn = open_database(config)?;

    if dry_run {
        let plan = runner.plan_for(&mut conn, &target, direction)?;
        return write_response(json!({
            "dry_run": true,
            "target": target.to_string(),
            "direction": direction,
            "plan": plan.to_string(),
            "steps": plan.steps,
        }));
    }

    let result = match direction {
        Direction::Upgrade => runner.upgrade(&mut conn, &target)?,
        Direction::Downgrade => runner.downgrade(&mut conn, &target)?,
    };

    write_response(json!({
        "success": result.is_success(),
        "target": target.to_string(),
        "direction": direction,
        "completed_count": result.completed.len(),
        "completed": result.completed,
        "skipped": result.skipped,
        "failed": result.failed,
        "cancelled": result.cancelled,
    }))?;

    if let Some(failed) = &result.failed {
        return Err(CliError::step_failed(failed));
    }
    if result.cancelled {
        return Err(CliError::cancelled(result.completed.len()));
    }
    Ok(())
}

pub fn current(config: &Config) -> CliResult<()> {
    let runner = load_runner(config)?;
    let mut conn = open_database(config)?;
    let report = runner.current(&mut conn)?;
    write_response(json!(report))
}

pub fn history(config: &Config) -> CliResult<()> {
    let runner = load_runner(config)?;
    let mut conn = open_database(config)?;
    let entries = runner.history(&mut conn)?;
    write_response(json!({
        "total_revisions": entries.len(),
        "revisions": entries,
    }))
}

pub fn heads(config: &Config) -> CliResult<()> {
    let runner = load_runner(config)?;
    let mut conn = open_database(config)?;
    let heads = runner.heads(&mut conn)?;
    write_response(json!({ "heads": heads }))
}

pub fn log(config: &Config) -> CliResult<()> {
    let runner = load_runner(config)?;
    let mut conn = open_database(config)?;
    let entries = runner.log(&mut conn)?;
    write_response(json!({ "entries": entries }))
}

/// Load and validate the graph only
pub fn check(config: &Config) -> CliResult<()> {
    let runner = load_runner(config)?;
    let graph = runner.graph();
    write_response(json!({
        "valid": true,
        "allow_multiple_heads": graph.policy() == HeadPolicy::AllowBranches,
        "total_revisions": graph.len(),
        "heads": graph.heads(),
        "bases": graph.bases(),
        "order": graph.topological_order(),
    }))
}

pub fn revision(config: &Config, request: NewRevision) -> CliResult<()> {
    ensure_revisions_dir(&config.revisions_dir)?;
    let runner = load_runner(config)?;
    let generated = RevisionGenerator::new(&config.revisions_dir).create(runner.graph(), &request)?;

    write_response(json!({
        "created": true,
        "id": generated.id,
        "parent_ids": generated.parent_ids,
        "file": generated.path.to_string_lossy(),
    }))
}

pub fn merge(config: &Config, message: &str) -> CliResult<()> {
    ensure_revisions_dir(&config.revisions_dir)?;
    let runner = load_runner(config)?;
    let generated = RevisionGenerator::new(&config.revisions_dir).merge(runner.graph(), message)?;

    write_response(json!({
        "created": true,
        "merge": true,
        "id": generated.id,
        "parent_ids": generated.parent_ids,
        "file": generated.path.to_string_lossy(),
    }))
}

pub fn stamp(config: &Config, target: &str) -> CliResult<()> {
    let runner = load_runner(config)?;
    let target = Target::parse(target)?;
    let mut conn = open_database(config)?;
    let state = runner.stamp(&mut conn, &target)?;

    write_response(json!({
        "stamped": true,
        "target": target.to_string(),
        "applied": state.ids(),
    }))
}

/// Clear the lock without loading the graph, so it works even when the
/// revision files are broken
pub fn unlock(config: &Config) -> CliResult<()> {
    let mut conn = open_database(config)?;
    warn!(database = %config.database.display(), "forcibly releasing migration lock");
    conn.release_lock()?;
    write_response(json!({ "unlocked": true }))
}

fn load_runner(config: &Config) -> CliResult<MigrationRunner> {
    let store = RevisionStore::directory(&config.revisions_dir);
    Ok(MigrationRunner::new(store, config.head_policy())?)
}

fn open_database(config: &Config) -> CliResult<SqliteConnection> {
    Ok(SqliteConnection::open(&config.database, &config.version_table)?)
}

fn ensure_revisions_dir(dir: &Path) -> CliResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            CliError::config_error(format!(
                "Failed to create revisions directory {:?}: {}",
                dir, e
            ))
        })?;
        info!(path = %dir.display(), "created revisions directory");
    }
    Ok(())
}
