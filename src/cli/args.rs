//! CLI argument definitions using clap
//!
//! Commands:
//! - aeromigrate upgrade [target] [--dry-run]
//! - aeromigrate downgrade <target> [--dry-run]
//! - aeromigrate current | history | heads | log | check
//! - aeromigrate revision -m <message> [--head <id>]... [--branch-label <label>] [--depends-on <id>]...
//! - aeromigrate merge -m <message>
//! - aeromigrate stamp <target>
//! - aeromigrate unlock

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// aeromigrate - deterministic revision-graph schema migrations
#[derive(Parser, Debug)]
#[command(name = "aeromigrate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Database path (overrides config and AEROMIGRATE_DATABASE)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply revisions up to a target
    ///
    /// Targets: head, heads, <label>@head, a revision ID or unique prefix.
    Upgrade {
        #[arg(default_value = "head")]
        target: String,

        /// Print the plan without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert revisions down to a target
    ///
    /// Targets: base, a revision ID or unique prefix.
    Downgrade {
        target: String,

        /// Print the plan without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied revisions
    Current,

    /// Show every revision in topological order
    History,

    /// Show graph heads
    Heads,

    /// Show the step log
    Log,

    /// Load and validate the revision graph without touching the database
    Check,

    /// Create a new revision file
    Revision {
        /// Short description
        #[arg(long, short = 'm')]
        message: String,

        /// Parent revision (repeatable); defaults to the current head
        #[arg(long = "head")]
        parents: Vec<String>,

        /// Label for the branch this revision starts
        #[arg(long)]
        branch_label: Option<String>,

        /// Cross-branch dependency (repeatable)
        #[arg(long)]
        depends_on: Vec<String>,
    },

    /// Create a merge revision joining every head
    Merge {
        #[arg(long, short = 'm')]
        message: String,
    },

    /// Set the version table to a target without running operations
    ///
    /// Operator repair tool; also clears a corrupted version table.
    Stamp { target: String },

    /// Clear a migration lock left behind by a crashed run
    Unlock,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_defaults_to_head() {
        let cli = Cli::try_parse_from(["aeromigrate", "upgrade"]).unwrap();
        match cli.command {
            Command::Upgrade { target, dry_run } => {
                assert_eq!(target, "head");
                assert!(!dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "aeromigrate",
            "downgrade",
            "base",
            "--dry-run",
            "--database",
            "app.db",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("app.db")));
        assert!(matches!(cli.command, Command::Downgrade { dry_run: true, .. }));
    }

    #[test]
    fn test_revision_repeatable_flags() {
        let cli = Cli::try_parse_from([
            "aeromigrate",
            "revision",
            "-m",
            "merge billing",
            "--head",
            "ab12",
            "--head",
            "cd34",
            "--depends-on",
            "ef56",
        ])
        .unwrap();
        match cli.command {
            Command::Revision {
                message,
                parents,
                depends_on,
                branch_label,
            } => {
                assert_eq!(message, "merge billing");
                assert_eq!(parents, ["ab12", "cd34"]);
                assert_eq!(depends_on, ["ef56"]);
                assert!(branch_label.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_downgrade_requires_target() {
        assert!(Cli::try_parse_from(["aeromigrate", "downgrade"]).is_err());
    }
}
