//! # Revision Migrations
//!
//! MANIFESTO ALIGNMENT: Deterministic, checksummed, reversible schema evolution.
//!
//! Per Design Manifesto: "fail loudly, execute predictably, leave no surprises."
//!
//! # Design Principles
//!
//! 1. **Graph, not a counter**: Revisions name their parents; order is derived
//! 2. **Deterministic**: Same graph and state always produce the same plan
//! 3. **Checksummed**: CRC32 verification detects manual edits to revision files
//! 4. **Reversible**: Every revision has explicit `upgrade` and `downgrade` operations
//! 5. **Fail-fast**: Graph errors surface before any database mutation
//! 6. **Transactional**: Each step commits its schema change and version marker together
//!
//! # Pipeline
//!
//! ```text
//! RevisionStore -> RevisionGraph -> Planner -> Executor
//!                                      ^          |
//!                                      +- VersionTracker
//! ```
//!
//! # Revision File Format
//!
//! ```yaml
//! id: 3f2a9c1b7d40
//! description: add processed to transactions
//! parent_ids: [a81c02e4b6f1]
//! branch_label: billing
//! depends_on: []
//! checksum: crc32:ABC12345
//! upgrade:
//!   - add_column:
//!       table: transactions
//!       column: { name: processed, type: BOOLEAN, nullable: false, default: "0" }
//! downgrade:
//!   - drop_column:
//!       table: transactions
//!       column: processed
//! ```

pub mod checksum;
pub mod connection;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod graph;
pub mod operations;
pub mod planner;
pub mod runner;
pub mod sqlite;
pub mod store;
pub mod tracker;

pub use connection::{DatabaseConnection, InMemoryConnection, StepLogEntry};
pub use errors::{MigrationError, MigrationResult};
pub use executor::{CancellationToken, CompletedStep, ExecutionResult, Executor, FailedStep};
pub use generator::{GeneratedRevision, NewRevision, RevisionGenerator};
pub use graph::{HeadPolicy, RevisionGraph};
pub use operations::{Operation, SchemaOperation, Script};
pub use planner::{Plan, PlanStep, Planner, Target};
pub use runner::{CurrentReport, HeadEntry, HistoryEntry, MigrationRunner};
pub use sqlite::SqliteConnection;
pub use store::RevisionStore;
pub use tracker::{AppliedState, VersionTracker};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Revision identifier
pub type RevisionId = String;

/// Direction of a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        }
    }

    /// Arrow used in compact plan renderings
    pub fn arrow(&self) -> char {
        match self {
            Direction::Upgrade => '↑',
            Direction::Downgrade => '↓',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single revision: one atomic, reversible schema change
///
/// Operations are shared capabilities, so cloning a revision is cheap.
#[derive(Clone)]
pub struct Revision {
    /// Globally unique identifier
    pub id: RevisionId,

    /// Human-readable summary
    pub description: String,

    /// Direct predecessors; empty for a base, several for a merge point
    pub parent_ids: Vec<RevisionId>,

    /// Optional branch lineage name
    pub branch_label: Option<String>,

    /// Cross-branch ordering constraints (not schema-state edges)
    pub depends_on: BTreeSet<RevisionId>,

    /// CRC32 checksum recorded in the descriptor, if any
    pub checksum: Option<String>,

    /// File the revision was loaded from
    pub file_path: Option<PathBuf>,

    upgrade: Arc<dyn Operation>,
    downgrade: Arc<dyn Operation>,
}

impl Revision {
    /// Create a base revision with empty operations
    pub fn new(id: impl Into<RevisionId>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            parent_ids: Vec::new(),
            branch_label: None,
            depends_on: BTreeSet::new(),
            checksum: None,
            file_path: None,
            upgrade: Arc::new(Script::default()),
            downgrade: Arc::new(Script::default()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RevisionId>,
    {
        self.parent_ids = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_label = Some(label.into());
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RevisionId>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn upgrade(mut self, operation: impl Operation + 'static) -> Self {
        self.upgrade = Arc::new(operation);
        self
    }

    pub fn downgrade(mut self, operation: impl Operation + 'static) -> Self {
        self.downgrade = Arc::new(operation);
        self
    }

    pub(crate) fn with_source(mut self, checksum: Option<String>, file_path: PathBuf) -> Self {
        self.checksum = checksum;
        self.file_path = Some(file_path);
        self
    }

    /// Operation to run for the given direction
    pub fn operation(&self, direction: Direction) -> &dyn Operation {
        match direction {
            Direction::Upgrade => self.upgrade.as_ref(),
            Direction::Downgrade => self.downgrade.as_ref(),
        }
    }

    /// Parents followed by extra dependencies: everything that must be applied first
    pub fn prerequisites(&self) -> impl Iterator<Item = &RevisionId> {
        self.parent_ids.iter().chain(self.depends_on.iter())
    }

    /// Where the revision came from: its file, or `<registry>` when built in code
    pub fn origin(&self) -> String {
        self.file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<registry>".to_string())
    }

    pub fn is_base(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn is_merge_point(&self) -> bool {
        self.parent_ids.len() > 1
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Revision")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("parent_ids", &self.parent_ids)
            .field("branch_label", &self.branch_label)
            .field("depends_on", &self.depends_on)
            .field("upgrade", &self.upgrade.describe())
            .field("downgrade", &self.downgrade.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_builder() {
        let revision = Revision::new("c")
            .description("merge billing")
            .parents(["a", "b"])
            .branch_label("billing")
            .depends_on(["x"]);

        assert_eq!(revision.parent_ids, vec!["a", "b"]);
        assert!(revision.is_merge_point());
        assert!(!revision.is_base());
        assert_eq!(revision.branch_label.as_deref(), Some("billing"));

        let prerequisites: Vec<_> = revision.prerequisites().cloned().collect();
        assert_eq!(prerequisites, vec!["a", "b", "x"]);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Upgrade.to_string(), "upgrade");
        assert_eq!(Direction::Downgrade.arrow(), '↓');
        let json = serde_json::to_string(&Direction::Downgrade).unwrap();
        assert_eq!(json, "\"downgrade\"");
    }
}
