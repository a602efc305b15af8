//! # Migration Errors
//!
//! MANIFESTO ALIGNMENT: All error paths are explicit.
//!
//! Every variant names the offending revision(s). Execution failures carry the
//! database message verbatim.

use super::Direction;
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Migration error types
///
/// Grouped by [`MigrationError::kind`]: load errors, graph/plan errors,
/// state corruption and step execution failures.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Revision file or directory could not be read
    #[error("Failed to read revision source {path:?}: {source}")]
    FileRead { path: PathBuf, source: io::Error },

    /// Revision file could not be written
    #[error("Failed to write revision file {path:?}: {source}")]
    FileWrite { path: PathBuf, source: io::Error },

    /// Descriptor failed YAML parsing or is missing required fields
    #[error("Failed to parse revision {path:?}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// Two descriptors share an ID
    #[error("Revision '{id}' is defined more than once ({first} and {second})")]
    DuplicateRevision {
        id: String,
        first: String,
        second: String,
    },

    /// Descriptor is structurally invalid
    #[error("Invalid revision '{id}': {reason}")]
    InvalidRevision { id: String, reason: String },

    /// Checksum mismatch - revision file was modified after creation
    #[error(
        "Checksum mismatch for revision '{revision}': expected {expected}, got {actual}. \
         Revision file may have been manually modified."
    )]
    ChecksumMismatch {
        revision: String,
        expected: String,
        actual: String,
    },

    /// Revision directory does not exist
    #[error("Revision directory not found: {path:?}")]
    DirectoryNotFound { path: PathBuf },

    /// Parent/dependency edges loop back on themselves
    #[error("Cycle detected between revisions: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },

    /// A parent or dependency points at a revision that does not exist
    #[error("Revision '{revision}' references missing revision '{missing}'")]
    DanglingReference { revision: String, missing: String },

    /// More than one head where a single head is required
    #[error(
        "Multiple heads present: {}. Create a merge revision or target a branch explicitly.",
        .heads.join(", ")
    )]
    MultipleHeads { heads: Vec<String> },

    /// Target does not resolve to any revision
    #[error("Unknown target '{target}'")]
    UnknownTarget { target: String },

    /// Target resolves to more than one revision
    #[error("Target '{target}' is ambiguous; candidates: {}", .candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },

    /// Persisted state does not match the revision graph
    ///
    /// MANIFESTO ALIGNMENT: Fatal and never auto-repaired.
    #[error(
        "Applied state is out of sync with the revision graph ({reason}): {}. \
         Operator intervention required.",
        .revisions.join(", ")
    )]
    StateCorruption {
        revisions: Vec<String>,
        reason: String,
    },

    /// Upgrade step precondition does not hold against the current state
    #[error("Cannot apply revision '{revision}': {reason}")]
    CannotApply { revision: String, reason: String },

    /// Downgrade step precondition does not hold against the current state
    #[error("Cannot roll back revision '{revision}': {reason}")]
    CannotRollback { revision: String, reason: String },

    /// Command direction disagrees with the direction the target implies
    #[error("Target '{target}' requires a {actual}, but a {requested} was requested")]
    DirectionMismatch {
        target: String,
        requested: Direction,
        actual: Direction,
    },

    /// A revision's operation failed
    #[error("{direction} of revision '{revision}' failed: {message}")]
    StepExecution {
        revision: String,
        direction: Direction,
        message: String,
    },

    /// Driver-level failure outside a revision operation
    #[error("Database error: {message}")]
    Database { message: String },

    /// Another process holds the migration lock
    ///
    /// MANIFESTO ALIGNMENT: Explicit concurrency control.
    #[error("Migration locked by '{holder}' since {since}. Another migration may be in progress.")]
    MigrationLocked {
        holder: String,
        since: DateTime<Utc>,
    },

    /// Generic internal error
    #[error("Internal migration error: {message}")]
    Internal { message: String },
}

impl MigrationError {
    /// Stable, machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::ParseError { .. }
            | Self::DuplicateRevision { .. }
            | Self::InvalidRevision { .. }
            | Self::ChecksumMismatch { .. }
            | Self::DirectoryNotFound { .. } => "LOAD_ERROR",
            Self::Cycle { .. } => "CYCLE_ERROR",
            Self::DanglingReference { .. } => "DANGLING_REFERENCE_ERROR",
            Self::MultipleHeads { .. } => "MULTIPLE_HEADS_ERROR",
            Self::UnknownTarget { .. } => "UNKNOWN_TARGET_ERROR",
            Self::AmbiguousTarget { .. } => "AMBIGUOUS_TARGET_ERROR",
            Self::StateCorruption { .. } => "STATE_CORRUPTION_ERROR",
            Self::CannotApply { .. } | Self::CannotRollback { .. } => "STALE_PLAN_ERROR",
            Self::DirectionMismatch { .. } => "DIRECTION_MISMATCH_ERROR",
            Self::StepExecution { .. } => "STEP_EXECUTION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::MigrationLocked { .. } => "MIGRATION_LOCKED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Create a database error from any driver message
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }
}

impl From<io::Error> for MigrationError {
    fn from(err: io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for MigrationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ParseError {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for MigrationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_message() {
        let err = MigrationError::ChecksumMismatch {
            revision: "3f2a9c1b7d40".to_string(),
            expected: "crc32:ABC12345".to_string(),
            actual: "crc32:DEF67890".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("3f2a9c1b7d40"));
        assert!(msg.contains("ABC12345"));
        assert!(msg.contains("DEF67890"));
        assert!(msg.contains("manually modified"));
        assert_eq!(err.kind(), "LOAD_ERROR");
    }

    #[test]
    fn test_migration_locked_message() {
        let err = MigrationError::MigrationLocked {
            holder: "runner-1234".to_string(),
            since: Utc::now(),
        };

        let msg = err.to_string();
        assert!(msg.contains("runner-1234"));
        assert!(msg.contains("locked"));
    }

    #[test]
    fn test_graph_errors_name_revisions() {
        let err = MigrationError::Cycle {
            members: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "Cycle detected between revisions: a -> b -> c");

        let err = MigrationError::DanglingReference {
            revision: "D".into(),
            missing: "Z".into(),
        };
        assert!(err.to_string().contains("'D'"));
        assert!(err.to_string().contains("'Z'"));
        assert_eq!(err.kind(), "DANGLING_REFERENCE_ERROR");
    }

    #[test]
    fn test_step_execution_keeps_driver_message() {
        let err = MigrationError::StepExecution {
            revision: "014".into(),
            direction: Direction::Upgrade,
            message: "duplicate column name: processed".into(),
        };
        assert_eq!(
            err.to_string(),
            "upgrade of revision '014' failed: duplicate column name: processed"
        );
        assert_eq!(err.kind(), "STEP_EXECUTION_ERROR");
    }
}
