//! # Database Connection Capability
//!
//! MANIFESTO ALIGNMENT: Explicit interface for everything the engine asks of a database.
//!
//! The engine never talks to a driver directly. It needs transactions, statement
//! execution, the version area (one row per applied revision), the step log and a
//! whole-plan exclusive lock. [`crate::migrations::SqliteConnection`] is the real
//! backend; [`InMemoryConnection`] is used by tests.

use super::errors::{MigrationError, MigrationResult};
use super::{Direction, RevisionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Database capability consumed by the tracker and executor
pub trait DatabaseConnection {
    /// Begin a transaction
    fn begin(&mut self) -> MigrationResult<()>;

    /// Commit the active transaction
    fn commit(&mut self) -> MigrationResult<()>;

    /// Roll back the active transaction
    fn rollback(&mut self) -> MigrationResult<()>;

    /// Execute one or more SQL statements
    fn execute(&mut self, statement: &str) -> MigrationResult<()>;

    /// Revision IDs in the version area. Empty if the area does not exist yet.
    fn applied_revisions(&mut self) -> MigrationResult<Vec<RevisionId>>;

    /// Add a revision ID to the version area
    fn insert_revision(&mut self, id: &str) -> MigrationResult<()>;

    /// Remove a revision ID from the version area
    fn delete_revision(&mut self, id: &str) -> MigrationResult<()>;

    /// Append a committed step to the step log
    fn append_log(&mut self, entry: &StepLogEntry) -> MigrationResult<()>;

    /// Step log, oldest first
    fn read_log(&mut self) -> MigrationResult<Vec<StepLogEntry>>;

    /// Take the exclusive migration lock, failing if someone else holds it
    fn acquire_lock(&mut self, holder: &str) -> MigrationResult<()>;

    /// Release the migration lock. Releasing a free lock is not an error.
    fn release_lock(&mut self) -> MigrationResult<()>;
}

/// Record of one committed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub revision_id: RevisionId,
    pub direction: Direction,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// User/process that ran the step
    pub applied_by: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    applied: BTreeSet<RevisionId>,
    log: Vec<StepLogEntry>,
    statements: Vec<String>,
}

/// In-memory connection (for testing)
///
/// Writes inside a transaction go to a staged copy that replaces the committed
/// state on commit and is discarded on rollback.
#[derive(Debug, Default)]
pub struct InMemoryConnection {
    committed: MemoryState,
    staged: Option<MemoryState>,
    lock: Option<(String, DateTime<Utc>)>,
    failing: Vec<String>,
    commits: usize,
    rollbacks: usize,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the committed version area
    pub fn with_applied<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RevisionId>,
    {
        self.committed.applied = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Make any statement containing `pattern` fail
    pub fn fail_on(&mut self, pattern: impl Into<String>) {
        self.failing.push(pattern.into());
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Committed statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.committed.statements.clone()
    }

    /// Committed version area
    pub fn applied(&self) -> BTreeSet<RevisionId> {
        self.committed.applied.clone()
    }

    /// Committed step log
    pub fn log(&self) -> &[StepLogEntry] {
        &self.committed.log
    }

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    pub fn lock_holder(&self) -> Option<&str> {
        self.lock.as_ref().map(|(holder, _)| holder.as_str())
    }

    fn current(&mut self) -> &mut MemoryState {
        match self.staged.as_mut() {
            Some(staged) => staged,
            None => &mut self.committed,
        }
    }
}

impl DatabaseConnection for InMemoryConnection {
    fn begin(&mut self) -> MigrationResult<()> {
        if self.staged.is_some() {
            return Err(MigrationError::database("transaction already active"));
        }
        self.staged = Some(self.committed.clone());
        Ok(())
    }

    fn commit(&mut self) -> MigrationResult<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| MigrationError::database("no active transaction"))?;
        self.committed = staged;
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> MigrationResult<()> {
        if self.staged.take().is_none() {
            return Err(MigrationError::database("no active transaction"));
        }
        self.rollbacks += 1;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> MigrationResult<()> {
        if let Some(pattern) = self.failing.iter().find(|p| statement.contains(p.as_str())) {
            return Err(MigrationError::database(format!(
                "simulated failure on '{}' while executing: {}",
                pattern, statement
            )));
        }
        self.current().statements.push(statement.to_string());
        Ok(())
    }

    fn applied_revisions(&mut self) -> MigrationResult<Vec<RevisionId>> {
        Ok(self.current().applied.iter().cloned().collect())
    }

    fn insert_revision(&mut self, id: &str) -> MigrationResult<()> {
        if !self.current().applied.insert(id.to_string()) {
            return Err(MigrationError::database(format!(
                "UNIQUE constraint failed: revision '{}' already recorded",
                id
            )));
        }
        Ok(())
    }

    fn delete_revision(&mut self, id: &str) -> MigrationResult<()> {
        self.current().applied.remove(id);
        Ok(())
    }

    fn append_log(&mut self, entry: &StepLogEntry) -> MigrationResult<()> {
        self.current().log.push(entry.clone());
        Ok(())
    }

    fn read_log(&mut self) -> MigrationResult<Vec<StepLogEntry>> {
        Ok(self.current().log.clone())
    }

    fn acquire_lock(&mut self, holder: &str) -> MigrationResult<()> {
        if let Some((existing, since)) = self.lock.as_ref() {
            return Err(MigrationError::MigrationLocked {
                holder: existing.clone(),
                since: *since,
            });
        }
        self.lock = Some((holder.to_string(), Utc::now()));
        Ok(())
    }

    fn release_lock(&mut self) -> MigrationResult<()> {
        self.lock = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_discards_staged_writes() {
        let mut conn = InMemoryConnection::new();

        conn.begin().unwrap();
        conn.execute("CREATE TABLE users (id INTEGER)").unwrap();
        conn.insert_revision("a").unwrap();
        assert_eq!(conn.applied_revisions().unwrap(), vec!["a"]);
        conn.rollback().unwrap();

        assert!(conn.applied().is_empty());
        assert!(conn.statements().is_empty());
        assert_eq!(conn.rollbacks(), 1);
    }

    #[test]
    fn test_commit_publishes_staged_writes() {
        let mut conn = InMemoryConnection::new().with_applied(["a"]);

        conn.begin().unwrap();
        conn.insert_revision("b").unwrap();
        conn.delete_revision("a").unwrap();
        conn.commit().unwrap();

        assert_eq!(conn.applied().into_iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(conn.commits(), 1);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_failure_injection() {
        let mut conn = InMemoryConnection::new();
        conn.fail_on("DROP");

        let err = conn.execute("DROP TABLE users").unwrap_err();
        assert!(err.to_string().contains("DROP TABLE users"));

        conn.clear_failures();
        conn.execute("DROP TABLE users").unwrap();
    }

    #[test]
    fn test_lock() {
        let mut conn = InMemoryConnection::new();

        conn.acquire_lock("process-1").unwrap();
        let err = conn.acquire_lock("process-2").unwrap_err();
        assert!(matches!(err, MigrationError::MigrationLocked { ref holder, .. } if holder == "process-1"));

        conn.release_lock().unwrap();
        conn.acquire_lock("process-2").unwrap();
        assert_eq!(conn.lock_holder(), Some("process-2"));
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut conn = InMemoryConnection::new();
        conn.begin().unwrap();
        assert!(conn.begin().is_err());
        conn.commit().unwrap();
        assert!(conn.commit().is_err());
    }
}
