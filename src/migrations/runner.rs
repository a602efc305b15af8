//! # Migration Runner
//!
//! MANIFESTO ALIGNMENT: Single entry point for migration execution.
//!
//! Per Design Manifesto: "fail loudly, execute predictably, leave no surprises."
//!
//! Wires the pipeline together:
//! - Load and validate revisions once, at construction
//! - Plan and execute under the migration lock
//! - Report current state, history and the step log
//! - Stamp the version table without running operations

use super::connection::{DatabaseConnection, StepLogEntry};
use super::errors::{MigrationError, MigrationResult};
use super::executor::{default_holder, with_migration_lock, CancellationToken, ExecutionResult, Executor};
use super::graph::{HeadPolicy, RevisionGraph};
use super::planner::{Plan, Planner, Target};
use super::store::RevisionStore;
use super::tracker::{AppliedState, VersionTracker};
use super::{Direction, RevisionId};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Migration runner
pub struct MigrationRunner {
    /// Validated revision graph
    graph: RevisionGraph,

    /// Lock holder written to the lock table
    holder: String,

    cancel: CancellationToken,
}

impl MigrationRunner {
    /// Load revisions from `store` and build the graph
    ///
    /// Every load and graph error surfaces here, before any connection is used.
    pub fn new(store: RevisionStore, policy: HeadPolicy) -> MigrationResult<Self> {
        let revisions = store.load()?;
        let graph = RevisionGraph::build(revisions, policy)?;

        info!(
            revisions = graph.len(),
            heads = ?graph.heads(),
            "revision graph loaded"
        );

        Ok(Self {
            graph,
            holder: default_holder(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    /// Validated applied state
    pub fn applied_state(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<AppliedState> {
        VersionTracker::new(&self.graph).read(conn)
    }

    /// Plan without executing (dry run); takes no lock
    pub fn plan(&self, conn: &mut dyn DatabaseConnection, target: &Target) -> MigrationResult<Plan> {
        let state = self.applied_state(conn)?;
        Planner::new(&self.graph).plan(&state, target)
    }

    /// Move forward to `target`
    pub fn upgrade(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &Target,
    ) -> MigrationResult<ExecutionResult> {
        self.run(conn, target, Direction::Upgrade)
    }

    /// Move back to `target`
    pub fn downgrade(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &Target,
    ) -> MigrationResult<ExecutionResult> {
        self.run(conn, target, Direction::Downgrade)
    }

    /// Plan toward `target`, refusing a plan that moves the other way
    pub fn plan_for(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &Target,
        requested: Direction,
    ) -> MigrationResult<Plan> {
        let plan = self.plan(conn, target)?;
        match plan.direction() {
            Some(actual) if actual != requested => Err(MigrationError::DirectionMismatch {
                target: target.to_string(),
                requested,
                actual,
            }),
            _ => Ok(plan),
        }
    }

    /// Plan and execute under one lock hold, so the plan cannot go stale
    fn run(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &Target,
        requested: Direction,
    ) -> MigrationResult<ExecutionResult> {
        with_migration_lock(conn, &self.holder, |conn| {
            let plan = self.plan_for(&mut *conn, target, requested)?;

            if plan.is_empty() {
                info!(target = %target, "already at target, nothing to do");
                return Ok(ExecutionResult::default());
            }

            info!(target = %target, steps = plan.len(), plan = %plan, "executing migration plan");
            Executor::new(&self.graph)
                .with_holder(self.holder.clone())
                .with_cancellation(self.cancel.clone())
                .execute_locked(&plan, conn)
        })
    }

    /// Applied revisions and where they sit in the graph
    pub fn current(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<CurrentReport> {
        let state = self.applied_state(conn)?;
        let current_heads = state.current_heads(&self.graph);
        let graph_heads: BTreeSet<&RevisionId> = self.graph.heads().iter().collect();
        let at_head = !self.graph.is_empty()
            && current_heads.len() == graph_heads.len()
            && current_heads.iter().all(|h| graph_heads.contains(h));

        Ok(CurrentReport {
            applied: state.ids().iter().cloned().collect(),
            current_heads,
            at_head,
        })
    }

    /// Every revision in topological order, with its applied flag
    pub fn history(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<Vec<HistoryEntry>> {
        let state = self.applied_state(conn)?;
        let heads: BTreeSet<&RevisionId> = self.graph.heads().iter().collect();

        Ok(self
            .graph
            .revisions()
            .map(|r| HistoryEntry {
                id: r.id.clone(),
                description: r.description.clone(),
                parent_ids: r.parent_ids.clone(),
                depends_on: r.depends_on.iter().cloned().collect(),
                branch_label: r.branch_label.clone(),
                applied: state.contains(&r.id),
                is_head: heads.contains(&r.id),
                is_base: r.is_base(),
                is_merge_point: r.is_merge_point(),
                is_branch_point: self.graph.is_branch_point(&r.id),
            })
            .collect())
    }

    /// Graph heads with their applied flag
    pub fn heads(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<Vec<HeadEntry>> {
        let state = self.applied_state(conn)?;
        Ok(self
            .graph
            .heads()
            .iter()
            .map(|id| HeadEntry {
                id: id.clone(),
                branch_label: self.graph.get(id).and_then(|r| r.branch_label.clone()),
                applied: state.contains(id),
            })
            .collect())
    }

    /// Step log, oldest first
    pub fn log(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<Vec<StepLogEntry>> {
        conn.read_log()
    }

    /// Overwrite the version table so it matches `target`, running no operations
    ///
    /// The existing rows are not validated, so this also repairs a corrupted
    /// version table.
    pub fn stamp(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &Target,
    ) -> MigrationResult<AppliedState> {
        let targets = Planner::new(&self.graph).target_revisions(target)?;
        let stamped = AppliedState::from_ids(
            targets
                .iter()
                .flat_map(|t| self.graph.ancestors_inclusive(t)),
        );

        with_migration_lock(conn, &self.holder, |conn| {
            conn.begin()?;
            let outcome = VersionTracker::new(&self.graph)
                .write(&mut *conn, &stamped)
                .and_then(|_| conn.commit());
            if let Err(e) = outcome {
                if let Err(rollback) = conn.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e);
            }
            Ok(())
        })?;

        info!(target = %target, applied = stamped.len(), "version table stamped");
        Ok(stamped)
    }
}

/// Current state report
#[derive(Debug, Clone, Serialize)]
pub struct CurrentReport {
    pub applied: Vec<RevisionId>,
    /// Applied revisions with no applied children
    pub current_heads: Vec<RevisionId>,
    pub at_head: bool,
}

/// One row of `history`
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: RevisionId,
    pub description: String,
    pub parent_ids: Vec<RevisionId>,
    pub depends_on: Vec<RevisionId>,
    pub branch_label: Option<String>,
    pub applied: bool,
    pub is_head: bool,
    pub is_base: bool,
    pub is_merge_point: bool,
    pub is_branch_point: bool,
}

/// One row of `heads`
#[derive(Debug, Clone, Serialize)]
pub struct HeadEntry {
    pub id: RevisionId,
    pub branch_label: Option<String>,
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::sqlite::{SqliteConnection, DEFAULT_VERSION_TABLE};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_revision(dir: &Path, file: &str, content: &str) {
        fs::write(dir.join(file), content).unwrap();
    }

    fn setup() -> (TempDir, MigrationRunner, SqliteConnection) {
        let temp_dir = TempDir::new().unwrap();
        let revisions_dir = temp_dir.path().join("revisions");
        fs::create_dir_all(&revisions_dir).unwrap();

        write_revision(
            &revisions_dir,
            "a1_users.yaml",
            r#"
id: a1
description: create users
parent_ids: []
upgrade:
  - create_table:
      name: users
      columns:
        - { name: id, type: INTEGER, primary_key: true }
        - { name: email, type: TEXT, nullable: false }
downgrade:
  - drop_table:
      name: users
"#,
        );
        write_revision(
            &revisions_dir,
            "b2_posts.yaml",
            r#"
id: b2
description: create posts
parent_ids: [a1]
upgrade:
  - create_table:
      name: posts
      columns:
        - { name: id, type: INTEGER, primary_key: true }
        - { name: user_id, type: INTEGER }
  - create_index:
      table: posts
      columns: [user_id]
downgrade:
  - drop_table:
      name: posts
"#,
        );
        write_revision(
            &revisions_dir,
            "c3_processed.yaml",
            r#"
id: c3
description: add processed flag
parent_ids: a1
depends_on: [b2]
upgrade:
  - add_column:
      table: users
      column: { name: processed, type: BOOLEAN, nullable: false, default: "0" }
downgrade:
  - drop_column:
      table: users
      column: processed
"#,
        );

        let runner = MigrationRunner::new(
            RevisionStore::directory(&revisions_dir),
            HeadPolicy::AllowBranches,
        )
        .unwrap();
        let conn =
            SqliteConnection::open(temp_dir.path().join("app.db"), DEFAULT_VERSION_TABLE).unwrap();
        (temp_dir, runner, conn)
    }

    #[test]
    fn test_upgrade_heads_and_back_to_base() {
        let (_dir, runner, mut conn) = setup();

        let report = runner.upgrade(&mut conn, &Target::Heads).unwrap();
        assert!(report.is_success());
        assert_eq!(report.completed_ids(), ["a1", "b2", "c3"]);
        assert!(conn.table_exists("users").unwrap());
        assert!(conn.table_exists("posts").unwrap());

        let current = runner.current(&mut conn).unwrap();
        assert!(current.at_head);
        assert_eq!(current.applied, ["a1", "b2", "c3"]);

        let report = runner.downgrade(&mut conn, &Target::Base).unwrap();
        assert_eq!(report.completed_ids(), ["c3", "b2", "a1"]);
        assert!(!conn.table_exists("users").unwrap());
        assert!(runner.current(&mut conn).unwrap().applied.is_empty());
    }

    #[test]
    fn test_direction_mismatch() {
        let (_dir, runner, mut conn) = setup();
        runner.upgrade(&mut conn, &Target::Heads).unwrap();

        let err = runner
            .upgrade(&mut conn, &Target::Revision("a1".into()))
            .unwrap_err();
        assert_eq!(err.kind(), "DIRECTION_MISMATCH_ERROR");

        let err = runner
            .downgrade(&mut conn, &Target::Revision("zz".into()))
            .unwrap_err();
        assert_eq!(err.kind(), "UNKNOWN_TARGET_ERROR");
    }

    #[test]
    fn test_head_with_two_heads() {
        let (_dir, runner, mut conn) = setup();
        let err = runner.upgrade(&mut conn, &Target::Head).unwrap_err();
        assert!(matches!(err, MigrationError::MultipleHeads { ref heads } if heads == &["b2", "c3"]));
        assert!(runner.current(&mut conn).unwrap().applied.is_empty());
    }

    #[test]
    fn test_dry_run_plan_does_not_touch_database() {
        let (_dir, runner, mut conn) = setup();
        let plan = runner
            .plan(&mut conn, &Target::Revision("c3".into()))
            .unwrap();

        assert_eq!(plan.to_string(), "[a1↑, b2↑, c3↑]");
        assert!(!conn.table_exists("users").unwrap());
    }

    #[test]
    fn test_history_and_heads() {
        let (_dir, runner, mut conn) = setup();
        runner
            .upgrade(&mut conn, &Target::Revision("b2".into()))
            .unwrap();

        let history = runner.history(&mut conn).unwrap();
        let ids: Vec<&str> = history.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a1", "b2", "c3"]);
        assert!(history[0].is_base);
        assert!(history[0].is_branch_point);
        assert!(history[1].applied);
        assert!(!history[2].applied);
        assert_eq!(history[2].depends_on, ["b2"]);

        let heads = runner.heads(&mut conn).unwrap();
        assert_eq!(heads.len(), 2);
        assert!(heads[0].applied);
        assert!(!heads[1].applied);
    }

    #[test]
    fn test_stamp_without_running_operations() {
        let (_dir, runner, mut conn) = setup();

        let stamped = runner
            .stamp(&mut conn, &Target::Revision("b2".into()))
            .unwrap();
        assert_eq!(stamped, AppliedState::from_ids(["a1", "b2"]));
        assert!(!conn.table_exists("users").unwrap());
        assert!(runner.log(&mut conn).unwrap().is_empty());

        runner.stamp(&mut conn, &Target::Base).unwrap();
        assert!(runner.current(&mut conn).unwrap().applied.is_empty());
    }

    #[test]
    fn test_stamp_repairs_corrupted_state() {
        let (_dir, runner, mut conn) = setup();
        conn.insert_revision("ghost").unwrap();
        assert_eq!(
            runner.current(&mut conn).unwrap_err().kind(),
            "STATE_CORRUPTION_ERROR"
        );

        runner.stamp(&mut conn, &Target::Base).unwrap();
        assert!(runner.current(&mut conn).unwrap().applied.is_empty());
    }

    #[test]
    fn test_failure_reports_verbatim_driver_error() {
        let (_dir, runner, mut conn) = setup();
        conn.connection()
            .execute_batch("CREATE TABLE posts (id INTEGER)")
            .unwrap();

        let report = runner.upgrade(&mut conn, &Target::Heads).unwrap();
        assert_eq!(report.completed_ids(), ["a1"]);
        let failed = report.failed.unwrap();
        assert_eq!(failed.revision_id, "b2");
        assert!(failed.error.contains("already exists"));

        let log = runner.log(&mut conn).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].revision_id, "a1");
    }

    #[test]
    fn test_retry_after_fix_resumes_from_failed_step() {
        let (_dir, runner, mut conn) = setup();
        conn.connection()
            .execute_batch("CREATE TABLE posts (id INTEGER)")
            .unwrap();

        let report = runner.upgrade(&mut conn, &Target::Heads).unwrap();
        assert_eq!(report.failed.unwrap().revision_id, "b2");
        assert_eq!(runner.current(&mut conn).unwrap().applied, ["a1"]);

        conn.connection().execute_batch("DROP TABLE posts").unwrap();
        let report = runner.upgrade(&mut conn, &Target::Heads).unwrap();
        assert!(report.is_success());
        assert_eq!(report.completed_ids(), ["b2", "c3"]);

        let report = runner.upgrade(&mut conn, &Target::Heads).unwrap();
        assert!(report.completed.is_empty());
    }

    #[test]
    fn test_lock_released_after_run() {
        let (_dir, runner, mut conn) = setup();
        runner.upgrade(&mut conn, &Target::Heads).unwrap();
        conn.acquire_lock("other-runner").unwrap();
        conn.release_lock().unwrap();
    }

    #[test]
    fn test_load_errors_surface_at_construction() {
        let temp_dir = TempDir::new().unwrap();
        write_revision(
            temp_dir.path(),
            "x.yaml",
            "id: x\nparent_ids: [missing]\nupgrade:\n  - drop_table: { name: t }\ndowngrade: []\n",
        );

        let err = MigrationRunner::new(
            RevisionStore::directory(temp_dir.path()),
            HeadPolicy::SingleHead,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "DANGLING_REFERENCE_ERROR");
    }
}
