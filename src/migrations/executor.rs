//! # Plan Executor
//!
//! MANIFESTO ALIGNMENT: Deterministic, transactional migration execution.
//!
//! Each step runs in its own transaction: the revision's operation, the
//! version marker and the log entry commit together or not at all. The first
//! failure rolls back its own step and halts; earlier steps stay committed.
//!
//! Before the first step the executor replays the plan against the current
//! state. Steps already reflected in the state are skipped, so re-running an
//! interrupted plan resumes where it stopped. A step whose precondition no
//! longer holds aborts the run before anything is touched.

use super::connection::DatabaseConnection;
use super::errors::{MigrationError, MigrationResult};
use super::graph::RevisionGraph;
use super::planner::{Plan, PlanStep};
use super::tracker::{AppliedState, VersionTracker};
use super::{Direction, RevisionId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Successfully committed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStep {
    pub revision_id: RevisionId,
    pub direction: Direction,
    pub duration_ms: u64,
}

/// Step that failed and was rolled back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub revision_id: RevisionId,
    pub direction: Direction,
    pub error: String,
}

impl FailedStep {
    pub fn to_error(&self) -> MigrationError {
        MigrationError::StepExecution {
            revision: self.revision_id.clone(),
            direction: self.direction,
            message: self.error.clone(),
        }
    }
}

/// Report from executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub completed: Vec<CompletedStep>,
    /// Plan steps already reflected in the state when execution began
    pub skipped: Vec<PlanStep>,
    pub failed: Option<FailedStep>,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_none() && !self.cancelled
    }

    pub fn completed_ids(&self) -> Vec<&str> {
        self.completed
            .iter()
            .map(|s| s.revision_id.as_str())
            .collect()
    }
}

/// Hold the migration lock for the duration of `f`
///
/// The lock is released whether `f` succeeds or fails.
pub fn with_migration_lock<T, F>(
    conn: &mut dyn DatabaseConnection,
    holder: &str,
    f: F,
) -> MigrationResult<T>
where
    F: FnOnce(&mut dyn DatabaseConnection) -> MigrationResult<T>,
{
    conn.acquire_lock(holder)?;

    let result = f(&mut *conn);

    if let Err(e) = conn.release_lock() {
        warn!(holder, error = %e, "failed to release migration lock");
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

/// Default lock holder for this process
pub fn default_holder() -> String {
    format!("runner-{}", std::process::id())
}

pub struct Executor<'g> {
    graph: &'g RevisionGraph,
    cancel: CancellationToken,
    holder: String,
    applied_by: String,
}

impl<'g> Executor<'g> {
    pub fn new(graph: &'g RevisionGraph) -> Self {
        Self {
            graph,
            cancel: CancellationToken::new(),
            holder: default_holder(),
            applied_by: whoami::username(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Execute a plan under the migration lock
    pub fn execute(
        &self,
        plan: &Plan,
        conn: &mut dyn DatabaseConnection,
    ) -> MigrationResult<ExecutionResult> {
        with_migration_lock(conn, &self.holder, |conn| self.execute_locked(plan, conn))
    }

    /// Execute a plan; the caller already holds the lock
    pub(crate) fn execute_locked(
        &self,
        plan: &Plan,
        conn: &mut dyn DatabaseConnection,
    ) -> MigrationResult<ExecutionResult> {
        let tracker = VersionTracker::new(self.graph);
        let state = tracker.read(conn)?;
        let (pending, skipped) = self.reconcile(plan, &state)?;

        if !skipped.is_empty() {
            info!(
                skipped = skipped.len(),
                "plan steps already reflected in applied state"
            );
        }

        let mut result = ExecutionResult {
            skipped,
            ..Default::default()
        };

        for step in pending {
            if self.cancel.is_cancelled() {
                warn!(
                    completed = result.completed.len(),
                    next = %step.revision_id,
                    "migration cancelled between steps"
                );
                result.cancelled = true;
                break;
            }

            match self.run_step(&tracker, &step, conn) {
                Ok(duration_ms) => {
                    info!(
                        revision = %step.revision_id,
                        direction = %step.direction,
                        duration_ms,
                        "migration step committed"
                    );
                    result.completed.push(CompletedStep {
                        revision_id: step.revision_id,
                        direction: step.direction,
                        duration_ms,
                    });
                }
                Err(e) => {
                    let error = underlying_message(e);
                    warn!(
                        revision = %step.revision_id,
                        direction = %step.direction,
                        error = %error,
                        "migration step failed, rolled back"
                    );
                    result.failed = Some(FailedStep {
                        revision_id: step.revision_id,
                        direction: step.direction,
                        error,
                    });
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Split a plan into steps still to run and steps already reflected,
    /// checking each remaining step's precondition
    fn reconcile(
        &self,
        plan: &Plan,
        state: &AppliedState,
    ) -> MigrationResult<(Vec<PlanStep>, Vec<PlanStep>)> {
        let mut simulated = state.clone();
        let mut pending = Vec::new();
        let mut skipped = Vec::new();

        for step in &plan.steps {
            let revision = self.graph.get(&step.revision_id).ok_or_else(|| {
                MigrationError::UnknownTarget {
                    target: step.revision_id.clone(),
                }
            })?;

            match step.direction {
                Direction::Upgrade => {
                    if simulated.contains(&revision.id) {
                        skipped.push(step.clone());
                        continue;
                    }
                    if let Some(missing) = revision.prerequisites().find(|p| !simulated.contains(p)) {
                        return Err(MigrationError::CannotApply {
                            revision: revision.id.clone(),
                            reason: format!("prerequisite '{}' is not applied", missing),
                        });
                    }
                }
                Direction::Downgrade => {
                    if !simulated.contains(&revision.id) {
                        skipped.push(step.clone());
                        continue;
                    }
                    let blocking = self
                        .graph
                        .successors(&revision.id)
                        .into_iter()
                        .find(|s| simulated.contains(s));
                    if let Some(blocking) = blocking {
                        return Err(MigrationError::CannotRollback {
                            revision: revision.id.clone(),
                            reason: format!("'{}' is still applied and requires it", blocking),
                        });
                    }
                }
            }

            simulated.apply(step);
            pending.push(step.clone());
        }

        Ok((pending, skipped))
    }

    /// One transaction: operation, version marker, log entry
    fn run_step(
        &self,
        tracker: &VersionTracker<'_>,
        step: &PlanStep,
        conn: &mut dyn DatabaseConnection,
    ) -> MigrationResult<u64> {
        let revision = self.graph.get(&step.revision_id).ok_or_else(|| {
            MigrationError::UnknownTarget {
                target: step.revision_id.clone(),
            }
        })?;

        let start = Instant::now();
        conn.begin()?;

        let outcome = revision
            .operation(step.direction)
            .apply(&mut *conn)
            .and_then(|_| {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracker
                    .record_step(&mut *conn, step, duration_ms, &self.applied_by)
                    .map(|_| duration_ms)
            })
            .and_then(|duration_ms| conn.commit().map(|_| duration_ms));

        if outcome.is_err() {
            if let Err(rollback) = conn.rollback() {
                warn!(revision = %step.revision_id, error = %rollback, "rollback failed");
            }
        }
        outcome
    }
}

/// Driver messages pass through unwrapped
fn underlying_message(err: MigrationError) -> String {
    match err {
        MigrationError::Database { message } => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::connection::InMemoryConnection;
    use crate::migrations::graph::HeadPolicy;
    use crate::migrations::planner::{Planner, Target};
    use crate::migrations::{Revision, SchemaOperation, Script};

    fn sql(statement: &str) -> Script {
        Script::new(vec![SchemaOperation::Sql {
            statement: statement.to_string(),
        }])
    }

    fn rev(id: &str, parents: &[&str]) -> Revision {
        Revision::new(id)
            .parents(parents.iter().copied())
            .upgrade(sql(&format!("UP {}", id)))
            .downgrade(sql(&format!("DOWN {}", id)))
    }

    fn graph() -> RevisionGraph {
        RevisionGraph::build(
            vec![rev("A", &[]), rev("B", &["A"]), rev("C", &["B"])],
            HeadPolicy::SingleHead,
        )
        .unwrap()
    }

    fn plan(graph: &RevisionGraph, conn: &mut InMemoryConnection, target: Target) -> Plan {
        let state = VersionTracker::new(graph).read(conn).unwrap();
        Planner::new(graph).plan(&state, &target).unwrap()
    }

    #[test]
    fn test_execute_full_upgrade() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        let plan = plan(&graph, &mut conn, Target::Head);

        let result = Executor::new(&graph).execute(&plan, &mut conn).unwrap();

        assert!(result.is_success());
        assert_eq!(result.completed_ids(), ["A", "B", "C"]);
        assert_eq!(conn.statements(), ["UP A", "UP B", "UP C"]);
        assert_eq!(conn.log().len(), 3);
        assert_eq!(conn.commits(), 3);
        assert!(conn.lock_holder().is_none());
    }

    #[test]
    fn test_failure_halts_and_retry_resumes() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        conn.fail_on("UP B");
        let plan = plan(&graph, &mut conn, Target::Head);

        let result = Executor::new(&graph).execute(&plan, &mut conn).unwrap();

        assert_eq!(result.completed_ids(), ["A"]);
        let failed = result.failed.clone().unwrap();
        assert_eq!(failed.revision_id, "B");
        assert!(failed.error.contains("simulated failure on 'UP B'"));
        assert_eq!(failed.to_error().kind(), "STEP_EXECUTION_ERROR");
        assert_eq!(conn.applied().into_iter().collect::<Vec<_>>(), ["A"]);
        assert_eq!(conn.rollbacks(), 1);
        assert!(!conn.in_transaction());

        conn.clear_failures();
        let retry = Executor::new(&graph).execute(&plan, &mut conn).unwrap();
        assert!(retry.is_success());
        assert_eq!(retry.completed_ids(), ["B", "C"]);
        assert_eq!(retry.skipped.len(), 1);
        assert_eq!(conn.statements(), ["UP A", "UP B", "UP C"]);
    }

    #[test]
    fn test_reexecuting_is_a_noop() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        let plan = plan(&graph, &mut conn, Target::Head);
        let executor = Executor::new(&graph);

        executor.execute(&plan, &mut conn).unwrap();
        let again = executor.execute(&plan, &mut conn).unwrap();

        assert!(again.completed.is_empty());
        assert_eq!(again.skipped.len(), 3);
        assert_eq!(conn.statements().len(), 3);
    }

    #[test]
    fn test_round_trip_to_base() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        let executor = Executor::new(&graph);

        let up = plan(&graph, &mut conn, Target::Head);
        executor.execute(&up, &mut conn).unwrap();
        let down = plan(&graph, &mut conn, Target::Base);
        let result = executor.execute(&down, &mut conn).unwrap();

        assert_eq!(result.completed_ids(), ["C", "B", "A"]);
        assert!(conn.applied().is_empty());
        assert_eq!(
            conn.statements(),
            ["UP A", "UP B", "UP C", "DOWN C", "DOWN B", "DOWN A"]
        );
    }

    #[test]
    fn test_cancellation_before_start() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        let plan = plan(&graph, &mut conn, Target::Head);
        let token = CancellationToken::new();
        token.cancel();

        let result = Executor::new(&graph)
            .with_cancellation(token)
            .execute(&plan, &mut conn)
            .unwrap();

        assert!(result.cancelled);
        assert!(!result.is_success());
        assert!(result.completed.is_empty());
        assert!(conn.applied().is_empty());
    }

    #[test]
    fn test_cancellation_between_steps() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let graph = RevisionGraph::build(
            vec![
                Revision::new("A").upgrade(move |_: &mut dyn DatabaseConnection| -> MigrationResult<()> {
                    trigger.cancel();
                    Ok(())
                }),
                rev("B", &["A"]),
            ],
            HeadPolicy::SingleHead,
        )
        .unwrap();
        let mut conn = InMemoryConnection::new();
        let plan = plan(&graph, &mut conn, Target::Head);

        let result = Executor::new(&graph)
            .with_cancellation(token)
            .execute(&plan, &mut conn)
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.completed_ids(), ["A"]);
        assert_eq!(conn.applied().into_iter().collect::<Vec<_>>(), ["A"]);
    }

    #[test]
    fn test_stale_plan_rejected_before_any_step() {
        let graph = graph();
        let plan = Plan {
            target: "C".to_string(),
            steps: vec![
                PlanStep::new("B", Direction::Upgrade),
                PlanStep::new("C", Direction::Upgrade),
            ],
        };
        let mut conn = InMemoryConnection::new();

        let err = Executor::new(&graph).execute(&plan, &mut conn).unwrap_err();

        assert!(matches!(err, MigrationError::CannotApply { ref revision, .. } if revision == "B"));
        assert!(conn.statements().is_empty());
        assert!(conn.lock_holder().is_none());
    }

    #[test]
    fn test_rollback_blocked_by_applied_child() {
        let graph = graph();
        let plan = Plan {
            target: "A".to_string(),
            steps: vec![PlanStep::new("B", Direction::Downgrade)],
        };
        let mut conn = InMemoryConnection::new().with_applied(["A", "B", "C"]);

        let err = Executor::new(&graph).execute(&plan, &mut conn).unwrap_err();
        assert_eq!(err.kind(), "STALE_PLAN_ERROR");
    }

    #[test]
    fn test_locked_connection_refused() {
        let graph = graph();
        let mut conn = InMemoryConnection::new();
        let plan = plan(&graph, &mut conn, Target::Head);
        conn.acquire_lock("someone-else").unwrap();

        let err = Executor::new(&graph).execute(&plan, &mut conn).unwrap_err();
        assert_eq!(err.kind(), "MIGRATION_LOCKED");
        assert!(conn.applied().is_empty());
    }
}
