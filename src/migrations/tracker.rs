//! # Version Tracking
//!
//! MANIFESTO ALIGNMENT: Persistent, auditable migration state.
//!
//! The applied state lives in the target database: one row per applied
//! revision, written inside the same transaction as the step that caused it.
//! Reads are validated against the graph; a mismatch is fatal and never
//! auto-repaired.

use super::connection::{DatabaseConnection, StepLogEntry};
use super::errors::{MigrationError, MigrationResult};
use super::graph::RevisionGraph;
use super::planner::PlanStep;
use super::{Direction, RevisionId};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;

/// Set of applied revision IDs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedState {
    applied_ids: BTreeSet<RevisionId>,
}

impl AppliedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RevisionId>,
    {
        Self {
            applied_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ids(&self) -> &BTreeSet<RevisionId> {
        &self.applied_ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.applied_ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.applied_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied_ids.is_empty()
    }

    /// Apply one step's delta
    pub fn apply(&mut self, step: &PlanStep) {
        match step.direction {
            Direction::Upgrade => {
                self.applied_ids.insert(step.revision_id.clone());
            }
            Direction::Downgrade => {
                self.applied_ids.remove(&step.revision_id);
            }
        }
    }

    /// Applied revisions none of whose children are applied
    pub fn current_heads(&self, graph: &RevisionGraph) -> Vec<RevisionId> {
        self.applied_ids
            .iter()
            .filter(|id| !graph.children(id).any(|child| self.contains(child)))
            .cloned()
            .collect()
    }

    /// Check that every ID is known and nothing has a gap beneath it
    pub fn check_consistency(&self, graph: &RevisionGraph) -> MigrationResult<()> {
        let unknown: Vec<RevisionId> = self
            .applied_ids
            .iter()
            .filter(|id| !graph.contains(id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(MigrationError::StateCorruption {
                revisions: unknown,
                reason: "applied revisions are absent from the revision graph".to_string(),
            });
        }

        let gapped: Vec<RevisionId> = self
            .applied_ids
            .iter()
            .filter(|id| {
                graph
                    .get(id)
                    .map(|r| r.prerequisites().any(|p| !self.contains(p)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !gapped.is_empty() {
            return Err(MigrationError::StateCorruption {
                revisions: gapped,
                reason: "applied revisions have unapplied prerequisites".to_string(),
            });
        }

        Ok(())
    }
}

/// Reads and writes the applied state through a connection
pub struct VersionTracker<'g> {
    graph: &'g RevisionGraph,
}

impl<'g> VersionTracker<'g> {
    pub fn new(graph: &'g RevisionGraph) -> Self {
        Self { graph }
    }

    /// Read and validate the applied state
    pub fn read(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<AppliedState> {
        let state = AppliedState::from_ids(conn.applied_revisions()?);
        state.check_consistency(self.graph)?;
        Ok(state)
    }

    /// Replace the persisted state with `target`
    ///
    /// Runs in the caller's transaction. The current rows are not validated, so
    /// this is the repair path for a corrupted marker.
    pub fn write(
        &self,
        conn: &mut dyn DatabaseConnection,
        target: &AppliedState,
    ) -> MigrationResult<()> {
        target.check_consistency(self.graph)?;

        let existing: BTreeSet<RevisionId> = conn.applied_revisions()?.into_iter().collect();
        for stale in existing.difference(target.ids()) {
            conn.delete_revision(stale)?;
        }
        for missing in target.ids().difference(&existing) {
            conn.insert_revision(missing)?;
        }
        Ok(())
    }

    /// Persist one step's delta and its log entry, in the step's transaction
    pub fn record_step(
        &self,
        conn: &mut dyn DatabaseConnection,
        step: &PlanStep,
        duration_ms: u64,
        applied_by: &str,
    ) -> MigrationResult<()> {
        match step.direction {
            Direction::Upgrade => conn.insert_revision(&step.revision_id)?,
            Direction::Downgrade => conn.delete_revision(&step.revision_id)?,
        }
        conn.append_log(&StepLogEntry {
            revision_id: step.revision_id.clone(),
            direction: step.direction,
            applied_at: Utc::now(),
            duration_ms,
            applied_by: applied_by.to_string(),
        })
    }
}
