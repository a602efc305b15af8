//! # Migration Planner
//!
//! Turns (applied state, target) into an ordered list of steps. Planning is a
//! pure function of the graph and the state: same inputs, same plan.
//!
//! Targets:
//! - `head`: the single head (fails when the graph has several)
//! - `heads`: every head
//! - `base`: nothing applied
//! - `<label>@head`: the head of a labelled branch
//! - a full revision ID or a unique prefix of one
//!
//! A revision target that is already applied means "downgrade to here";
//! otherwise it means "upgrade to here".

use super::errors::{MigrationError, MigrationResult};
use super::graph::RevisionGraph;
use super::tracker::AppliedState;
use super::{Direction, RevisionId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Symbolic or concrete migration target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Head,
    Heads,
    Base,
    BranchHead(String),
    Revision(String),
}

impl Target {
    pub fn parse(raw: &str) -> MigrationResult<Self> {
        let raw = raw.trim();
        let target = match raw {
            "" => {
                return Err(MigrationError::UnknownTarget {
                    target: raw.to_string(),
                })
            }
            "head" => Target::Head,
            "heads" => Target::Heads,
            "base" => Target::Base,
            other => match other.strip_suffix("@head") {
                Some("") => {
                    return Err(MigrationError::UnknownTarget {
                        target: other.to_string(),
                    })
                }
                Some(label) => Target::BranchHead(label.to_string()),
                None => Target::Revision(other.to_string()),
            },
        };
        Ok(target)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => write!(f, "head"),
            Target::Heads => write!(f, "heads"),
            Target::Base => write!(f, "base"),
            Target::BranchHead(label) => write!(f, "{}@head", label),
            Target::Revision(id) => write!(f, "{}", id),
        }
    }
}

/// One revision, one direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub revision_id: RevisionId,
    pub direction: Direction,
}

impl PlanStep {
    pub fn new(revision_id: impl Into<RevisionId>, direction: Direction) -> Self {
        Self {
            revision_id: revision_id.into(),
            direction,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.revision_id, self.direction.arrow())
    }
}

/// Ordered steps toward a target. Every step shares one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub target: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Direction of the plan, `None` when there is nothing to do
    pub fn direction(&self) -> Option<Direction> {
        self.steps.first().map(|s| s.direction)
    }

    pub fn revision_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.revision_id.as_str()).collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

pub struct Planner<'g> {
    graph: &'g RevisionGraph,
}

impl<'g> Planner<'g> {
    pub fn new(graph: &'g RevisionGraph) -> Self {
        Self { graph }
    }

    /// Compute the plan that moves `current` to `target`
    pub fn plan(&self, current: &AppliedState, target: &Target) -> MigrationResult<Plan> {
        current.check_consistency(self.graph)?;

        let steps = match target {
            Target::Base => self.downgrade(current.ids().clone()),
            Target::Revision(query) => {
                let revision = self.graph.resolve(query)?;
                if current.contains(&revision.id) {
                    let to_remove = self
                        .graph
                        .descendants(&revision.id)
                        .into_iter()
                        .filter(|id| current.contains(id))
                        .collect();
                    self.downgrade(to_remove)
                } else {
                    self.upgrade(current, &[revision.id.clone()])
                }
            }
            Target::Head | Target::Heads | Target::BranchHead(_) => {
                let targets = self.target_revisions(target)?;
                self.upgrade(current, &targets)
            }
        };

        let plan = Plan {
            target: target.to_string(),
            steps,
        };
        debug!(target = %plan.target, steps = plan.len(), plan = %plan, "migration plan computed");
        Ok(plan)
    }

    /// Revisions a target names; empty for `base`
    pub fn target_revisions(&self, target: &Target) -> MigrationResult<Vec<RevisionId>> {
        match target {
            Target::Base => Ok(Vec::new()),
            Target::Heads => Ok(self.graph.heads().to_vec()),
            Target::Head => match self.graph.heads() {
                [] => Ok(Vec::new()),
                [single] => Ok(vec![single.clone()]),
                many => Err(MigrationError::MultipleHeads {
                    heads: many.to_vec(),
                }),
            },
            Target::BranchHead(label) => {
                let heads = self.graph.branch_heads(label);
                match heads.len() {
                    0 => Err(MigrationError::UnknownTarget {
                        target: target.to_string(),
                    }),
                    1 => Ok(heads),
                    _ => Err(MigrationError::AmbiguousTarget {
                        target: target.to_string(),
                        candidates: heads,
                    }),
                }
            }
            Target::Revision(query) => Ok(vec![self.graph.resolve(query)?.id.clone()]),
        }
    }

    fn upgrade(&self, current: &AppliedState, targets: &[RevisionId]) -> Vec<PlanStep> {
        let needed: BTreeSet<RevisionId> = targets
            .iter()
            .flat_map(|t| self.graph.ancestors_inclusive(t))
            .filter(|id| !current.contains(id))
            .collect();

        self.graph
            .sort(&needed, Direction::Upgrade)
            .into_iter()
            .map(|id| PlanStep::new(id, Direction::Upgrade))
            .collect()
    }

    fn downgrade(&self, to_remove: BTreeSet<RevisionId>) -> Vec<PlanStep> {
        self.graph
            .sort(&to_remove, Direction::Downgrade)
            .into_iter()
            .map(|id| PlanStep::new(id, Direction::Downgrade))
            .collect()
    }
}
