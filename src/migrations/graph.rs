//! # Revision Graph
//!
//! MANIFESTO ALIGNMENT: The graph is validated once, then immutable.
//!
//! Edges run parent -> child. Extra dependencies (`depends_on`) add ordering
//! edges but never make a revision someone's child, so they do not affect heads.
//!
//! `build` checks, in order: duplicate IDs, dangling references, cycles, and
//! (unless branches are allowed) multiple heads.

use super::errors::{MigrationError, MigrationResult};
use super::{Direction, Revision, RevisionId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How many heads the graph may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadPolicy {
    /// Exactly one head; anything else is `MultipleHeads`
    #[default]
    SingleHead,
    /// Unmerged branches are tolerated; targets must disambiguate
    AllowBranches,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Validated, immutable revision graph
#[derive(Debug)]
pub struct RevisionGraph {
    revisions: BTreeMap<RevisionId, Revision>,
    children: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    dependents: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    heads: Vec<RevisionId>,
    bases: Vec<RevisionId>,
    order: Vec<RevisionId>,
    policy: HeadPolicy,
}

impl RevisionGraph {
    /// Build and validate the graph
    pub fn build(revisions: Vec<Revision>, policy: HeadPolicy) -> MigrationResult<Self> {
        let mut by_id: BTreeMap<RevisionId, Revision> = BTreeMap::new();
        for revision in revisions {
            if let Some(existing) = by_id.get(&revision.id) {
                return Err(MigrationError::DuplicateRevision {
                    id: revision.id.clone(),
                    first: existing.origin(),
                    second: revision.origin(),
                });
            }
            by_id.insert(revision.id.clone(), revision);
        }

        // Single pass over every referenced ID
        for revision in by_id.values() {
            if let Some(missing) = revision.prerequisites().find(|p| !by_id.contains_key(*p)) {
                return Err(MigrationError::DanglingReference {
                    revision: revision.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        if let Some(members) = find_cycle(&by_id) {
            return Err(MigrationError::Cycle { members });
        }

        let mut children: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
        let mut dependents: BTreeMap<RevisionId, BTreeSet<RevisionId>> = BTreeMap::new();
        for revision in by_id.values() {
            for parent in &revision.parent_ids {
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(revision.id.clone());
            }
            for dependency in &revision.depends_on {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(revision.id.clone());
            }
        }

        let heads: Vec<RevisionId> = by_id
            .keys()
            .filter(|id| !children.contains_key(*id))
            .cloned()
            .collect();
        let bases: Vec<RevisionId> = by_id
            .values()
            .filter(|r| r.is_base())
            .map(|r| r.id.clone())
            .collect();

        if policy == HeadPolicy::SingleHead && heads.len() > 1 {
            return Err(MigrationError::MultipleHeads { heads });
        }

        let mut graph = Self {
            revisions: by_id,
            children,
            dependents,
            heads,
            bases,
            order: Vec::new(),
            policy,
        };
        let all: BTreeSet<RevisionId> = graph.revisions.keys().cloned().collect();
        graph.order = graph.sort(&all, Direction::Upgrade);
        Ok(graph)
    }

    pub fn policy(&self) -> HeadPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    /// Revisions with no children, sorted by ID
    pub fn heads(&self) -> &[RevisionId] {
        &self.heads
    }

    /// Revisions with no parents, sorted by ID
    pub fn bases(&self) -> &[RevisionId] {
        &self.bases
    }

    /// Every revision, parents before children, ties broken by ID
    pub fn topological_order(&self) -> &[RevisionId] {
        &self.order
    }

    /// Revisions in topological order
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.order.iter().filter_map(|id| self.revisions.get(id))
    }

    /// Direct children (parent edges only)
    pub fn children(&self, id: &str) -> impl Iterator<Item = &RevisionId> {
        self.children.get(id).into_iter().flatten()
    }

    pub fn is_branch_point(&self, id: &str) -> bool {
        self.children.get(id).map(|c| c.len() > 1).unwrap_or(false)
    }

    /// Children and dependents: everything that must be reverted first
    pub fn successors(&self, id: &str) -> BTreeSet<&RevisionId> {
        self.children
            .get(id)
            .into_iter()
            .chain(self.dependents.get(id))
            .flatten()
            .collect()
    }

    fn prerequisites(&self, id: &str) -> BTreeSet<&RevisionId> {
        self.revisions
            .get(id)
            .map(|r| r.prerequisites().collect())
            .unwrap_or_default()
    }

    /// The revision and everything it requires, transitively
    pub fn ancestors_inclusive(&self, id: &str) -> BTreeSet<RevisionId> {
        self.walk(id, |graph, node| graph.prerequisites(node), true)
    }

    /// Everything that requires the revision, transitively, excluding itself
    pub fn descendants(&self, id: &str) -> BTreeSet<RevisionId> {
        self.walk(id, |graph, node| graph.successors(node), false)
    }

    /// Parent-only ancestry, including the revision itself
    pub fn lineage(&self, id: &str) -> BTreeSet<RevisionId> {
        self.walk(
            id,
            |graph, node| {
                graph
                    .revisions
                    .get(node)
                    .map(|r| r.parent_ids.iter().collect())
                    .unwrap_or_default()
            },
            true,
        )
    }

    fn walk<'a, F>(&'a self, start: &str, next: F, inclusive: bool) -> BTreeSet<RevisionId>
    where
        F: Fn(&'a Self, &str) -> BTreeSet<&'a RevisionId>,
    {
        let mut seen: BTreeSet<RevisionId> = BTreeSet::new();
        let mut pending: Vec<RevisionId> = vec![start.to_string()];
        while let Some(node) = pending.pop() {
            for neighbour in next(self, node.as_str()) {
                if seen.insert(neighbour.clone()) {
                    pending.push(neighbour.clone());
                }
            }
        }
        if inclusive {
            seen.insert(start.to_string());
        } else {
            seen.remove(start);
        }
        seen
    }

    /// Heads whose lineage carries the branch label
    pub fn branch_heads(&self, label: &str) -> Vec<RevisionId> {
        self.heads
            .iter()
            .filter(|head| {
                self.lineage(head).iter().any(|id| {
                    self.revisions
                        .get(id)
                        .and_then(|r| r.branch_label.as_deref())
                        == Some(label)
                })
            })
            .cloned()
            .collect()
    }

    /// Resolve a full revision ID or a unique prefix of one
    pub fn resolve(&self, query: &str) -> MigrationResult<&Revision> {
        if let Some(revision) = self.revisions.get(query) {
            return Ok(revision);
        }

        let candidates: Vec<&Revision> = self
            .revisions
            .range(query.to_string()..)
            .take_while(|(id, _)| id.starts_with(query))
            .map(|(_, r)| r)
            .collect();

        match candidates.as_slice() {
            [] => Err(MigrationError::UnknownTarget {
                target: query.to_string(),
            }),
            [single] => Ok(*single),
            many => Err(MigrationError::AmbiguousTarget {
                target: query.to_string(),
                candidates: many.iter().map(|r| r.id.clone()).collect(),
            }),
        }
    }

    /// Deterministic topological sort of a subset
    ///
    /// `Upgrade` puts prerequisites first; `Downgrade` puts children and
    /// dependents first. Ties go to the lexicographically smallest ID.
    pub fn sort(&self, subset: &BTreeSet<RevisionId>, direction: Direction) -> Vec<RevisionId> {
        let before = |id: &str| {
            let edges = match direction {
                Direction::Upgrade => self.prerequisites(id),
                Direction::Downgrade => self.successors(id),
            };
            edges
                .into_iter()
                .filter(|e| subset.contains(*e))
                .collect::<BTreeSet<_>>()
        };
        let after = |id: &str| {
            let edges = match direction {
                Direction::Upgrade => self.successors(id),
                Direction::Downgrade => self.prerequisites(id),
            };
            edges
                .into_iter()
                .filter(|e| subset.contains(*e))
                .collect::<BTreeSet<_>>()
        };

        let mut waiting: HashMap<&str, usize> = subset
            .iter()
            .map(|id| (id.as_str(), before(id.as_str()).len()))
            .collect();
        let mut ready: BTreeSet<&str> = waiting
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted = Vec::with_capacity(subset.len());
        while let Some(next) = ready.pop_first() {
            sorted.push(next.to_string());
            for successor in after(next) {
                if let Some(count) = waiting.get_mut(successor.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(successor.as_str());
                    }
                }
            }
        }
        sorted
    }
}

/// Three-color DFS over prerequisite edges; returns the cycle's members
///
/// Iterative: the path lives on the heap, so long linear histories cannot
/// overflow the call stack.
fn find_cycle(revisions: &BTreeMap<RevisionId, Revision>) -> Option<Vec<RevisionId>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in revisions.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }

        // Each frame holds a revision and the prerequisites still to visit
        let mut path: Vec<(&str, Vec<&str>)> = Vec::new();
        let root = root.as_str();
        marks.insert(root, Mark::InProgress);
        path.push((root, pending_prerequisites(root, revisions)));

        while let Some((_, pending)) = path.last_mut() {
            let next = pending.pop();
            match next {
                Some(id) => match marks.get(id) {
                    Some(Mark::Done) => {}
                    Some(Mark::InProgress) => {
                        let start = path.iter().position(|(s, _)| *s == id).unwrap_or(0);
                        return Some(path[start..].iter().map(|(s, _)| s.to_string()).collect());
                    }
                    None => {
                        marks.insert(id, Mark::InProgress);
                        path.push((id, pending_prerequisites(id, revisions)));
                    }
                },
                None => {
                    if let Some((done, _)) = path.pop() {
                        marks.insert(done, Mark::Done);
                    }
                }
            }
        }
    }
    None
}

/// Prerequisites in reverse ID order, so popping visits them ascending
fn pending_prerequisites<'a>(
    id: &str,
    revisions: &'a BTreeMap<RevisionId, Revision>,
) -> Vec<&'a str> {
    let ordered: BTreeSet<&'a str> = revisions
        .get(id)
        .map(|r| r.prerequisites().map(String::as_str).collect())
        .unwrap_or_default();
    ordered.into_iter().rev().collect()
}
