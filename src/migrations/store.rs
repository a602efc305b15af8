//! # Revision Store
//!
//! Loads revision descriptors. Pure data access: the only checks made here are
//! the ones that need the raw source (parse errors, missing fields, duplicate
//! IDs, checksums). Graph-level validation lives in [`super::graph`].

use super::checksum::{checksum_for_file, verify_file};
use super::errors::{MigrationError, MigrationResult};
use super::operations::Script;
use super::{Revision, RevisionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Words the target grammar claims for itself
const RESERVED_IDS: [&str; 3] = ["head", "heads", "base"];

/// On-disk revision descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionDescriptor {
    pub id: RevisionId,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Required; `null` or `[]` for a base revision
    #[serde(alias = "down_revision", deserialize_with = "one_or_many")]
    pub parent_ids: Vec<RevisionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_label: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<RevisionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    pub upgrade: Script,

    /// Required; `[]` declares a revision with nothing to revert
    pub downgrade: Script,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids,
    })
}

impl RevisionDescriptor {
    /// Structural validation
    pub fn validate(&self) -> MigrationResult<()> {
        let invalid = |reason: String| MigrationError::InvalidRevision {
            id: self.id.clone(),
            reason,
        };

        validate_id(&self.id).map_err(invalid)?;
        for parent in self.parent_ids.iter().chain(self.depends_on.iter()) {
            validate_id(parent).map_err(|reason| invalid(format!("reference {}", reason)))?;
        }

        let mut seen = std::collections::BTreeSet::new();
        if let Some(parent) = self.parent_ids.iter().find(|p| !seen.insert(p.as_str())) {
            return Err(invalid(format!("parent '{}' listed more than once", parent)));
        }

        if let Some(label) = &self.branch_label {
            if label.trim().is_empty() || label.contains('@') {
                return Err(invalid(format!("invalid branch label '{}'", label)));
            }
        }

        if self.upgrade.is_empty() {
            return Err(invalid(
                "Revision must have at least one 'upgrade' operation".to_string(),
            ));
        }

        for op in self
            .upgrade
            .operations()
            .iter()
            .chain(self.downgrade.operations())
        {
            op.validate().map_err(invalid)?;
        }

        Ok(())
    }

    /// Convert to an executable revision
    pub fn into_revision(self, file_path: PathBuf) -> Revision {
        let mut revision = Revision::new(self.id)
            .description(self.description)
            .parents(self.parent_ids)
            .depends_on(self.depends_on)
            .upgrade(self.upgrade)
            .downgrade(self.downgrade);
        if let Some(label) = self.branch_label {
            revision = revision.branch_label(label);
        }
        revision.with_source(self.checksum, file_path)
    }
}

fn validate_id(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("ID must not be empty".to_string());
    }
    if id.chars().any(|c| c.is_whitespace() || c == '@') {
        return Err(format!("ID '{}' must not contain whitespace or '@'", id));
    }
    if RESERVED_IDS.contains(&id) {
        return Err(format!("ID '{}' is reserved", id));
    }
    Ok(())
}

enum RevisionSource {
    Directory(PathBuf),
    Registry(Vec<Revision>),
}

/// Revision source: a directory of YAML files or a programmatic registry
pub struct RevisionStore {
    source: RevisionSource,
}

impl RevisionStore {
    /// Store backed by a directory of `*.yaml` / `*.yml` files
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            source: RevisionSource::Directory(path.into()),
        }
    }

    /// Store backed by revisions built in code
    pub fn from_revisions(revisions: Vec<Revision>) -> Self {
        Self {
            source: RevisionSource::Registry(revisions),
        }
    }

    /// Load every revision
    ///
    /// Fails on the first malformed descriptor or duplicated ID.
    pub fn load(&self) -> MigrationResult<Vec<Revision>> {
        let revisions = match &self.source {
            RevisionSource::Directory(dir) => Self::load_directory(dir)?,
            RevisionSource::Registry(revisions) => revisions.clone(),
        };

        let mut origins: BTreeMap<&str, String> = BTreeMap::new();
        for revision in &revisions {
            let origin = revision.origin();
            if let Some(first) = origins.insert(revision.id.as_str(), origin.clone()) {
                return Err(MigrationError::DuplicateRevision {
                    id: revision.id.clone(),
                    first,
                    second: origin,
                });
            }
        }

        Ok(revisions)
    }

    fn load_directory(dir: &Path) -> MigrationResult<Vec<Revision>> {
        if !dir.is_dir() {
            return Err(MigrationError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let read_error = |source| MigrationError::FileRead {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_error)? {
            let path = entry.map_err(read_error)?.path();
            if is_revision_file(&path) {
                paths.push(path);
            }
        }
        // Deterministic order keeps duplicate reports stable
        paths.sort();

        paths.iter().map(|path| Self::load_file(path)).collect()
    }

    /// Load and validate a single revision file
    pub fn load_file(path: &Path) -> MigrationResult<Revision> {
        let content = fs::read_to_string(path).map_err(|source| MigrationError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let descriptor: RevisionDescriptor =
            serde_yaml::from_str(&content).map_err(|e| MigrationError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if let Some(declared) = descriptor.checksum.as_deref().filter(|c| !c.is_empty()) {
            if !verify_file(&content, declared) {
                return Err(MigrationError::ChecksumMismatch {
                    revision: descriptor.id.clone(),
                    expected: declared.to_string(),
                    actual: checksum_for_file(&content),
                });
            }
        }

        descriptor.validate()?;
        Ok(descriptor.into_revision(path.to_path_buf()))
    }
}

fn is_revision_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
}
