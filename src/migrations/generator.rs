//! # Revision Generator
//!
//! MANIFESTO ALIGNMENT: Deterministic revision file generation.
//!
//! Writes new, checksummed revision files. Parents default to the current
//! heads, so a new revision extends the graph instead of starting a branch.

use super::checksum::checksum_for_file;
use super::errors::{MigrationError, MigrationResult};
use super::graph::RevisionGraph;
use super::RevisionId;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

const ID_LENGTH: usize = 12;

/// Request for a new revision file
#[derive(Debug, Clone, Default)]
pub struct NewRevision {
    pub message: String,
    /// Explicit parents (IDs or unique prefixes); current heads when empty
    pub parents: Vec<String>,
    pub branch_label: Option<String>,
    pub depends_on: Vec<String>,
}

impl NewRevision {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Revision file that was written
#[derive(Debug, Clone, serde::Serialize)]
pub struct GeneratedRevision {
    pub id: RevisionId,
    pub path: PathBuf,
    pub parent_ids: Vec<RevisionId>,
}

pub struct RevisionGenerator {
    revisions_dir: PathBuf,
}

impl RevisionGenerator {
    pub fn new(revisions_dir: impl Into<PathBuf>) -> Self {
        Self {
            revisions_dir: revisions_dir.into(),
        }
    }

    /// Generate a new revision on top of `graph`
    pub fn create(
        &self,
        graph: &RevisionGraph,
        request: &NewRevision,
    ) -> MigrationResult<GeneratedRevision> {
        let parent_ids = if request.parents.is_empty() {
            match graph.heads() {
                many @ [_, _, ..] => {
                    return Err(MigrationError::MultipleHeads {
                        heads: many.to_vec(),
                    })
                }
                heads => heads.to_vec(),
            }
        } else {
            resolve_all(graph, &request.parents)?
        };
        let depends_on = resolve_all(graph, &request.depends_on)?;

        self.write(graph, request, parent_ids, depends_on)
    }

    /// Generate a merge revision whose parents are every current head
    pub fn merge(&self, graph: &RevisionGraph, message: &str) -> MigrationResult<GeneratedRevision> {
        let heads = graph.heads().to_vec();
        if heads.len() < 2 {
            return Err(MigrationError::InvalidRevision {
                id: heads.first().cloned().unwrap_or_default(),
                reason: "merge needs at least two heads".to_string(),
            });
        }
        self.write(graph, &NewRevision::new(message), heads, Vec::new())
    }

    fn write(
        &self,
        graph: &RevisionGraph,
        request: &NewRevision,
        parent_ids: Vec<RevisionId>,
        depends_on: Vec<RevisionId>,
    ) -> MigrationResult<GeneratedRevision> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(MigrationError::InvalidRevision {
                id: String::new(),
                reason: "revision message must not be empty".to_string(),
            });
        }
        if let Some(label) = &request.branch_label {
            if label.trim().is_empty() || label.contains('@') {
                return Err(MigrationError::InvalidRevision {
                    id: String::new(),
                    reason: format!("invalid branch label '{}'", label),
                });
            }
        }

        if !self.revisions_dir.exists() {
            fs::create_dir_all(&self.revisions_dir).map_err(|e| MigrationError::FileWrite {
                path: self.revisions_dir.clone(),
                source: e,
            })?;
        }

        let id = new_revision_id(graph);
        let file_path = self
            .revisions_dir
            .join(format!("{}_{}.yaml", id, sanitize(message)));

        let body = render(&id, message, &parent_ids, request.branch_label.as_deref(), &depends_on);
        let checksum = checksum_for_file(&body);
        let content = body.replacen(
            "\nupgrade:",
            &format!("\nchecksum: \"{}\"\nupgrade:", checksum),
            1,
        );

        fs::write(&file_path, &content).map_err(|e| MigrationError::FileWrite {
            path: file_path.clone(),
            source: e,
        })?;

        info!(revision = %id, path = %file_path.display(), parents = ?parent_ids, "revision file generated");

        Ok(GeneratedRevision {
            id,
            path: file_path,
            parent_ids,
        })
    }
}

fn resolve_all(graph: &RevisionGraph, specs: &[String]) -> MigrationResult<Vec<RevisionId>> {
    specs
        .iter()
        .map(|query| graph.resolve(query).map(|r| r.id.clone()))
        .collect()
}

/// Random 12-hex ID not already in the graph
fn new_revision_id(graph: &RevisionGraph) -> RevisionId {
    loop {
        let candidate: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(ID_LENGTH)
            .collect();
        if !graph.contains(&candidate) {
            return candidate;
        }
    }
}

/// Lowercase, underscores for everything else
fn sanitize(message: &str) -> String {
    let slug: String = message
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.chars().take(40).collect()
}

/// JSON strings and arrays are valid YAML flow scalars
fn quoted<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn render(
    id: &str,
    message: &str,
    parent_ids: &[RevisionId],
    branch_label: Option<&str>,
    depends_on: &[RevisionId],
) -> String {
    let created_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let mut content = format!(
        "# Revision: {}\n\
         # Created: {}\n\
         #\n\
         # Edit the 'upgrade' and 'downgrade' sections to define your schema changes.\n\
         \n\
         id: {}\n\
         description: {}\n\
         parent_ids: {}\n",
        message.replace('\n', " "),
        created_at,
        quoted(id),
        quoted(message),
        quoted(parent_ids),
    );
    if let Some(label) = branch_label {
        content.push_str(&format!("branch_label: {}\n", quoted(label)));
    }
    if !depends_on.is_empty() {
        content.push_str(&format!("depends_on: {}\n", quoted(depends_on)));
    }
    content.push_str(&format!("created_at: {}\n", quoted(&created_at)));
    content.push_str(&format!(
        r#"upgrade:
  # Replace the placeholder with your schema changes, e.g.
  # - add_column:
  #     table: my_table
  #     column: {{ name: my_column, type: TEXT, nullable: true }}
  - create_table:
      name: placeholder_{id}
      columns:
        - {{ name: id, type: INTEGER, primary_key: true }}

downgrade:
  # Reverse of 'upgrade'
  - drop_table:
      name: placeholder_{id}
"#,
        id = id
    ));
    content
}
