//! # Migration Operations
//!
//! MANIFESTO ALIGNMENT: Explicit operation execution.
//!
//! The engine treats every operation as an opaque capability: something that
//! can be applied to a [`DatabaseConnection`]. Two shapes implement it:
//!
//! - [`Script`]: an ordered list of declarative [`SchemaOperation`]s, rendered to SQL
//! - any closure `Fn(&mut dyn DatabaseConnection) -> MigrationResult<()>`

use super::connection::DatabaseConnection;
use super::errors::MigrationResult;
use serde::{Deserialize, Serialize};

/// Operation capability
///
/// Errors returned here abort the current step and roll back its transaction.
pub trait Operation: Send + Sync {
    /// Apply the operation inside the caller's transaction
    fn apply(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<()>;

    /// Short description for logs and plan listings
    fn describe(&self) -> String {
        "custom operation".to_string()
    }
}

impl<F> Operation for F
where
    F: Fn(&mut dyn DatabaseConnection) -> MigrationResult<()> + Send + Sync,
{
    fn apply(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<()> {
        self(conn)
    }
}

/// Column definition used by table and column operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,

    /// SQL type, passed through verbatim
    #[serde(rename = "type")]
    pub column_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// SQL default expression, passed through verbatim
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A single declarative schema operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOperation {
    /// Create a table
    CreateTable { name: String, columns: Vec<ColumnDef> },

    /// Drop a table
    DropTable { name: String },

    /// Rename a table
    RenameTable { from: String, to: String },

    /// Add a column to an existing table
    AddColumn { table: String, column: ColumnDef },

    /// Drop a column from an existing table
    DropColumn { table: String, column: String },

    /// Create an index
    CreateIndex {
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
        #[serde(default)]
        name: Option<String>,
    },

    /// Drop an index by name
    DropIndex { name: String },

    /// Create an enumerated type
    ///
    /// Represented as a lookup table holding the allowed values.
    CreateEnum { name: String, values: Vec<String> },

    /// Drop an enumerated type
    DropEnum { name: String },

    /// Execute raw SQL (escape hatch - use sparingly)
    Sql { statement: String },
}

impl SchemaOperation {
    /// Operation name as written in revision files
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaOperation::CreateTable { .. } => "create_table",
            SchemaOperation::DropTable { .. } => "drop_table",
            SchemaOperation::RenameTable { .. } => "rename_table",
            SchemaOperation::AddColumn { .. } => "add_column",
            SchemaOperation::DropColumn { .. } => "drop_column",
            SchemaOperation::CreateIndex { .. } => "create_index",
            SchemaOperation::DropIndex { .. } => "drop_index",
            SchemaOperation::CreateEnum { .. } => "create_enum",
            SchemaOperation::DropEnum { .. } => "drop_enum",
            SchemaOperation::Sql { .. } => "sql",
        }
    }

    /// Structural validation, run when a revision file is loaded
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SchemaOperation::CreateTable { name, columns } => {
                require_name("create_table.name", name)?;
                if columns.is_empty() {
                    return Err(format!("create_table '{}' needs at least one column", name));
                }
                columns
                    .iter()
                    .try_for_each(|c| require_name("create_table.columns.name", &c.name))
            }
            SchemaOperation::DropTable { name } => require_name("drop_table.name", name),
            SchemaOperation::RenameTable { from, to } => {
                require_name("rename_table.from", from)?;
                require_name("rename_table.to", to)
            }
            SchemaOperation::AddColumn { table, column } => {
                require_name("add_column.table", table)?;
                require_name("add_column.column.name", &column.name)
            }
            SchemaOperation::DropColumn { table, column } => {
                require_name("drop_column.table", table)?;
                require_name("drop_column.column", column)
            }
            SchemaOperation::CreateIndex { table, columns, .. } => {
                require_name("create_index.table", table)?;
                if columns.is_empty() {
                    return Err(format!("create_index on '{}' needs at least one column", table));
                }
                Ok(())
            }
            SchemaOperation::DropIndex { name } => require_name("drop_index.name", name),
            SchemaOperation::CreateEnum { name, values } => {
                require_name("create_enum.name", name)?;
                if values.is_empty() {
                    return Err(format!("create_enum '{}' needs at least one value", name));
                }
                Ok(())
            }
            SchemaOperation::DropEnum { name } => require_name("drop_enum.name", name),
            SchemaOperation::Sql { statement } => {
                if statement.trim().is_empty() {
                    return Err("sql.statement must not be empty".to_string());
                }
                Ok(())
            }
        }
    }

    /// Render to SQL statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        match self {
            SchemaOperation::CreateTable { name, columns } => {
                let columns: Vec<String> = columns.iter().map(ColumnDef::to_sql).collect();
                vec![format!(
                    "CREATE TABLE {} ({})",
                    quote_ident(name),
                    columns.join(", ")
                )]
            }
            SchemaOperation::DropTable { name } => {
                vec![format!("DROP TABLE {}", quote_ident(name))]
            }
            SchemaOperation::RenameTable { from, to } => vec![format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(from),
                quote_ident(to)
            )],
            SchemaOperation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                column.to_sql()
            )],
            SchemaOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            )],
            SchemaOperation::CreateIndex {
                table,
                columns,
                unique,
                name,
            } => {
                let index_name = name
                    .clone()
                    .unwrap_or_else(|| format!("ix_{}_{}", table, columns.join("_")));
                let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                vec![format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    quote_ident(&index_name),
                    quote_ident(table),
                    columns.join(", ")
                )]
            }
            SchemaOperation::DropIndex { name } => {
                vec![format!("DROP INDEX {}", quote_ident(name))]
            }
            SchemaOperation::CreateEnum { name, values } => {
                let rows: Vec<String> = values.iter().map(|v| format!("({})", quote_literal(v))).collect();
                vec![
                    format!(
                        "CREATE TABLE {} (value TEXT PRIMARY KEY NOT NULL)",
                        quote_ident(name)
                    ),
                    format!(
                        "INSERT INTO {} (value) VALUES {}",
                        quote_ident(name),
                        rows.join(", ")
                    ),
                ]
            }
            SchemaOperation::DropEnum { name } => {
                vec![format!("DROP TABLE {}", quote_ident(name))]
            }
            SchemaOperation::Sql { statement } => vec![statement.clone()],
        }
    }

    fn describe(&self) -> String {
        let subject = match self {
            SchemaOperation::CreateTable { name, .. }
            | SchemaOperation::DropTable { name }
            | SchemaOperation::DropIndex { name }
            | SchemaOperation::CreateEnum { name, .. }
            | SchemaOperation::DropEnum { name } => name.clone(),
            SchemaOperation::RenameTable { from, to } => format!("{} -> {}", from, to),
            SchemaOperation::AddColumn { table, column } => format!("{}.{}", table, column.name),
            SchemaOperation::DropColumn { table, column } => format!("{}.{}", table, column),
            SchemaOperation::CreateIndex { table, columns, .. } => {
                format!("{}({})", table, columns.join(", "))
            }
            SchemaOperation::Sql { .. } => "raw".to_string(),
        };
        format!("{}({})", self.kind(), subject)
    }
}

/// Ordered list of declarative operations applied as one capability
///
/// Written as a list of single-key maps (`- create_table: {...}`) rather than
/// YAML tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script {
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    operations: Vec<SchemaOperation>,
}

impl Script {
    pub fn new(operations: Vec<SchemaOperation>) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// All SQL statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.operations.iter().flat_map(|op| op.statements()).collect()
    }
}

impl From<Vec<SchemaOperation>> for Script {
    fn from(operations: Vec<SchemaOperation>) -> Self {
        Self::new(operations)
    }
}

impl Operation for Script {
    fn apply(&self, conn: &mut dyn DatabaseConnection) -> MigrationResult<()> {
        for statement in self.statements() {
            conn.execute(&statement)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        if self.operations.is_empty() {
            return "no-op".to_string();
        }
        self.operations
            .iter()
            .map(SchemaOperation::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn require_name(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

/// Quote an SQL identifier
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
