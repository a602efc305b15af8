//! # SQLite Backend
//!
//! [`DatabaseConnection`] over `rusqlite`. DDL is transactional in SQLite, so a
//! step's schema change and its version marker commit or roll back together.
//!
//! Three bookkeeping tables are created on open:
//!
//! - `<version_table>`: `revision_id TEXT PRIMARY KEY`, one row per applied revision
//! - `<version_table>_log`: append-only step log
//! - `<version_table>_lock`: at most one row, the whole-plan exclusive lock

use super::connection::{DatabaseConnection, StepLogEntry};
use super::errors::{MigrationError, MigrationResult};
use super::operations::quote_ident;
use super::{Direction, RevisionId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Default name of the version table
pub const DEFAULT_VERSION_TABLE: &str = "aeromigrate_version";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed migration connection
pub struct SqliteConnection {
    conn: Connection,
    version_table: String,
    log_table: String,
    lock_table: String,
}

impl SqliteConnection {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, version_table: &str) -> MigrationResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, version_table)
    }

    /// Private in-memory database
    pub fn open_in_memory(version_table: &str) -> MigrationResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, version_table)
    }

    /// Wrap an existing connection and create the bookkeeping tables
    pub fn from_connection(conn: Connection, version_table: &str) -> MigrationResult<Self> {
        if !is_valid_table_name(version_table) {
            return Err(MigrationError::Internal {
                message: format!("Invalid version table name '{}'", version_table),
            });
        }
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let this = Self {
            conn,
            version_table: quote_ident(version_table),
            log_table: quote_ident(&format!("{}_log", version_table)),
            lock_table: quote_ident(&format!("{}_lock", version_table)),
        };
        this.ensure_tables()?;
        Ok(this)
    }

    fn ensure_tables(&self) -> MigrationResult<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {version} (revision_id TEXT PRIMARY KEY NOT NULL);
             CREATE TABLE IF NOT EXISTS {log} (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 revision_id TEXT NOT NULL,
                 direction TEXT NOT NULL,
                 applied_at TEXT NOT NULL,
                 duration_ms INTEGER NOT NULL,
                 applied_by TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS {lock} (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 holder TEXT NOT NULL,
                 acquired_at TEXT NOT NULL
             );",
            version = self.version_table,
            log = self.log_table,
            lock = self.lock_table,
        ))?;
        Ok(())
    }

    /// Underlying driver connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Check whether a table exists
    pub fn table_exists(&self, name: &str) -> MigrationResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl DatabaseConnection for SqliteConnection {
    fn begin(&mut self) -> MigrationResult<()> {
        // IMMEDIATE takes the write lock up front instead of on first write
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> MigrationResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> MigrationResult<()> {
        if self.conn.is_autocommit() {
            return Err(MigrationError::database("no active transaction"));
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> MigrationResult<()> {
        self.conn.execute_batch(statement)?;
        Ok(())
    }

    fn applied_revisions(&mut self) -> MigrationResult<Vec<RevisionId>> {
        let sql = format!(
            "SELECT revision_id FROM {} ORDER BY revision_id",
            self.version_table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let ids = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn insert_revision(&mut self, id: &str) -> MigrationResult<()> {
        self.conn.execute(
            &format!("INSERT INTO {} (revision_id) VALUES (?1)", self.version_table),
            params![id],
        )?;
        Ok(())
    }

    fn delete_revision(&mut self, id: &str) -> MigrationResult<()> {
        self.conn.execute(
            &format!("DELETE FROM {} WHERE revision_id = ?1", self.version_table),
            params![id],
        )?;
        Ok(())
    }

    fn append_log(&mut self, entry: &StepLogEntry) -> MigrationResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (revision_id, direction, applied_at, duration_ms, applied_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.log_table
            ),
            params![
                entry.revision_id,
                entry.direction.as_str(),
                entry.applied_at.to_rfc3339(),
                entry.duration_ms as i64,
                entry.applied_by,
            ],
        )?;
        Ok(())
    }

    fn read_log(&mut self) -> MigrationResult<Vec<StepLogEntry>> {
        let sql = format!(
            "SELECT revision_id, direction, applied_at, duration_ms, applied_by FROM {} ORDER BY id",
            self.log_table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let raw = rows.collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(revision_id, direction, applied_at, duration_ms, applied_by)| {
                let direction = match direction.as_str() {
                    "upgrade" => Direction::Upgrade,
                    "downgrade" => Direction::Downgrade,
                    other => {
                        return Err(MigrationError::database(format!(
                            "unknown direction '{}' in step log",
                            other
                        )))
                    }
                };
                Ok(StepLogEntry {
                    revision_id,
                    direction,
                    applied_at: parse_timestamp(&applied_at)?,
                    duration_ms: duration_ms.max(0) as u64,
                    applied_by,
                })
            })
            .collect()
    }

    fn acquire_lock(&mut self, holder: &str) -> MigrationResult<()> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id, holder, acquired_at) VALUES (1, ?1, ?2)",
                self.lock_table
            ),
            params![holder, Utc::now().to_rfc3339()],
        )?;
        if inserted == 1 {
            return Ok(());
        }

        let existing: Option<(String, String)> = self
            .conn
            .query_row(
                &format!("SELECT holder, acquired_at FROM {} WHERE id = 1", self.lock_table),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match existing {
            Some((holder, acquired_at)) => Err(MigrationError::MigrationLocked {
                holder,
                since: parse_timestamp(&acquired_at)?,
            }),
            None => Err(MigrationError::database(
                "migration lock was released while acquiring it; retry",
            )),
        }
    }

    fn release_lock(&mut self) -> MigrationResult<()> {
        self.conn
            .execute(&format!("DELETE FROM {} WHERE id = 1", self.lock_table), [])?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> MigrationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MigrationError::database(format!("invalid timestamp '{}': {}", value, e)))
}

/// Identifier-safe table name: ASCII letter or underscore, then alphanumerics/underscores
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_bookkeeping_tables() {
        let conn = SqliteConnection::open_in_memory(DEFAULT_VERSION_TABLE).unwrap();
        assert!(conn.table_exists("aeromigrate_version").unwrap());
        assert!(conn.table_exists("aeromigrate_version_log").unwrap());
        assert!(conn.table_exists("aeromigrate_version_lock").unwrap());
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        assert!(SqliteConnection::open_in_memory("versions; DROP TABLE x").is_err());
        assert!(is_valid_table_name("_alembic_version2"));
        assert!(!is_valid_table_name("2versions"));
        assert!(!is_valid_table_name(""));
    }

    #[test]
    fn test_ddl_and_marker_roll_back_together() {
        let mut conn = SqliteConnection::open_in_memory(DEFAULT_VERSION_TABLE).unwrap();

        conn.begin().unwrap();
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)").unwrap();
        conn.insert_revision("a").unwrap();
        conn.rollback().unwrap();

        assert!(!conn.table_exists("users").unwrap());
        assert!(conn.applied_revisions().unwrap().is_empty());

        conn.begin().unwrap();
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)").unwrap();
        conn.insert_revision("a").unwrap();
        conn.commit().unwrap();

        assert!(conn.table_exists("users").unwrap());
        assert_eq!(conn.applied_revisions().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_driver_error_is_verbatim() {
        let mut conn = SqliteConnection::open_in_memory(DEFAULT_VERSION_TABLE).unwrap();
        let err = conn.execute("ALTER TABLE missing ADD COLUMN x INTEGER").unwrap_err();
        assert!(err.to_string().contains("no such table: missing"));
    }

    #[test]
    fn test_step_log_round_trip() {
        let mut conn = SqliteConnection::open_in_memory(DEFAULT_VERSION_TABLE).unwrap();
        let entry = StepLogEntry {
            revision_id: "a".to_string(),
            direction: Direction::Downgrade,
            applied_at: Utc::now(),
            duration_ms: 12,
            applied_by: "tester".to_string(),
        };
        conn.append_log(&entry).unwrap();

        let log = conn.read_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].direction, Direction::Downgrade);
        assert_eq!(log[0].duration_ms, 12);
        assert_eq!(log[0].applied_by, "tester");
    }

    #[test]
    fn test_lock_contention_between_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");

        let mut first = SqliteConnection::open(&path, DEFAULT_VERSION_TABLE).unwrap();
        let mut second = SqliteConnection::open(&path, DEFAULT_VERSION_TABLE).unwrap();

        first.acquire_lock("runner-1").unwrap();
        let err = second.acquire_lock("runner-2").unwrap_err();
        match err {
            MigrationError::MigrationLocked { holder, .. } => assert_eq!(holder, "runner-1"),
            other => panic!("expected lock error, got {other:?}"),
        }

        first.release_lock().unwrap();
        second.acquire_lock("runner-2").unwrap();
    }
}
