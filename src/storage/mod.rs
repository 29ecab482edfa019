//! Storage layer for ft data.
//!
//! All state lives in a single SQLite database (by default `fts/ft.db`):
//!
//! - `files` - feature files, soft-deleted when they vanish from disk
//! - `scenarios` - scenario identities and their last known content
//! - `statuses` - append-only status history per scenario
//! - `test_links` - scenario identities referenced by test functions
//!
//! Timestamps are filled in by column defaults as RFC 3339 UTC strings with
//! millisecond precision, so `(changed_at, id)` orders status events.

use crate::models::{
    FeatureFile, STATUS_NO_ACTIVITY, Scenario, StatusEvent, TAG_PREFIX, TestLink,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ordered schema migrations; `schema_version` records how many have run.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE files (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path  TEXT NOT NULL,
        deleted    INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );
    CREATE UNIQUE INDEX idx_files_live_path ON files(file_path) WHERE deleted = 0;
    "#,
    r#"
    CREATE TABLE scenarios (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id    INTEGER NOT NULL REFERENCES files(id),
        name       TEXT NOT NULL,
        content    TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );
    CREATE INDEX idx_scenarios_file ON scenarios(file_id);
    "#,
    r#"
    CREATE TABLE statuses (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        scenario_id INTEGER NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
        status      TEXT NOT NULL,
        changed_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );
    CREATE INDEX idx_statuses_scenario ON statuses(scenario_id, changed_at, id);
    "#,
    r#"
    CREATE TABLE test_links (
        scenario_id INTEGER NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
        file_path   TEXT NOT NULL,
        line_number INTEGER NOT NULL
    );
    CREATE INDEX idx_test_links_scenario ON test_links(scenario_id);
    "#,
];

/// Subquery yielding a scenario's current status; expects the scenario
/// table aliased as `s`.
const CURRENT_STATUS_SQL: &str = "COALESCE(
    (SELECT status FROM statuses WHERE scenario_id = s.id ORDER BY changed_at DESC, id DESC LIMIT 1),
    'no-activity'
)";

/// A scenario joined with its file path and current status.
#[derive(Debug, Clone)]
pub struct ScenarioSummary {
    pub id: i64,
    pub name: String,
    pub file_path: String,
    pub status: String,
}

/// Storage manager for a single project.
pub struct Storage {
    /// Location of the SQLite database
    pub path: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open an existing store; fails with [`Error::NotInitialized`] if the
    /// database file does not exist yet.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !Self::exists(db_path) {
            return Err(Error::NotInitialized);
        }
        Self::open_at(db_path)
    }

    /// Open or create the store at `db_path`, applying pending migrations.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: db_path.to_path_buf(),
            conn,
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Check if a store exists at the given path.
    pub fn exists(db_path: &Path) -> bool {
        db_path.is_file()
    }

    /// Apply every migration newer than the recorded schema version.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
        )?;
        let current: Option<i64> = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;
        if current.is_none() {
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
        }
        let current = current.unwrap_or(0) as usize;

        for (index, migration) in MIGRATIONS.iter().enumerate().skip(current) {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration)?;
            tx.execute(
                "UPDATE schema_version SET version = ?1",
                params![(index + 1) as i64],
            )?;
            tx.commit()?;
        }

        Ok(())
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))?)
    }

    /// Begin a transaction on the shared connection.
    ///
    /// Storage methods keep working while the transaction is open; dropping
    /// it without `commit` rolls everything back.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // === File Operations ===

    /// Find the live (not soft-deleted) record for a path.
    pub fn find_live_file(&self, path: &str) -> Result<Option<FeatureFile>> {
        self.find_file(path, false)
    }

    /// Find a soft-deleted record for a path.
    pub fn find_deleted_file(&self, path: &str) -> Result<Option<FeatureFile>> {
        self.find_file(path, true)
    }

    fn find_file(&self, path: &str, deleted: bool) -> Result<Option<FeatureFile>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, file_path, deleted, created_at, updated_at
                FROM files
                WHERE file_path = ?1 AND deleted = ?2
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![path, deleted],
                file_from_row,
            )
            .optional()?)
    }

    /// Register a new file and return its ID.
    pub fn insert_file(&self, path: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO files (file_path) VALUES (?1)", [path])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Soft-delete or undelete a file.
    pub fn set_file_deleted(&self, id: i64, deleted: bool) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE files
            SET deleted = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?2
            "#,
            params![deleted, id],
        )?;
        Ok(())
    }

    /// All files that are not soft-deleted, ordered by path.
    pub fn list_live_files(&self) -> Result<Vec<FeatureFile>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, file_path, deleted, created_at, updated_at
            FROM files
            WHERE deleted = 0
            ORDER BY file_path
            "#,
        )?;
        let files = stmt
            .query_map([], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    // === Scenario Operations ===

    /// Scenarios currently owned by a file, ordered by ID.
    pub fn scenarios_for_file(&self, file_id: i64) -> Result<Vec<Scenario>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, file_id, name, content, created_at, updated_at
            FROM scenarios
            WHERE file_id = ?1
            ORDER BY id
            "#,
        )?;
        let scenarios = stmt
            .query_map([file_id], scenario_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scenarios)
    }

    /// Get a scenario by ID.
    pub fn get_scenario(&self, id: i64) -> Result<Scenario> {
        self.conn
            .query_row(
                r#"
                SELECT id, file_id, name, content, created_at, updated_at
                FROM scenarios
                WHERE id = ?1
                "#,
                [id],
                scenario_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("scenario {} not found", id)))
    }

    /// Path of the file that owns a scenario.
    pub fn scenario_file_path(&self, id: i64) -> Result<String> {
        self.conn
            .query_row(
                r#"
                SELECT f.file_path
                FROM scenarios s
                JOIN files f ON s.file_id = f.id
                WHERE s.id = ?1
                "#,
                [id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("scenario {} not found", id)))
    }

    /// Insert a scenario and return its freshly assigned ID.
    pub fn insert_scenario(&self, file_id: i64, name: &str, content: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO scenarios (file_id, name, content) VALUES (?1, ?2, ?3)",
            params![file_id, name, content],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replace a scenario's name and content.
    pub fn update_scenario(&self, id: i64, name: &str, content: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE scenarios
            SET name = ?1, content = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?3
            "#,
            params![name, content, id],
        )?;
        Ok(())
    }

    /// Hard-delete a scenario. Its status events and test links cascade.
    pub fn delete_scenario(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM scenarios WHERE id = ?1", [id])?;
        Ok(())
    }

    /// IDs of every persisted scenario.
    pub fn scenario_ids(&self) -> Result<HashSet<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM scenarios")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()?;
        Ok(ids)
    }

    /// Every scenario with its file path and current status, ordered by
    /// file path then ID.
    pub fn list_scenarios(&self) -> Result<Vec<ScenarioSummary>> {
        let sql = format!(
            r#"
            SELECT s.id, s.name, f.file_path, {} AS current_status
            FROM scenarios s
            JOIN files f ON s.file_id = f.id
            ORDER BY f.file_path, s.id
            "#,
            CURRENT_STATUS_SQL
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ScenarioSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    file_path: row.get(2)?,
                    status: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Total number of scenarios.
    pub fn count_scenarios(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM scenarios", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // === Status Operations ===

    /// Latest status of a scenario, if it has any history.
    pub fn latest_status(&self, scenario_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT status FROM statuses
                WHERE scenario_id = ?1
                ORDER BY changed_at DESC, id DESC
                LIMIT 1
                "#,
                [scenario_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Current status, defaulting to `no-activity`.
    pub fn current_status(&self, scenario_id: i64) -> Result<String> {
        Ok(self
            .latest_status(scenario_id)?
            .unwrap_or_else(|| STATUS_NO_ACTIVITY.to_string()))
    }

    /// Append a status event.
    pub fn append_status(&self, scenario_id: i64, status: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO statuses (scenario_id, status) VALUES (?1, ?2)",
            params![scenario_id, status],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Status history of a scenario, newest first.
    pub fn status_history(&self, scenario_id: i64) -> Result<Vec<StatusEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, scenario_id, status, changed_at
            FROM statuses
            WHERE scenario_id = ?1
            ORDER BY changed_at DESC, id DESC
            "#,
        )?;
        let events = stmt
            .query_map([scenario_id], |row| {
                let changed_at: String = row.get(3)?;
                Ok(StatusEvent {
                    id: row.get(0)?,
                    scenario_id: row.get(1)?,
                    status: row.get(2)?,
                    changed_at: parse_timestamp(&changed_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Number of scenarios per current status: `no-activity` last, the rest
    /// by descending count.
    pub fn status_counts(&self) -> Result<Vec<(String, usize)>> {
        let sql = format!(
            r#"
            SELECT {} AS current_status, COUNT(*) AS cnt
            FROM scenarios s
            GROUP BY current_status
            ORDER BY CASE WHEN current_status = 'no-activity' THEN 1 ELSE 0 END, cnt DESC, current_status
            "#,
            CURRENT_STATUS_SQL
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let counts = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get(0)?, count as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    // === Test Link Operations ===

    /// Replace the whole link table in one transaction. Links to unknown
    /// scenarios are dropped; returns the number of links stored.
    pub fn replace_test_links(&mut self, links: &[TestLink]) -> Result<usize> {
        let known = self.scenario_ids()?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM test_links", [])?;
        let mut stored = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_links (scenario_id, file_path, line_number) VALUES (?1, ?2, ?3)",
            )?;
            for link in links.iter().filter(|l| known.contains(&l.scenario_id)) {
                stmt.execute(params![
                    link.scenario_id,
                    link.file_path,
                    link.line_number as i64
                ])?;
                stored += 1;
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Links for one scenario, ordered by file and line.
    pub fn links_for_scenario(&self, scenario_id: i64) -> Result<Vec<TestLink>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT scenario_id, file_path, line_number
            FROM test_links
            WHERE scenario_id = ?1
            ORDER BY file_path, line_number
            "#,
        )?;
        let links = stmt
            .query_map([scenario_id], |row| {
                let line: i64 = row.get(2)?;
                Ok(TestLink {
                    scenario_id: row.get(0)?,
                    file_path: row.get(1)?,
                    line_number: line as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureFile> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(FeatureFile {
        id: row.get(0)?,
        path: row.get(1)?,
        deleted: row.get(2)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn scenario_from_row(row: &Row<'_>) -> rusqlite::Result<Scenario> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Scenario {
        id: row.get(0)?,
        file_id: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a scenario ID as typed by a user: `42` or `@id:42`.
pub fn parse_scenario_id(raw: &str) -> Result<i64> {
    let digits = raw.trim();
    let digits = digits.strip_prefix(TAG_PREFIX).unwrap_or(digits);
    digits
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::InvalidId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    #[test]
    fn test_open_requires_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("ft.db");
        assert!(matches!(Storage::open(&db_path), Err(Error::NotInitialized)));

        Storage::open_at(&db_path).unwrap();
        assert!(Storage::exists(&db_path));
        assert!(Storage::open(&db_path).is_ok());
    }

    #[test]
    fn test_migrations_run_once() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("ft.db");

        let storage = Storage::open_at(&db_path).unwrap();
        assert_eq!(storage.schema_version().unwrap(), MIGRATIONS.len() as i64);
        drop(storage);

        let storage = Storage::open_at(&db_path).unwrap();
        assert_eq!(storage.schema_version().unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_file_lifecycle() {
        let storage = create_test_storage();
        let id = storage.insert_file("fts/login.ft").unwrap();

        let live = storage.find_live_file("fts/login.ft").unwrap().unwrap();
        assert_eq!(live.id, id);
        assert!(!live.deleted);

        storage.set_file_deleted(id, true).unwrap();
        assert!(storage.find_live_file("fts/login.ft").unwrap().is_none());
        assert_eq!(
            storage.find_deleted_file("fts/login.ft").unwrap().unwrap().id,
            id
        );
        assert!(storage.list_live_files().unwrap().is_empty());
    }

    #[test]
    fn test_live_path_is_unique() {
        let storage = create_test_storage();
        storage.insert_file("fts/login.ft").unwrap();
        assert!(storage.insert_file("fts/login.ft").is_err());
    }

    #[test]
    fn test_scenario_crud() {
        let storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let id = storage
            .insert_scenario(file_id, "User logs in", "Scenario: User logs in")
            .unwrap();
        assert_eq!(id, 1);

        storage
            .update_scenario(id, "User signs in", "Scenario: User signs in\n  Given a user")
            .unwrap();
        let scenario = storage.get_scenario(id).unwrap();
        assert_eq!(scenario.name, "User signs in");
        assert_eq!(
            scenario.content.as_deref(),
            Some("Scenario: User signs in\n  Given a user")
        );
        assert_eq!(storage.scenario_file_path(id).unwrap(), "fts/login.ft");

        storage.delete_scenario(id).unwrap();
        assert!(matches!(storage.get_scenario(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_deleted_ids_are_not_reused() {
        let storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let first = storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();
        storage.delete_scenario(first).unwrap();
        let second = storage.insert_scenario(file_id, "B", "Scenario: B").unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_status_history_order() {
        let storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let id = storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();

        assert_eq!(storage.latest_status(id).unwrap(), None);
        assert_eq!(storage.current_status(id).unwrap(), STATUS_NO_ACTIVITY);

        storage.append_status(id, "accepted").unwrap();
        storage.append_status(id, "done").unwrap();

        assert_eq!(storage.latest_status(id).unwrap().as_deref(), Some("done"));
        let history = storage.status_history(id).unwrap();
        let statuses: Vec<_> = history.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["done", "accepted"]);
    }

    #[test]
    fn test_status_counts() {
        let storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let a = storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();
        let b = storage.insert_scenario(file_id, "B", "Scenario: B").unwrap();
        storage.insert_scenario(file_id, "C", "Scenario: C").unwrap();
        storage.append_status(a, "done").unwrap();
        storage.append_status(b, "done").unwrap();

        let counts = storage.status_counts().unwrap();
        assert_eq!(
            counts,
            vec![("done".to_string(), 2), (STATUS_NO_ACTIVITY.to_string(), 1)]
        );
    }

    #[test]
    fn test_replace_test_links_drops_unknown_ids() {
        let mut storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let id = storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();

        let links = vec![
            TestLink {
                scenario_id: id,
                file_path: "tests/login.rs".to_string(),
                line_number: 3,
            },
            TestLink {
                scenario_id: 999,
                file_path: "tests/login.rs".to_string(),
                line_number: 9,
            },
        ];
        assert_eq!(storage.replace_test_links(&links).unwrap(), 1);
        assert_eq!(storage.links_for_scenario(id).unwrap(), vec![links[0].clone()]);

        assert_eq!(storage.replace_test_links(&[]).unwrap(), 0);
        assert!(storage.links_for_scenario(id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_scenario_cascades() {
        let mut storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        let id = storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();
        storage
            .replace_test_links(&[TestLink {
                scenario_id: id,
                file_path: "tests/a.rs".to_string(),
                line_number: 1,
            }])
            .unwrap();

        storage.append_status(id, "done").unwrap();

        storage.delete_scenario(id).unwrap();
        assert!(storage.links_for_scenario(id).unwrap().is_empty());
        assert!(storage.status_history(id).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rollback() {
        let storage = create_test_storage();
        let file_id = storage.insert_file("fts/login.ft").unwrap();
        {
            let _tx = storage.begin().unwrap();
            storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();
        }
        assert_eq!(storage.count_scenarios().unwrap(), 0);

        let tx = storage.begin().unwrap();
        storage.insert_scenario(file_id, "A", "Scenario: A").unwrap();
        tx.commit().unwrap();
        assert_eq!(storage.count_scenarios().unwrap(), 1);
    }

    #[test]
    fn test_parse_scenario_id() {
        assert_eq!(parse_scenario_id("42").unwrap(), 42);
        assert_eq!(parse_scenario_id("@id:7").unwrap(), 7);
        assert!(matches!(parse_scenario_id("abc"), Err(Error::InvalidId(_))));
        assert!(parse_scenario_id("0").is_err());
        assert!(parse_scenario_id("@ft:1").is_err());
    }
}
