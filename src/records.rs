// 🗄️ Record Persistence
// The persistence collaborator consumed by both pipelines, plus a SQLite
// implementation with an audit trail of import runs.

use crate::attributes::{AttributeCatalog, AttributeDescriptor};
use crate::error::StoreError;
use crate::import::ImportOutcome;
use crate::rules::ImportShape;
use crate::template::EntityKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// A persisted record: attribute name → JSON value.
/// Extensible by construction, no fixed struct per kind.
pub type Record = serde_json::Map<String, Value>;

type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// COLLABORATOR CONTRACT
// ============================================================================

/// Keyed storage of records per kind.
///
/// `create` may reject a structurally valid record (uniqueness); the import
/// pipeline reports that exactly like a validation failure.
pub trait RecordStore {
    fn create(&self, kind: EntityKind, record: Record) -> StoreResult<Record>;

    fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Record>;

    /// Replace the attributes of an existing record wholesale
    fn update(&self, kind: EntityKind, id: Uuid, record: Record) -> StoreResult<Record>;

    fn delete(&self, kind: EntityKind, id: Uuid) -> StoreResult<()>;

    /// All records of `kind` in storage order
    fn list(&self, kind: EntityKind) -> StoreResult<Vec<Record>>;

    fn filter(
        &self,
        kind: EntityKind,
        predicate: &dyn Fn(&Record) -> bool,
    ) -> StoreResult<Vec<Record>> {
        Ok(self
            .list(kind)?
            .into_iter()
            .filter(|record| predicate(record))
            .collect())
    }

    /// Attribute descriptors for `kind`. Display only, never drives validation.
    fn schema(&self, kind: EntityKind) -> StoreResult<Vec<AttributeDescriptor>>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteRecordStore {
    conn: Connection,
    catalog: AttributeCatalog,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    pub fn with_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteRecordStore {
            conn,
            catalog: AttributeCatalog::new(),
        })
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    pub fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ?1",
            params![kind.code()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Append an import run to the audit trail
    pub fn record_import_run(&self, run: &ImportRun) -> StoreResult<()> {
        let details = serde_json::to_string(&run.outcome.error_details)?;

        self.conn.execute(
            "INSERT INTO import_runs (
                run_id, shape, source_name, source_digest,
                total, success, errors, error_details, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id.to_string(),
                run.shape.code(),
                run.source_name,
                run.source_digest,
                run.outcome.total as i64,
                run.outcome.success as i64,
                run.outcome.errors as i64,
                details,
                run.finished_at.to_rfc3339(),
            ],
        )?;

        debug!(run_id = %run.id, shape = %run.shape, "import run recorded");
        Ok(())
    }

    /// Audit trail, latest first
    pub fn list_import_runs(&self) -> StoreResult<Vec<ImportRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, shape, source_name, source_digest,
                    total, success, errors, error_details, finished_at
             FROM import_runs
             ORDER BY id DESC",
        )?;

        #[allow(clippy::type_complexity)]
        let raw: Vec<(String, String, Option<String>, String, i64, i64, i64, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(
                |(run_id, shape, source_name, digest, total, success, errors, details, finished)| {
                    Ok(ImportRun {
                        id: from_text(run_id)?,
                        shape: from_text(shape)?,
                        source_name,
                        source_digest: digest,
                        outcome: ImportOutcome {
                            total: total as usize,
                            success: success as usize,
                            errors: errors as usize,
                            error_details: serde_json::from_str(&details)?,
                        },
                        finished_at: from_text(finished)?,
                    })
                },
            )
            .collect()
    }
}

impl RecordStore for SqliteRecordStore {
    fn create(&self, kind: EntityKind, mut record: Record) -> StoreResult<Record> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        record.remove("id");
        record
            .entry("created_date")
            .or_insert_with(|| Value::from(now.to_rfc3339()));
        let data = serde_json::to_string(&record)?;

        let result = self.conn.execute(
            "INSERT INTO records (uuid, kind, unique_key, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                kind.code(),
                unique_key(kind, &record),
                data,
                now.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                debug!(kind = %kind, id = %id, "record created");
                record.insert("id".to_string(), Value::from(id.to_string()));
                Ok(record)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Rejected(duplicate_message(kind, &record)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, kind: EntityKind, id: Uuid) -> StoreResult<Record> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE kind = ?1 AND uuid = ?2",
                params![kind.code(), id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => with_id(id.to_string(), &data),
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    fn update(&self, kind: EntityKind, id: Uuid, mut record: Record) -> StoreResult<Record> {
        let existing = self.get(kind, id)?;

        record.remove("id");
        if let Some(created) = existing.get("created_date") {
            record.insert("created_date".to_string(), created.clone());
        }
        let data = serde_json::to_string(&record)?;

        let result = self.conn.execute(
            "UPDATE records SET unique_key = ?1, data = ?2 WHERE kind = ?3 AND uuid = ?4",
            params![unique_key(kind, &record), data, kind.code(), id.to_string()],
        );

        match result {
            Ok(_) => {
                record.insert("id".to_string(), Value::from(id.to_string()));
                Ok(record)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Rejected(duplicate_message(kind, &record)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, kind: EntityKind, id: Uuid) -> StoreResult<()> {
        let affected = self.conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND uuid = ?2",
            params![kind.code(), id.to_string()],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn list(&self, kind: EntityKind) -> StoreResult<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, data FROM records WHERE kind = ?1 ORDER BY id")?;

        let rows = stmt
            .query_map(params![kind.code()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(uuid, data)| with_id(uuid, &data))
            .collect()
    }

    fn schema(&self, kind: EntityKind) -> StoreResult<Vec<AttributeDescriptor>> {
        Ok(self.catalog.schema(kind).into_iter().cloned().collect())
    }
}

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Records Table (one JSON document per record)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            unique_key TEXT,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(kind, unique_key)
        )",
        [],
    )?;

    // ==========================================================================
    // Import Runs Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            shape TEXT NOT NULL,
            source_name TEXT,
            source_digest TEXT NOT NULL,
            total INTEGER NOT NULL,
            success INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            error_details TEXT NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind)",
        [],
    )?;

    Ok(())
}

/// Uniqueness key per kind: users are unique by (case-insensitive) email
fn unique_key(kind: EntityKind, record: &Record) -> Option<String> {
    match kind {
        EntityKind::User => record
            .get("email")
            .and_then(Value::as_str)
            .map(|email| email.trim().to_lowercase()),
        EntityKind::Student => None,
    }
}

fn duplicate_message(kind: EntityKind, record: &Record) -> String {
    match unique_key(kind, record) {
        Some(key) => format!("email {} is already registered", key),
        None => format!("duplicate {} record", kind.label().to_lowercase()),
    }
}

fn with_id(uuid: String, data: &str) -> StoreResult<Record> {
    let mut record: Record = serde_json::from_str(data)?;
    record.insert("id".to_string(), Value::String(uuid));
    Ok(record)
}

/// Decode a TEXT column through its serde representation
fn from_text<T: DeserializeOwned>(text: String) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::String(text))?)
}

// ============================================================================
// IMPORT RUN AUDIT
// ============================================================================

/// One completed import, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: Uuid,
    pub shape: ImportShape,
    pub source_name: Option<String>,
    /// SHA-256 of the uploaded bytes, hex
    pub source_digest: String,
    pub outcome: ImportOutcome,
    pub finished_at: DateTime<Utc>,
}

impl ImportRun {
    pub fn new(
        shape: ImportShape,
        source_name: Option<String>,
        contents: &[u8],
        outcome: ImportOutcome,
    ) -> Self {
        ImportRun {
            id: Uuid::new_v4(),
            shape,
            source_name,
            source_digest: source_digest(contents),
            outcome,
            finished_at: Utc::now(),
        }
    }
}

/// Hex SHA-256 of raw source bytes
pub fn source_digest(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
