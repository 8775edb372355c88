//! SQLite-backed field store.
//!
//! The database lives at `~/.fieldforge/fields.db` unless configured
//! otherwise. All writes run in `IMMEDIATE` transactions so that separate
//! processes sharing the file still serialise on the version check.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use super::{
    content_hash, ActiveSnapshot, ConflictKind, DeprecateOutcome, FieldStore, PutOutcome,
    RejectionRecord, StoreError, StoreResult,
};
use crate::model::{CalculatedFieldDefinition, DataType, FieldStatus, ScopeId, ValidatedField};
use crate::validation::ValidationIssue;

/// Current schema version. Bump this when the table layout changes.
const SCHEMA_VERSION: i32 = 1;

const FIELD_COLUMNS: &str = "scope_id, name, display_name, expression_text, referenced_columns, \
     result_type, status, version, created_by, created_at, last_validated_at";

/// Field store persisted in a SQLite database.
pub struct SqliteFieldStore {
    conn: Mutex<Connection>,
}

impl SqliteFieldStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        debug!(path = %path.display(), "field store opened");
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fields (
                scope_id TEXT NOT NULL,
                name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                expression_text TEXT NOT NULL,
                referenced_columns TEXT NOT NULL,
                result_type TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_validated_at TEXT,
                content_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope_id, name)
            );

            CREATE TABLE IF NOT EXISTS rejections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope_id TEXT NOT NULL,
                name TEXT NOT NULL,
                expression_text TEXT NOT NULL,
                created_by TEXT NOT NULL,
                errors TEXT NOT NULL,
                rejected_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS rejections_scope ON rejections (scope_id);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            INSERT OR IGNORE INTO meta (key, value) VALUES ('store_version', '0');
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == SCHEMA_VERSION => {}
            Some(found) => {
                return Err(StoreError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }

        Ok(())
    }

    fn fetch(
        conn: &Connection,
        scope: &ScopeId,
        name: &str,
    ) -> StoreResult<Option<CalculatedFieldDefinition>> {
        let raw = conn
            .query_row(
                &format!("SELECT {FIELD_COLUMNS} FROM fields WHERE scope_id = ? AND name = ?"),
                params![scope.as_str(), name],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_definition).transpose()
    }

    /// Current record plus the content hash it was written with.
    fn fetch_with_hash(
        conn: &Connection,
        scope: &ScopeId,
        name: &str,
    ) -> StoreResult<Option<(CalculatedFieldDefinition, String)>> {
        let raw = conn
            .query_row(
                &format!("SELECT {FIELD_COLUMNS}, content_hash FROM fields WHERE scope_id = ? AND name = ?"),
                params![scope.as_str(), name],
                |row| Ok((RawRecord::from_row(row)?, row.get::<_, String>(11)?)),
            )
            .optional()?;
        raw.map(|(record, hash)| -> StoreResult<_> { Ok((record.into_definition()?, hash)) })
            .transpose()
    }

    fn upsert(conn: &Connection, def: &CalculatedFieldDefinition) -> StoreResult<()> {
        let referenced = serde_json::to_string(&def.referenced_columns)?;
        conn.execute(
            "INSERT OR REPLACE INTO fields (
                scope_id, name, display_name, expression_text, referenced_columns,
                result_type, status, version, created_by, created_at, last_validated_at,
                content_hash, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                def.scope_id.as_str(),
                def.name,
                def.display_name,
                def.expression_text,
                referenced,
                def.result_type.as_str(),
                def.status.as_db_str(),
                def.version as i64,
                def.created_by,
                def.created_at.to_rfc3339(),
                def.last_validated_at.map(|t| t.to_rfc3339()),
                content_hash(def)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn bump_store_version(conn: &Connection) -> StoreResult<()> {
        conn.execute(
            "UPDATE meta SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) WHERE key = 'store_version'",
            [],
        )?;
        Ok(())
    }

    fn read_store_version(conn: &Connection) -> StoreResult<u64> {
        let value: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'store_version'",
            [],
            |row| row.get(0),
        )?;
        value.parse().map_err(|_| StoreError::Corrupt {
            scope: "*".to_string(),
            name: "store_version".to_string(),
            reason: format!("not a number: '{value}'"),
        })
    }
}

impl FieldStore for SqliteFieldStore {
    fn put_if_absent_or_same_version(
        &self,
        field: ValidatedField,
        expected_version: Option<u64>,
    ) -> StoreResult<PutOutcome> {
        let incoming = field.definition().clone();
        let incoming_hash = content_hash(&incoming)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match Self::fetch_with_hash(&tx, &incoming.scope_id, &incoming.name)? {
            None => {
                let stored = field.into_persisted(1);
                Self::upsert(&tx, &stored)?;
                Self::bump_store_version(&tx)?;
                PutOutcome::Persisted {
                    definition: stored,
                    changed: true,
                }
            }
            Some((current, stored_hash))
                if current.is_active()
                    && stored_hash == incoming_hash
                    && current.created_by == incoming.created_by =>
            {
                PutOutcome::Persisted {
                    definition: current,
                    changed: false,
                }
            }
            Some((current, _)) => match expected_version {
                Some(v) if v == current.version => {
                    let mut stored = field.into_persisted(current.version + 1);
                    stored.created_at = current.created_at;
                    Self::upsert(&tx, &stored)?;
                    Self::bump_store_version(&tx)?;
                    PutOutcome::Persisted {
                        definition: stored,
                        changed: true,
                    }
                }
                Some(_) => PutOutcome::Conflict {
                    kind: ConflictKind::StaleVersion,
                    current: Some(current),
                },
                None => PutOutcome::Conflict {
                    kind: ConflictKind::NameAlreadyExists,
                    current: Some(current),
                },
            },
        };
        tx.commit()?;

        match &outcome {
            PutOutcome::Persisted {
                definition,
                changed: true,
            } => info!(
                scope = %definition.scope_id,
                field = %definition.name,
                version = definition.version,
                "field persisted"
            ),
            PutOutcome::Persisted { definition, .. } => debug!(
                scope = %definition.scope_id,
                field = %definition.name,
                "field already persisted with identical content"
            ),
            PutOutcome::Conflict { kind, .. } => warn!(
                scope = %incoming.scope_id,
                field = %incoming.name,
                expected = ?expected_version,
                %kind,
                "write refused"
            ),
        }
        Ok(outcome)
    }

    fn list_active(&self, scope: &ScopeId) -> StoreResult<ActiveSnapshot> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let read_version = Self::read_store_version(&tx)?;

        let fields = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {FIELD_COLUMNS} FROM fields WHERE scope_id = ? AND status = ? ORDER BY name"
            ))?;
            let raw = stmt
                .query_map(
                    params![scope.as_str(), FieldStatus::Persisted.as_db_str()],
                    RawRecord::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            raw.into_iter()
                .map(RawRecord::into_definition)
                .collect::<StoreResult<Vec<_>>>()?
        };
        tx.commit()?;

        Ok(ActiveSnapshot {
            scope_id: scope.clone(),
            read_version,
            fields,
        })
    }

    fn deprecate(
        &self,
        scope: &ScopeId,
        name: &str,
        expected_version: u64,
    ) -> StoreResult<DeprecateOutcome> {
        let name = crate::model::normalize_name(name);
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match Self::fetch(&tx, scope, &name)? {
            None => DeprecateOutcome::NotFound,
            Some(current)
                if current.status == FieldStatus::Deprecated
                    && (expected_version == current.version
                        || current.version.checked_sub(1) == Some(expected_version)) =>
            {
                DeprecateOutcome::Deprecated(current)
            }
            Some(current) if current.version != expected_version || !current.is_active() => {
                DeprecateOutcome::Conflict {
                    kind: ConflictKind::StaleVersion,
                    current,
                }
            }
            Some(mut current) => {
                current.status = FieldStatus::Deprecated;
                current.version += 1;
                Self::upsert(&tx, &current)?;
                Self::bump_store_version(&tx)?;
                info!(%scope, field = %name, version = current.version, "field deprecated");
                DeprecateOutcome::Deprecated(current)
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, scope: &ScopeId, name: &str) -> StoreResult<Option<CalculatedFieldDefinition>> {
        let conn = self.conn.lock();
        Self::fetch(&conn, scope, &crate::model::normalize_name(name))
    }

    fn record_rejection(
        &self,
        draft: &CalculatedFieldDefinition,
        errors: &[ValidationIssue],
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rejections (scope_id, name, expression_text, created_by, errors, rejected_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                draft.scope_id.as_str(),
                draft.name,
                draft.expression_text,
                draft.created_by,
                serde_json::to_string(errors)?,
                draft.last_validated_at.unwrap_or_else(Utc::now).to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_rejections(&self, scope: &ScopeId) -> StoreResult<Vec<RejectionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, expression_text, created_by, errors, rejected_at
             FROM rejections WHERE scope_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![scope.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, expression_text, created_by, errors, rejected_at)| {
                Ok(RejectionRecord {
                    id,
                    scope_id: scope.clone(),
                    rejected_at: parse_time(scope.as_str(), &name, &rejected_at)?,
                    errors: serde_json::from_str(&errors)?,
                    name,
                    expression_text,
                    created_by,
                })
            })
            .collect()
    }

    fn scopes(&self) -> StoreResult<Vec<ScopeId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT scope_id FROM fields ORDER BY scope_id")?;
        let scopes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(ScopeId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scopes)
    }
}

/// A `fields` row before its text columns are decoded.
struct RawRecord {
    scope_id: String,
    name: String,
    display_name: String,
    expression_text: String,
    referenced_columns: String,
    result_type: String,
    status: String,
    version: i64,
    created_by: String,
    created_at: String,
    last_validated_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scope_id: row.get(0)?,
            name: row.get(1)?,
            display_name: row.get(2)?,
            expression_text: row.get(3)?,
            referenced_columns: row.get(4)?,
            result_type: row.get(5)?,
            status: row.get(6)?,
            version: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
            last_validated_at: row.get(10)?,
        })
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            scope: self.scope_id.clone(),
            name: self.name.clone(),
            reason,
        }
    }

    fn into_definition(self) -> StoreResult<CalculatedFieldDefinition> {
        let result_type = DataType::from_str(&self.result_type)
            .ok_or_else(|| self.corrupt(format!("unknown result type '{}'", self.result_type)))?;
        let status = FieldStatus::from_db_str(&self.status)
            .ok_or_else(|| self.corrupt(format!("unknown status '{}'", self.status)))?;
        let version = u64::try_from(self.version)
            .map_err(|_| self.corrupt(format!("negative version {}", self.version)))?;
        let referenced_columns: BTreeSet<String> = serde_json::from_str(&self.referenced_columns)?;
        let created_at = parse_time(&self.scope_id, &self.name, &self.created_at)?;
        let last_validated_at = match &self.last_validated_at {
            Some(t) => Some(parse_time(&self.scope_id, &self.name, t)?),
            None => None,
        };

        Ok(CalculatedFieldDefinition {
            scope_id: ScopeId::new(self.scope_id),
            name: self.name,
            display_name: self.display_name,
            expression_text: self.expression_text,
            referenced_columns,
            result_type,
            status,
            version,
            created_by: self.created_by,
            created_at,
            last_validated_at,
        })
    }
}

fn parse_time(scope: &str, name: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            scope: scope.to_string(),
            name: name.to_string(),
            reason: format!("bad timestamp '{value}': {e}"),
        })
}
