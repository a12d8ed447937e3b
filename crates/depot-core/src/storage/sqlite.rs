//! SQLite storage backend.
//!
//! One file per entity kind. Entities are stored as JSON documents in a
//! `records` table keyed by identifier; `seq` preserves insertion order. A
//! `meta` table pins the file to its entity kind and schema version.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::error::{DepotError, Result};
use crate::migration::MigrationPlan;
use crate::model::Persisted;
use crate::storage::row::RecordRow;
use crate::storage::traits::StorageBackend;
use crate::storage::types::{BackendOptions, Change, ChangeSet, StoreMetadata};

const FORMAT_VERSION: &str = "0.1";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    data_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS records_kind ON records (kind);
"#;

/// SQLite storage backend bound to one entity kind.
pub struct SqliteBackend {
    path: PathBuf,
    kind: String,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open a private in-memory store. Nothing survives the backend.
    pub fn open_in_memory(options: &BackendOptions) -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(DepotError::open)?;
        Self::initialize(&mut conn, options)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            kind: options.entity_kind.clone(),
            conn: Mutex::new(conn),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn<F>(&self, err: F) -> Result<MutexGuard<'_, Connection>>
    where
        F: FnOnce(String) -> DepotError,
    {
        self.conn
            .lock()
            .map_err(|_| err("SQLite connection poisoned".to_string()))
    }

    fn ensure_kind<E: Persisted, F>(&self, err: F) -> Result<()>
    where
        F: FnOnce(String) -> DepotError,
    {
        if E::FILE_PREFIX != self.kind {
            return Err(err(format!(
                "Store holds '{}' records, not '{}'",
                self.kind,
                E::FILE_PREFIX
            )));
        }
        Ok(())
    }

    fn meta_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
        conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()
    }

    fn set_meta(tx: &Transaction<'_>, key: &str, value: &str) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Create tables, stamp a fresh file, or check and migrate an existing one.
    fn initialize(conn: &mut Connection, options: &BackendOptions) -> Result<()> {
        conn.busy_timeout(options.busy_timeout)
            .map_err(DepotError::open)?;
        conn.execute_batch(SCHEMA).map_err(DepotError::open)?;

        let tx = conn.transaction().map_err(DepotError::open)?;

        let stored_kind = Self::meta_value(&tx, "entity_kind").map_err(DepotError::open)?;
        match stored_kind {
            None => {
                let now = Utc::now().to_rfc3339();
                Self::set_meta(&tx, "format_version", FORMAT_VERSION).map_err(DepotError::open)?;
                Self::set_meta(&tx, "entity_kind", &options.entity_kind)
                    .map_err(DepotError::open)?;
                Self::set_meta(&tx, "schema_version", &options.schema_version.to_string())
                    .map_err(DepotError::open)?;
                Self::set_meta(&tx, "created_at", &now).map_err(DepotError::open)?;
                Self::set_meta(&tx, "last_modified", &now).map_err(DepotError::open)?;
                tracing::info!(
                    kind = %options.entity_kind,
                    schema_version = options.schema_version,
                    "initialized new store"
                );
            }
            Some(kind) if kind != options.entity_kind => {
                return Err(DepotError::BackendOpen(format!(
                    "Store belongs to entity kind '{}', expected '{}'",
                    kind, options.entity_kind
                )));
            }
            Some(_) => {
                let stored_version = Self::stored_schema_version(&tx)?;
                if stored_version > options.schema_version {
                    return Err(DepotError::BackendOpen(format!(
                        "Store schema version {} is newer than supported version {}",
                        stored_version, options.schema_version
                    )));
                }
                if stored_version < options.schema_version {
                    let plan = options.migration.as_deref().ok_or_else(|| {
                        DepotError::BackendOpen(format!(
                            "Store schema version {} requires migration to {} but no plan was given",
                            stored_version, options.schema_version
                        ))
                    })?;
                    Self::migrate(&tx, options, plan, stored_version)?;
                }
            }
        }

        tx.commit().map_err(DepotError::open)?;
        Ok(())
    }

    fn stored_schema_version(conn: &Connection) -> Result<u32> {
        let value = Self::meta_value(conn, "schema_version")
            .map_err(DepotError::open)?
            .ok_or_else(|| DepotError::BackendOpen("Metadata missing schema_version".to_string()))?;
        value
            .parse()
            .map_err(|e| DepotError::BackendOpen(format!("Invalid schema_version '{}': {}", value, e)))
    }

    fn migrate(
        tx: &Transaction<'_>,
        options: &BackendOptions,
        plan: &dyn MigrationPlan,
        from_version: u32,
    ) -> Result<()> {
        if plan.target_version() != options.schema_version {
            return Err(DepotError::BackendOpen(format!(
                "Migration plan targets version {}, entity kind is at {}",
                plan.target_version(),
                options.schema_version
            )));
        }

        tracing::warn!(
            kind = %options.entity_kind,
            from = from_version,
            to = options.schema_version,
            "migrating store"
        );

        let rows: Vec<RecordRow> = {
            let mut stmt = tx
                .prepare("SELECT id, data_json FROM records WHERE kind = ? ORDER BY seq")
                .map_err(DepotError::open)?;
            let rows = stmt
                .query_map([&options.entity_kind], RecordRow::from_sql)
                .map_err(DepotError::open)?;
            rows.collect::<rusqlite::Result<_>>()
                .map_err(DepotError::open)?
        };

        let now = Utc::now().to_rfc3339();
        for row in rows {
            let document: serde_json::Value = serde_json::from_str(&row.data_json)
                .map_err(|e| DepotError::BackendOpen(format!("Invalid record JSON: {}", e)))?;
            let migrated = plan.migrate(from_version, document).map_err(|e| {
                DepotError::BackendOpen(format!(
                    "Migration of record {} from version {} failed: {}",
                    row.id, from_version, e
                ))
            })?;
            let data_json = serde_json::to_string(&migrated).map_err(DepotError::open)?;
            tx.execute(
                "UPDATE records SET data_json = ?, updated_at = ? WHERE id = ?",
                (data_json, &now, &row.id),
            )
            .map_err(DepotError::open)?;
        }

        Self::set_meta(tx, "schema_version", &options.schema_version.to_string())
            .map_err(DepotError::open)?;
        Self::set_meta(tx, "last_modified", &now).map_err(DepotError::open)?;
        Ok(())
    }

    fn apply<E: Persisted>(tx: &Transaction<'_>, kind: &str, change: Change<E>, now: &str) -> Result<()> {
        match change {
            Change::Insert(entity) => {
                let data_json = serde_json::to_string(&entity).map_err(DepotError::write)?;
                tx.execute(
                    r#"
                    INSERT INTO records (id, kind, data_json, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                    (entity.id().to_string(), kind, data_json, now, now),
                )
                .map_err(DepotError::write)?;
            }
            Change::Save(entity) => {
                let data_json = serde_json::to_string(&entity).map_err(DepotError::write)?;
                tx.execute(
                    r#"
                    INSERT INTO records (id, kind, data_json, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        data_json = excluded.data_json,
                        updated_at = excluded.updated_at
                    "#,
                    (entity.id().to_string(), kind, data_json, now, now),
                )
                .map_err(DepotError::write)?;
            }
            Change::Delete(id) => {
                tx.execute(
                    "DELETE FROM records WHERE id = ? AND kind = ?",
                    (id.to_string(), kind),
                )
                .map_err(DepotError::write)?;
            }
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str, key: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| DepotError::BackendRead(format!("Invalid {} timestamp: {}", key, e)))?
        .with_timezone(&Utc))
}

impl StorageBackend for SqliteBackend {
    fn open(path: &Path, options: &BackendOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(DepotError::BackendOpen(format!(
                    "Store directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let mut conn = Connection::open(path)
            .map_err(|e| DepotError::BackendOpen(format!("{}: {}", path.display(), e)))?;
        Self::initialize(&mut conn, options)?;

        tracing::info!(path = %path.display(), kind = %options.entity_kind, "opened store");

        Ok(Self {
            path: path.to_path_buf(),
            kind: options.entity_kind.clone(),
            conn: Mutex::new(conn),
        })
    }

    fn entity_kind(&self) -> &str {
        &self.kind
    }

    fn metadata(&self) -> Result<StoreMetadata> {
        let conn = self.lock_conn(DepotError::BackendRead)?;

        let get = |key: &str| -> Result<String> {
            Self::meta_value(&conn, key)
                .map_err(DepotError::read)?
                .ok_or_else(|| DepotError::BackendRead(format!("Metadata missing {}", key)))
        };

        let schema_version = get("schema_version")?;
        let schema_version = schema_version.parse().map_err(|e| {
            DepotError::BackendRead(format!("Invalid schema_version '{}': {}", schema_version, e))
        })?;

        Ok(StoreMetadata {
            format_version: get("format_version")?,
            entity_kind: get("entity_kind")?,
            schema_version,
            created_at: parse_timestamp(&get("created_at")?, "created_at")?,
            last_modified: parse_timestamp(&get("last_modified")?, "last_modified")?,
        })
    }

    fn fetch_all<E: Persisted>(&self) -> Result<Vec<E>> {
        self.ensure_kind::<E, _>(DepotError::BackendRead)?;
        let conn = self.lock_conn(DepotError::BackendRead)?;

        let mut stmt = conn
            .prepare("SELECT id, data_json FROM records WHERE kind = ? ORDER BY seq")
            .map_err(DepotError::read)?;
        let rows = stmt
            .query_map([&self.kind], RecordRow::from_sql)
            .map_err(DepotError::read)?;

        let mut entities = Vec::new();
        for row in rows {
            let row = row.map_err(DepotError::read)?;
            entities.push(row.decode()?);
        }
        Ok(entities)
    }

    fn fetch_by_id<E: Persisted>(&self, id: &Uuid) -> Result<Option<E>> {
        self.ensure_kind::<E, _>(DepotError::BackendRead)?;
        let conn = self.lock_conn(DepotError::BackendRead)?;

        let row = conn
            .query_row(
                "SELECT id, data_json FROM records WHERE id = ? AND kind = ?",
                (id.to_string(), &self.kind),
                RecordRow::from_sql,
            )
            .optional()
            .map_err(DepotError::read)?;

        row.map(RecordRow::decode).transpose()
    }

    fn count<E: Persisted>(&self) -> Result<usize> {
        self.ensure_kind::<E, _>(DepotError::BackendRead)?;
        let conn = self.lock_conn(DepotError::BackendRead)?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE kind = ?",
                [&self.kind],
                |row| row.get(0),
            )
            .map_err(DepotError::read)?;
        usize::try_from(count).map_err(DepotError::read)
    }

    fn commit<E: Persisted>(&self, changes: ChangeSet<E>) -> Result<()> {
        self.ensure_kind::<E, _>(DepotError::BackendWrite)?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn(DepotError::BackendWrite)?;
        let tx = conn.transaction().map_err(DepotError::write)?;

        let now = Utc::now().to_rfc3339();
        let count = changes.len();
        for change in changes {
            // Dropping `tx` on error rolls the whole set back.
            Self::apply(&tx, &self.kind, change, &now)?;
        }

        tx.execute(
            "UPDATE meta SET value = ? WHERE key = 'last_modified'",
            [&now],
        )
        .map_err(DepotError::write)?;

        tx.commit().map_err(DepotError::write)?;

        tracing::debug!(kind = %self.kind, changes = count, "committed change set");
        Ok(())
    }

    fn check_integrity(&self) -> Result<()> {
        let conn = self.lock_conn(DepotError::BackendRead)?;

        let status: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(DepotError::read)?;
        if status != "ok" {
            return Err(DepotError::BackendRead(format!(
                "SQLite integrity check failed: {}",
                status
            )));
        }

        let metadata_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM meta WHERE key IN ('format_version', 'entity_kind', 'schema_version', 'created_at', 'last_modified')",
                [],
                |row| row.get(0),
            )
            .map_err(DepotError::read)?;
        if metadata_count < 5 {
            return Err(DepotError::BackendRead(
                "Metadata table missing required keys".to_string(),
            ));
        }

        let foreign: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE kind != ?",
                [&self.kind],
                |row| row.get(0),
            )
            .map_err(DepotError::read)?;
        if foreign > 0 {
            return Err(DepotError::BackendRead(format!(
                "{} records belong to another entity kind",
                foreign
            )));
        }

        let invalid: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE json_valid(data_json) = 0",
                [],
                |row| row.get(0),
            )
            .map_err(DepotError::read)?;
        if invalid > 0 {
            return Err(DepotError::BackendRead(format!(
                "{} records hold invalid JSON",
                invalid
            )));
        }

        Ok(())
    }
}
