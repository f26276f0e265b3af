//! SQLite storage backend.
//!
//! Persists schemas, fingerprints, references, configs, and modes to a
//! single SQLite file. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! Registration follows the three-transaction split shared with the
//! Postgres backend: the version row commits first, then the id allocator
//! runs in its own short transaction (so the `ctx_id_alloc` row lock never
//! spans the main write), then the fingerprint mapping lands with a
//! first-writer-wins insert. Unique-constraint races between concurrent
//! writers surface as retriable errors and re-run the whole sequence.
//!
//! # Usage
//! ```rust,no_run
//! use schemahub_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./registry.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use schemahub_core::{
    ListSchemasParams, Metadata, Mode, NewSchema, RegistryError, RuleSet, SchemaFormat,
    SchemaRecord, SchemaReference, SchemaStore, SubjectConfig, SubjectVersion, LATEST_VERSION,
};

use crate::retry::RetryPolicy;

/// Ordered, idempotent migrations applied at startup.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_schemas",
        "CREATE TABLE IF NOT EXISTS schemas (
            ctx         TEXT    NOT NULL,
            subject     TEXT    NOT NULL,
            version     INTEGER NOT NULL,
            format      TEXT    NOT NULL,
            schema_text TEXT    NOT NULL,
            fingerprint TEXT    NOT NULL,
            metadata    TEXT,
            rule_set    TEXT,
            deleted     INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (ctx, subject, version)
        )",
    ),
    (
        "0002_schemas_fp_idx",
        "CREATE INDEX IF NOT EXISTS schemas_fp ON schemas (ctx, fingerprint)",
    ),
    (
        "0003_schema_fingerprints",
        "CREATE TABLE IF NOT EXISTS schema_fingerprints (
            ctx         TEXT   NOT NULL,
            fingerprint TEXT   NOT NULL,
            schema_id   INTEGER NOT NULL,
            PRIMARY KEY (ctx, fingerprint)
        )",
    ),
    (
        "0004_schema_fingerprints_id_idx",
        "CREATE UNIQUE INDEX IF NOT EXISTS schema_fingerprints_id
            ON schema_fingerprints (ctx, schema_id)",
    ),
    (
        "0005_schema_references",
        "CREATE TABLE IF NOT EXISTS schema_references (
            ctx         TEXT    NOT NULL,
            schema_id   INTEGER NOT NULL,
            pos         INTEGER NOT NULL,
            name        TEXT    NOT NULL,
            ref_subject TEXT    NOT NULL,
            ref_version INTEGER NOT NULL,
            PRIMARY KEY (ctx, schema_id, name)
        )",
    ),
    (
        "0006_references_target_idx",
        "CREATE INDEX IF NOT EXISTS schema_references_target
            ON schema_references (ctx, ref_subject, ref_version)",
    ),
    (
        "0007_ctx_id_alloc",
        "CREATE TABLE IF NOT EXISTS ctx_id_alloc (
            ctx     TEXT    PRIMARY KEY,
            next_id INTEGER NOT NULL
        )",
    ),
    (
        "0008_contexts",
        "CREATE TABLE IF NOT EXISTS contexts (
            name       TEXT    PRIMARY KEY,
            created_at INTEGER NOT NULL
        )",
    ),
    (
        "0009_configs",
        "CREATE TABLE IF NOT EXISTS configs (
            ctx     TEXT NOT NULL,
            subject TEXT NOT NULL,
            config  TEXT NOT NULL,
            PRIMARY KEY (ctx, subject)
        )",
    ),
    (
        "0010_modes",
        "CREATE TABLE IF NOT EXISTS modes (
            ctx     TEXT NOT NULL,
            subject TEXT NOT NULL,
            mode    TEXT NOT NULL,
            PRIMARY KEY (ctx, subject)
        )",
    ),
];

/// SQLite-backed schema store.
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    retry: RetryPolicy,
}

fn map_err(e: sqlx::Error) -> RegistryError {
    match &e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            // 1555/2067: primary-key/unique violation (lost race with a
            // concurrent writer); 5/6/261/517: busy/locked variants.
            let retriable = matches!(code.as_str(), "1555" | "2067" | "5" | "6" | "261" | "517")
                || message.contains("UNIQUE constraint failed")
                || message.contains("database is locked");
            if retriable {
                RegistryError::Retriable(message)
            } else {
                RegistryError::Storage(message)
            }
        }
        sqlx::Error::PoolTimedOut => RegistryError::Retriable("connection pool timed out".into()),
        _ => RegistryError::Storage(e.to_string()),
    }
}

fn encode_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, RegistryError> {
    value
        .map(|v| serde_json::to_string(v).map_err(|e| RegistryError::Storage(e.to_string())))
        .transpose()
}

fn decode_json<T: serde::de::DeserializeOwned>(
    value: Option<String>,
) -> Result<Option<T>, RegistryError> {
    value
        .map(|s| serde_json::from_str(&s).map_err(|e| RegistryError::Storage(e.to_string())))
        .transpose()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteStore {
    /// Open (or create) a registry database at `path` and apply migrations.
    ///
    /// The path may be a plain file path (`"./registry.db"`) or a full
    /// SQLite URL (`"sqlite:./registry.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, RegistryError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(map_err)?;
        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the pool drops.
    ///
    /// The pool is pinned to a single connection: every pooled connection
    /// would otherwise get its own private `:memory:` database.
    pub async fn in_memory() -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(map_err)?;
        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the migration list in order. "Already exists" failures are
    /// benign no-ops; anything else aborts startup.
    async fn migrate(&self) -> Result<(), RegistryError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        for (name, sql) in MIGRATIONS {
            match sqlx::query(sql).execute(&self.pool).await {
                Ok(_) => {}
                Err(sqlx::Error::Database(db))
                    if db.message().contains("already exists")
                        || db.message().contains("duplicate column") =>
                {
                    debug!(migration = name, "skipping, already applied");
                }
                Err(e) => return Err(map_err(e)),
            }
        }
        Ok(())
    }

    async fn load_references(
        &self,
        ctx: &str,
        id: i64,
    ) -> Result<Vec<SchemaReference>, RegistryError> {
        let rows = sqlx::query(
            "SELECT name, ref_subject, ref_version FROM schema_references
             WHERE ctx = ? AND schema_id = ? ORDER BY pos",
        )
        .bind(ctx)
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows
            .into_iter()
            .map(|row| SchemaReference {
                name: row.get("name"),
                subject: row.get("ref_subject"),
                version: row.get::<i64, _>("ref_version") as i32,
            })
            .collect())
    }

    fn record_from_row(ctx: &str, row: &sqlx::sqlite::SqliteRow) -> Result<SchemaRecord, RegistryError> {
        let format: String = row.get("format");
        Ok(SchemaRecord {
            context: ctx.to_string(),
            subject: row.get("subject"),
            version: row.get::<i64, _>("version") as i32,
            id: row.get::<i64, _>("schema_id"),
            format: format.parse::<SchemaFormat>()?,
            schema: row.get("schema_text"),
            fingerprint: row.get("fingerprint"),
            references: Vec::new(),
            metadata: decode_json(row.get("metadata"))?,
            rule_set: decode_json(row.get("rule_set"))?,
            deleted: row.get::<bool, _>("deleted"),
            created_at: row.get::<i64, _>("created_at"),
        })
    }

    async fn hydrate(&self, ctx: &str, row: &sqlx::sqlite::SqliteRow) -> Result<SchemaRecord, RegistryError> {
        let mut record = Self::record_from_row(ctx, row)?;
        record.references = self.load_references(ctx, record.id).await?;
        Ok(record)
    }

    const SELECT_RECORD: &'static str =
        "SELECT s.subject, s.version, s.format, s.schema_text, s.fingerprint,
                s.metadata, s.rule_set, s.deleted, s.created_at, f.schema_id
         FROM schemas s
         JOIN schema_fingerprints f ON f.ctx = s.ctx AND f.fingerprint = s.fingerprint";

    async fn subject_exists(&self, ctx: &str, subject: &str) -> Result<bool, RegistryError> {
        let row = sqlx::query("SELECT 1 FROM schemas WHERE ctx = ? AND subject = ? LIMIT 1")
            .bind(ctx)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.is_some())
    }

    /// Resolve `-1` to the latest live version.
    async fn resolve_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<i32, RegistryError> {
        if version == LATEST_VERSION {
            let row = sqlx::query(
                "SELECT MAX(version) AS v FROM schemas
                 WHERE ctx = ? AND subject = ? AND deleted = 0",
            )
            .bind(ctx)
            .bind(subject)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            return match row.get::<Option<i64>, _>("v") {
                Some(v) => Ok(v as i32),
                None if self.subject_exists(ctx, subject).await? => {
                    Err(RegistryError::SubjectDeleted {
                        subject: subject.to_string(),
                    })
                }
                None => Err(RegistryError::SubjectNotFound {
                    subject: subject.to_string(),
                }),
            };
        }
        if version <= 0 {
            return Err(RegistryError::InvalidVersion(version.to_string()));
        }
        Ok(version)
    }

    /// One pass of the registration sequence; unique-key races abort with a
    /// retriable error and the caller re-runs it.
    async fn try_create_schema(
        &self,
        ctx: &str,
        new: &NewSchema,
    ) -> Result<SchemaRecord, RegistryError> {
        // T1: version allocation + dedup scan + row insert. The version max
        // is read before the fingerprint scan so the scan sees a snapshot
        // at least as fresh as the max.
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let next_version: i64 = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS v FROM schemas
             WHERE ctx = ? AND subject = ?",
        )
        .bind(ctx)
        .bind(&new.subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?
        .get("v");

        let rows = sqlx::query(
            "SELECT version, deleted, metadata, rule_set FROM schemas
             WHERE ctx = ? AND subject = ? AND fingerprint = ?",
        )
        .bind(ctx)
        .bind(&new.subject)
        .bind(&new.fingerprint)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_err)?;

        let mut existing_deleted = false;
        let mut matched_version: Option<i32> = None;
        for row in &rows {
            if row.get::<bool, _>("deleted") {
                existing_deleted = true;
                continue;
            }
            let metadata: Option<Metadata> = decode_json(row.get("metadata"))?;
            let rule_set: Option<RuleSet> = decode_json(row.get("rule_set"))?;
            if Metadata::normalized(metadata.as_ref()) == Metadata::normalized(new.metadata.as_ref())
                && RuleSet::normalized(rule_set.as_ref())
                    == RuleSet::normalized(new.rule_set.as_ref())
            {
                matched_version = Some(row.get::<i64, _>("version") as i32);
                break;
            }
        }

        if matched_version.is_none() {
            if existing_deleted {
                sqlx::query(
                    "DELETE FROM schemas
                     WHERE ctx = ? AND subject = ? AND fingerprint = ? AND deleted = 1",
                )
                .bind(ctx)
                .bind(&new.subject)
                .bind(&new.fingerprint)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            }
            sqlx::query(
                "INSERT INTO schemas
                 (ctx, subject, version, format, schema_text, fingerprint,
                  metadata, rule_set, deleted, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(ctx)
            .bind(&new.subject)
            .bind(next_version)
            .bind(new.format.as_str())
            .bind(&new.schema)
            .bind(&new.fingerprint)
            .bind(encode_json(new.metadata.as_ref())?)
            .bind(encode_json(new.rule_set.as_ref())?)
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            sqlx::query(
                "INSERT INTO contexts (name, created_at) VALUES (?, ?)
                 ON CONFLICT(name) DO NOTHING",
            )
            .bind(ctx)
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        let known_id: Option<i64> = sqlx::query(
            "SELECT schema_id FROM schema_fingerprints WHERE ctx = ? AND fingerprint = ?",
        )
        .bind(ctx)
        .bind(&new.fingerprint)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?
        .map(|row| row.get("schema_id"));
        tx.commit().await.map_err(map_err)?;

        let id = match known_id {
            Some(id) => id,
            None => {
                // T2: short-lived allocator transaction. The atomic
                // UPDATE..RETURNING claim keeps the ctx_id_alloc row locked
                // only for this statement.
                let mut tx2 = self.pool.begin().await.map_err(map_err)?;
                sqlx::query(
                    "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES (?, 1)
                     ON CONFLICT(ctx) DO NOTHING",
                )
                .bind(ctx)
                .execute(&mut *tx2)
                .await
                .map_err(map_err)?;
                let candidate: i64 = sqlx::query(
                    "UPDATE ctx_id_alloc SET next_id = next_id + 1
                     WHERE ctx = ? RETURNING next_id - 1 AS id",
                )
                .bind(ctx)
                .fetch_one(&mut *tx2)
                .await
                .map_err(map_err)?
                .get("id");
                tx2.commit().await.map_err(map_err)?;

                // T3: first-writer-wins on the fingerprint mapping. A lost
                // race abandons `candidate` — ids may have gaps.
                let mut tx3 = self.pool.begin().await.map_err(map_err)?;
                sqlx::query(
                    "INSERT INTO schema_fingerprints (ctx, fingerprint, schema_id)
                     VALUES (?, ?, ?) ON CONFLICT(ctx, fingerprint) DO NOTHING",
                )
                .bind(ctx)
                .bind(&new.fingerprint)
                .bind(candidate)
                .execute(&mut *tx3)
                .await
                .map_err(map_err)?;
                let id: i64 = sqlx::query(
                    "SELECT schema_id FROM schema_fingerprints
                     WHERE ctx = ? AND fingerprint = ?",
                )
                .bind(ctx)
                .bind(&new.fingerprint)
                .fetch_one(&mut *tx3)
                .await
                .map_err(map_err)?
                .get("schema_id");
                tx3.commit().await.map_err(map_err)?;
                id
            }
        };

        self.write_references(ctx, id, &new.references).await?;

        let version = matched_version.unwrap_or(next_version as i32);
        if matched_version.is_some() {
            debug!(ctx, subject = %new.subject, id, version, "idempotent schema hit");
        } else {
            debug!(ctx, subject = %new.subject, id, version, "schema registered");
        }
        self.get_by_subject_version(ctx, &new.subject, version).await
    }

    /// Record references once per content id; later registrations of the
    /// same content keep the first writer's list.
    async fn write_references(
        &self,
        ctx: &str,
        id: i64,
        references: &[SchemaReference],
    ) -> Result<(), RegistryError> {
        if references.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS c FROM schema_references WHERE ctx = ? AND schema_id = ?")
                .bind(ctx)
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_err)?
                .get("c");
        if count == 0 {
            for (pos, reference) in references.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO schema_references
                     (ctx, schema_id, pos, name, ref_subject, ref_version)
                     VALUES (?, ?, ?, ?, ?, ?)
                     ON CONFLICT(ctx, schema_id, name) DO NOTHING",
                )
                .bind(ctx)
                .bind(id)
                .bind(pos as i64)
                .bind(&reference.name)
                .bind(&reference.subject)
                .bind(reference.version)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            }
        }
        tx.commit().await.map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl SchemaStore for SqliteStore {
    async fn create_schema(
        &self,
        ctx: &str,
        new: NewSchema,
    ) -> Result<SchemaRecord, RegistryError> {
        self.retry
            .run("create_schema", || self.try_create_schema(ctx, &new))
            .await
    }

    async fn import_schema(
        &self,
        ctx: &str,
        record: SchemaRecord,
    ) -> Result<SchemaRecord, RegistryError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let bound: Option<(String, i64)> = sqlx::query(
            "SELECT fingerprint, schema_id FROM schema_fingerprints
             WHERE ctx = ? AND (fingerprint = ? OR schema_id = ?)",
        )
        .bind(ctx)
        .bind(&record.fingerprint)
        .bind(record.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?
        .map(|row| (row.get("fingerprint"), row.get("schema_id")));
        if let Some((fingerprint, id)) = bound {
            if fingerprint != record.fingerprint || id != record.id {
                return Err(RegistryError::IdConflict { id: record.id });
            }
        }

        let occupied = sqlx::query("SELECT 1 FROM schemas WHERE ctx = ? AND subject = ? AND version = ?")
            .bind(ctx)
            .bind(&record.subject)
            .bind(record.version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?
            .is_some();
        if occupied {
            return Err(RegistryError::SchemaExists {
                subject: record.subject.clone(),
                id: record.id,
                version: record.version,
            });
        }

        sqlx::query(
            "INSERT INTO schemas
             (ctx, subject, version, format, schema_text, fingerprint,
              metadata, rule_set, deleted, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ctx)
        .bind(&record.subject)
        .bind(record.version)
        .bind(record.format.as_str())
        .bind(&record.schema)
        .bind(&record.fingerprint)
        .bind(encode_json(record.metadata.as_ref())?)
        .bind(encode_json(record.rule_set.as_ref())?)
        .bind(record.deleted)
        .bind(now_millis())
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO schema_fingerprints (ctx, fingerprint, schema_id)
             VALUES (?, ?, ?) ON CONFLICT(ctx, fingerprint) DO NOTHING",
        )
        .bind(ctx)
        .bind(&record.fingerprint)
        .bind(record.id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        // Keep the allocator ahead of imported ids.
        sqlx::query(
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES (?, ?)
             ON CONFLICT(ctx) DO UPDATE SET next_id = MAX(next_id, excluded.next_id)",
        )
        .bind(ctx)
        .bind(record.id + 1)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(ctx)
        .bind(now_millis())
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;

        self.write_references(ctx, record.id, &record.references)
            .await?;
        let mut stored = record;
        stored.context = ctx.to_string();
        Ok(stored)
    }

    async fn get_by_id(&self, ctx: &str, id: i64) -> Result<SchemaRecord, RegistryError> {
        let sql = format!(
            "{} WHERE s.ctx = ? AND f.schema_id = ?
             ORDER BY s.deleted ASC, s.subject ASC, s.version ASC LIMIT 1",
            Self::SELECT_RECORD
        );
        let row = sqlx::query(&sql)
            .bind(ctx)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or(RegistryError::SchemaNotFound { id })?;
        self.hydrate(ctx, &row).await
    }

    async fn get_by_subject_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<SchemaRecord, RegistryError> {
        let version = self.resolve_version(ctx, subject, version).await?;
        let sql = format!(
            "{} WHERE s.ctx = ? AND s.subject = ? AND s.version = ? AND s.deleted = 0",
            Self::SELECT_RECORD
        );
        let row = sqlx::query(&sql)
            .bind(ctx)
            .bind(subject)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        match row {
            Some(row) => self.hydrate(ctx, &row).await,
            None if self.subject_exists(ctx, subject).await? => {
                Err(RegistryError::VersionNotFound {
                    subject: subject.to_string(),
                    version,
                })
            }
            None => Err(RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            }),
        }
    }

    async fn get_latest(&self, ctx: &str, subject: &str) -> Result<SchemaRecord, RegistryError> {
        self.get_by_subject_version(ctx, subject, LATEST_VERSION).await
    }

    async fn get_by_fingerprint(
        &self,
        ctx: &str,
        subject: &str,
        fingerprint: &str,
        include_deleted: bool,
    ) -> Result<Option<SchemaRecord>, RegistryError> {
        let mut sql = format!(
            "{} WHERE s.ctx = ? AND s.subject = ? AND s.fingerprint = ?",
            Self::SELECT_RECORD
        );
        if !include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        sql.push_str(" ORDER BY s.version DESC LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(ctx)
            .bind(subject)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        match row {
            Some(row) => Ok(Some(self.hydrate(ctx, &row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_global_fingerprint(
        &self,
        ctx: &str,
        fingerprint: &str,
    ) -> Result<Option<SchemaRecord>, RegistryError> {
        let sql = format!(
            "{} WHERE s.ctx = ? AND s.fingerprint = ? AND s.deleted = 0
             ORDER BY s.version DESC LIMIT 1",
            Self::SELECT_RECORD
        );
        let row = sqlx::query(&sql)
            .bind(ctx)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        match row {
            Some(row) => Ok(Some(self.hydrate(ctx, &row).await?)),
            None => Ok(None),
        }
    }

    async fn schemas_by_subject(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>, RegistryError> {
        let mut sql = format!("{} WHERE s.ctx = ? AND s.subject = ?", Self::SELECT_RECORD);
        if !include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        sql.push_str(" ORDER BY s.version ASC");
        let rows = sqlx::query(&sql)
            .bind(ctx)
            .bind(subject)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.hydrate(ctx, row).await?);
        }
        Ok(records)
    }

    async fn subjects_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let mut sql = String::from(
            "SELECT DISTINCT s.subject FROM schemas s
             JOIN schema_fingerprints f ON f.ctx = s.ctx AND f.fingerprint = s.fingerprint
             WHERE s.ctx = ? AND f.schema_id = ?",
        );
        if !include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        sql.push_str(" ORDER BY s.subject");
        let rows = sqlx::query(&sql)
            .bind(ctx)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows.iter().map(|row| row.get("subject")).collect())
    }

    async fn versions_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<SubjectVersion>, RegistryError> {
        let mut sql = String::from(
            "SELECT s.subject, s.version FROM schemas s
             JOIN schema_fingerprints f ON f.ctx = s.ctx AND f.fingerprint = s.fingerprint
             WHERE s.ctx = ? AND f.schema_id = ?",
        );
        if !include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        sql.push_str(" ORDER BY s.subject, s.version");
        let rows = sqlx::query(&sql)
            .bind(ctx)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows
            .iter()
            .map(|row| SubjectVersion {
                subject: row.get("subject"),
                version: row.get::<i64, _>("version") as i32,
            })
            .collect())
    }

    async fn referenced_by(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<Vec<i64>, RegistryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT r.schema_id FROM schema_references r
             JOIN schema_fingerprints f ON f.ctx = r.ctx AND f.schema_id = r.schema_id
             JOIN schemas s ON s.ctx = r.ctx AND s.fingerprint = f.fingerprint AND s.deleted = 0
             WHERE r.ctx = ? AND r.ref_subject = ? AND r.ref_version = ?
             ORDER BY r.schema_id",
        )
        .bind(ctx)
        .bind(subject)
        .bind(version)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(rows.iter().map(|row| row.get("schema_id")).collect())
    }

    async fn list_subjects(
        &self,
        ctx: &str,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let mut sql = String::from("SELECT DISTINCT subject FROM schemas WHERE ctx = ?");
        if !include_deleted {
            sql.push_str(" AND deleted = 0");
        }
        sql.push_str(" ORDER BY subject");
        let rows = sqlx::query(&sql)
            .bind(ctx)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows.iter().map(|row| row.get("subject")).collect())
    }

    async fn list_versions(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let rows = sqlx::query(
            "SELECT version, deleted FROM schemas
             WHERE ctx = ? AND subject = ? ORDER BY version",
        )
        .bind(ctx)
        .bind(subject)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        if rows.is_empty() {
            return Err(RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            });
        }
        let versions: Vec<i32> = rows
            .iter()
            .filter(|row| include_deleted || !row.get::<bool, _>("deleted"))
            .map(|row| row.get::<i64, _>("version") as i32)
            .collect();
        if versions.is_empty() {
            return Err(RegistryError::SubjectDeleted {
                subject: subject.to_string(),
            });
        }
        Ok(versions)
    }

    async fn list_schemas(
        &self,
        ctx: &str,
        params: &ListSchemasParams,
    ) -> Result<Vec<SchemaRecord>, RegistryError> {
        let mut sql = format!("{} WHERE s.ctx = ?", Self::SELECT_RECORD);
        if !params.include_deleted {
            sql.push_str(" AND s.deleted = 0");
        }
        if params.subject_prefix.is_some() {
            sql.push_str(" AND s.subject LIKE ?");
        }
        if params.latest_only {
            sql.push_str(
                " AND s.version = (SELECT MAX(version) FROM schemas s2
                   WHERE s2.ctx = s.ctx AND s2.subject = s.subject",
            );
            if !params.include_deleted {
                sql.push_str(" AND s2.deleted = 0");
            }
            sql.push(')');
        }
        sql.push_str(" ORDER BY s.subject, s.version LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql).bind(ctx);
        if let Some(prefix) = &params.subject_prefix {
            query = query.bind(format!("{prefix}%"));
        }
        let limit = if params.limit == 0 {
            i64::MAX
        } else {
            params.limit as i64
        };
        query = query.bind(limit).bind(params.offset as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(map_err)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.hydrate(ctx, row).await?);
        }
        Ok(records)
    }

    async fn list_contexts(&self) -> Result<Vec<String>, RegistryError> {
        let rows = sqlx::query("SELECT name FROM contexts ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn delete_schema(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError> {
        let version = self.resolve_version(ctx, subject, version).await?;
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let row = sqlx::query(
            "SELECT deleted, fingerprint FROM schemas
             WHERE ctx = ? AND subject = ? AND version = ?",
        )
        .bind(ctx)
        .bind(subject)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;
        let Some(row) = row else {
            // Existence check runs on the same connection — the open
            // transaction owns it.
            let exists =
                sqlx::query("SELECT 1 FROM schemas WHERE ctx = ? AND subject = ? LIMIT 1")
                    .bind(ctx)
                    .bind(subject)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_err)?
                    .is_some();
            return if exists {
                Err(RegistryError::VersionNotFound {
                    subject: subject.to_string(),
                    version,
                })
            } else {
                Err(RegistryError::SubjectNotFound {
                    subject: subject.to_string(),
                })
            };
        };
        let deleted: bool = row.get("deleted");
        let fingerprint: String = row.get("fingerprint");

        if !permanent {
            // Idempotent on already-soft rows.
            sqlx::query(
                "UPDATE schemas SET deleted = 1
                 WHERE ctx = ? AND subject = ? AND version = ?",
            )
            .bind(ctx)
            .bind(subject)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            return Ok(version);
        }

        if !deleted {
            return Err(RegistryError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        sqlx::query("DELETE FROM schemas WHERE ctx = ? AND subject = ? AND version = ?")
            .bind(ctx)
            .bind(subject)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        self.cleanup_orphan(&mut tx, ctx, &fingerprint).await?;
        tx.commit().await.map_err(map_err)?;
        debug!(ctx, subject, version, "version permanently deleted");
        Ok(version)
    }

    async fn delete_subject(
        &self,
        ctx: &str,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let rows = sqlx::query(
            "SELECT version, deleted, fingerprint FROM schemas
             WHERE ctx = ? AND subject = ? ORDER BY version",
        )
        .bind(ctx)
        .bind(subject)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_err)?;
        if rows.is_empty() {
            return Err(RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            });
        }

        if !permanent {
            let live: Vec<i32> = rows
                .iter()
                .filter(|row| !row.get::<bool, _>("deleted"))
                .map(|row| row.get::<i64, _>("version") as i32)
                .collect();
            if live.is_empty() {
                return Err(RegistryError::SubjectDeleted {
                    subject: subject.to_string(),
                });
            }
            sqlx::query("UPDATE schemas SET deleted = 1 WHERE ctx = ? AND subject = ?")
                .bind(ctx)
                .bind(subject)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            tx.commit().await.map_err(map_err)?;
            return Ok(live);
        }

        if rows.iter().any(|row| !row.get::<bool, _>("deleted")) {
            return Err(RegistryError::SubjectNotSoftDeleted {
                subject: subject.to_string(),
            });
        }
        sqlx::query("DELETE FROM schemas WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        let mut fingerprints: Vec<String> =
            rows.iter().map(|row| row.get("fingerprint")).collect();
        fingerprints.sort();
        fingerprints.dedup();
        for fingerprint in &fingerprints {
            self.cleanup_orphan(&mut tx, ctx, fingerprint).await?;
        }
        sqlx::query("DELETE FROM configs WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        sqlx::query("DELETE FROM modes WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;

        let versions: Vec<i32> = rows
            .iter()
            .map(|row| row.get::<i64, _>("version") as i32)
            .collect();
        debug!(ctx, subject, ?versions, "subject permanently deleted");
        Ok(versions)
    }

    async fn get_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<Option<SubjectConfig>, RegistryError> {
        let row = sqlx::query("SELECT config FROM configs WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        decode_json(row.map(|r| r.get("config")))
    }

    async fn set_config(
        &self,
        ctx: &str,
        subject: &str,
        config: SubjectConfig,
    ) -> Result<(), RegistryError> {
        let encoded =
            serde_json::to_string(&config).map_err(|e| RegistryError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO configs (ctx, subject, config) VALUES (?, ?, ?)
             ON CONFLICT(ctx, subject) DO UPDATE SET config = excluded.config",
        )
        .bind(ctx)
        .bind(subject)
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(ctx)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_config(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM configs WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_mode(&self, ctx: &str, subject: &str) -> Result<Option<Mode>, RegistryError> {
        let row = sqlx::query("SELECT mode FROM modes WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| r.get::<String, _>("mode").parse()).transpose()
    }

    async fn set_mode(&self, ctx: &str, subject: &str, mode: Mode) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO modes (ctx, subject, mode) VALUES (?, ?, ?)
             ON CONFLICT(ctx, subject) DO UPDATE SET mode = excluded.mode",
        )
        .bind(ctx)
        .bind(subject)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(ctx)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_mode(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM modes WHERE ctx = ? AND subject = ?")
            .bind(ctx)
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn next_id(&self, ctx: &str) -> Result<i64, RegistryError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query(
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES (?, 1)
             ON CONFLICT(ctx) DO NOTHING",
        )
        .bind(ctx)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        let id: i64 = sqlx::query(
            "UPDATE ctx_id_alloc SET next_id = next_id + 1
             WHERE ctx = ? RETURNING next_id - 1 AS id",
        )
        .bind(ctx)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?
        .get("id");
        tx.commit().await.map_err(map_err)?;
        Ok(id)
    }

    async fn set_next_id(&self, ctx: &str, id: i64) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query(
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES (?, 1)
             ON CONFLICT(ctx) DO NOTHING",
        )
        .bind(ctx)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        let current: i64 = sqlx::query("SELECT next_id FROM ctx_id_alloc WHERE ctx = ?")
            .bind(ctx)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?
            .get("next_id");
        if id < current {
            return Err(RegistryError::Storage(format!(
                "next id {id} is behind the allocator (at {current})"
            )));
        }
        sqlx::query("UPDATE ctx_id_alloc SET next_id = ? WHERE ctx = ?")
            .bind(id)
            .bind(ctx)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn max_schema_id(&self, ctx: &str) -> Result<i64, RegistryError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(schema_id), 0) AS max_id FROM schema_fingerprints WHERE ctx = ?",
        )
        .bind(ctx)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.get("max_id"))
    }
}

impl SqliteStore {
    /// Drop the fingerprint mapping and references once the last row for a
    /// fingerprint is gone.
    async fn cleanup_orphan(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        ctx: &str,
        fingerprint: &str,
    ) -> Result<(), RegistryError> {
        let remaining: i64 =
            sqlx::query("SELECT COUNT(*) AS c FROM schemas WHERE ctx = ? AND fingerprint = ?")
                .bind(ctx)
                .bind(fingerprint)
                .fetch_one(&mut **tx)
                .await
                .map_err(map_err)?
                .get("c");
        if remaining > 0 {
            return Ok(());
        }
        let id: Option<i64> = sqlx::query(
            "SELECT schema_id FROM schema_fingerprints WHERE ctx = ? AND fingerprint = ?",
        )
        .bind(ctx)
        .bind(fingerprint)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_err)?
        .map(|row| row.get("schema_id"));
        if let Some(id) = id {
            sqlx::query("DELETE FROM schema_fingerprints WHERE ctx = ? AND fingerprint = ?")
                .bind(ctx)
                .bind(fingerprint)
                .execute(&mut **tx)
                .await
                .map_err(map_err)?;
            sqlx::query("DELETE FROM schema_references WHERE ctx = ? AND schema_id = ?")
                .bind(ctx)
                .bind(id)
                .execute(&mut **tx)
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemahub_core::{SchemaFormat, DEFAULT_CONTEXT};

    fn new_schema(subject: &str, text: &str, fp: &str) -> NewSchema {
        NewSchema {
            subject: subject.to_string(),
            format: SchemaFormat::Avro,
            schema: text.to_string(),
            fingerprint: fp.to_string(),
            references: vec![],
            metadata: None,
            rule_set: None,
        }
    }

    #[tokio::test]
    async fn register_allocates_versions_and_ids() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.id, 1);
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{\"v\":2}", "fp2"))
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.id, 2);
        assert_eq!(store.max_schema_id(DEFAULT_CONTEXT).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!((first.id, first.version), (second.id, second.version));
        assert_eq!(
            store
                .list_versions(DEFAULT_CONTEXT, "users", false)
                .await
                .unwrap(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn same_content_shares_id_across_subjects() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{}", "fp1"))
            .await
            .unwrap();
        let b = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-key", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.version, 1);
        assert_eq!(
            store
                .subjects_by_id(DEFAULT_CONTEXT, a.id, false)
                .await
                .unwrap(),
            vec!["users-key", "users-value"]
        );
        let versions = store
            .versions_by_id(DEFAULT_CONTEXT, a.id, false)
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn contexts_have_disjoint_id_spaces() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        let b = store
            .create_schema("dev", new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 1);
        assert_eq!(
            store.get_by_id("dev", 1).await.unwrap().context,
            "dev".to_string()
        );
        assert_eq!(
            store.list_contexts().await.unwrap(),
            vec![DEFAULT_CONTEXT.to_string(), "dev".to_string()]
        );
    }

    #[tokio::test]
    async fn get_by_subject_version_error_taxonomy() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(matches!(
            store.get_by_subject_version(DEFAULT_CONTEXT, "nope", 1).await,
            Err(RegistryError::SubjectNotFound { .. })
        ));
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert!(matches!(
            store.get_by_subject_version(DEFAULT_CONTEXT, "users", 9).await,
            Err(RegistryError::VersionNotFound { .. })
        ));
        let latest = store
            .get_by_subject_version(DEFAULT_CONTEXT, "users", LATEST_VERSION)
            .await
            .unwrap();
        assert_eq!(latest.version, 1);
    }

    #[tokio::test]
    async fn fingerprint_lookups() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert!(store
            .get_by_fingerprint(DEFAULT_CONTEXT, "users", "fp1", false)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_by_fingerprint(DEFAULT_CONTEXT, "users", "fp-other", false)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_by_global_fingerprint(DEFAULT_CONTEXT, "fp1")
            .await
            .unwrap()
            .is_some());

        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();
        assert!(store
            .get_by_fingerprint(DEFAULT_CONTEXT, "users", "fp1", false)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_by_fingerprint(DEFAULT_CONTEXT, "users", "fp1", true)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn soft_then_hard_delete_with_orphan_cleanup() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();

        assert!(matches!(
            store.delete_schema(DEFAULT_CONTEXT, "users", 1, true).await,
            Err(RegistryError::VersionNotSoftDeleted { .. })
        ));
        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();
        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();
        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, true)
            .await
            .unwrap();

        // Mapping cleaned up: identical content gets a fresh id.
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn reregistration_after_soft_delete_reuses_id_and_replaces_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            store
                .list_versions(DEFAULT_CONTEXT, "users", true)
                .await
                .unwrap(),
            vec![second.version]
        );
    }

    #[tokio::test]
    async fn delete_subject_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("orders", "{}", "fp1"))
            .await
            .unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("orders", "{\"v\":2}", "fp2"))
            .await
            .unwrap();

        assert!(matches!(
            store.delete_subject(DEFAULT_CONTEXT, "orders", true).await,
            Err(RegistryError::SubjectNotSoftDeleted { .. })
        ));
        assert_eq!(
            store
                .delete_subject(DEFAULT_CONTEXT, "orders", false)
                .await
                .unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            store.delete_subject(DEFAULT_CONTEXT, "orders", false).await,
            Err(RegistryError::SubjectDeleted { .. })
        ));
        assert_eq!(
            store
                .delete_subject(DEFAULT_CONTEXT, "orders", true)
                .await
                .unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            store.delete_subject(DEFAULT_CONTEXT, "orders", false).await,
            Err(RegistryError::SubjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn references_roundtrip_and_referenced_by() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("address", "{}", "fp-addr"))
            .await
            .unwrap();
        let mut referring = new_schema("customer", "{}", "fp-cust");
        referring.references = vec![SchemaReference {
            name: "address".into(),
            subject: "address".into(),
            version: 1,
        }];
        let customer = store
            .create_schema(DEFAULT_CONTEXT, referring)
            .await
            .unwrap();
        assert_eq!(customer.references.len(), 1);

        let loaded = store
            .get_by_id(DEFAULT_CONTEXT, customer.id)
            .await
            .unwrap();
        assert_eq!(loaded.references[0].subject, "address");

        assert_eq!(
            store
                .referenced_by(DEFAULT_CONTEXT, "address", 1)
                .await
                .unwrap(),
            vec![customer.id]
        );
    }

    #[tokio::test]
    async fn import_schema_and_id_conflicts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = SchemaRecord {
            context: DEFAULT_CONTEXT.to_string(),
            subject: "users".into(),
            version: 5,
            id: 40,
            format: SchemaFormat::Protobuf,
            schema: "syntax = \"proto3\";".into(),
            fingerprint: "fp-import".into(),
            references: vec![],
            metadata: None,
            rule_set: None,
            deleted: false,
            created_at: 0,
        };
        store
            .import_schema(DEFAULT_CONTEXT, record.clone())
            .await
            .unwrap();

        let loaded = store.get_by_id(DEFAULT_CONTEXT, 40).await.unwrap();
        assert_eq!(loaded.version, 5);
        assert_eq!(loaded.format, SchemaFormat::Protobuf);

        let mut conflicting = record.clone();
        conflicting.version = 6;
        conflicting.fingerprint = "fp-different".into();
        assert!(matches!(
            store.import_schema(DEFAULT_CONTEXT, conflicting).await,
            Err(RegistryError::IdConflict { .. })
        ));

        let mut occupied = record.clone();
        occupied.id = 41;
        occupied.fingerprint = "fp-other".into();
        assert!(matches!(
            store.import_schema(DEFAULT_CONTEXT, occupied).await,
            Err(RegistryError::SchemaExists { .. })
        ));

        // Allocator moved beyond the imported id.
        assert!(store.next_id(DEFAULT_CONTEXT).await.unwrap() > 40);
    }

    #[tokio::test]
    async fn config_and_mode_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let config = SubjectConfig {
            compatibility_level: Some(schemahub_core::CompatibilityLevel::ForwardTransitive),
            normalize: Some(true),
            ..SubjectConfig::default()
        };
        store
            .set_config(DEFAULT_CONTEXT, "users", config.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get_config(DEFAULT_CONTEXT, "users").await.unwrap(),
            Some(config.clone())
        );
        // Upsert overwrites.
        let relaxed = SubjectConfig {
            compatibility_level: Some(schemahub_core::CompatibilityLevel::None),
            ..SubjectConfig::default()
        };
        store
            .set_config(DEFAULT_CONTEXT, "users", relaxed.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get_config(DEFAULT_CONTEXT, "users").await.unwrap(),
            Some(relaxed)
        );
        store.delete_config(DEFAULT_CONTEXT, "users").await.unwrap();
        assert!(store
            .get_config(DEFAULT_CONTEXT, "users")
            .await
            .unwrap()
            .is_none());

        store
            .set_mode(DEFAULT_CONTEXT, "", Mode::ReadOnly)
            .await
            .unwrap();
        assert_eq!(
            store.get_mode(DEFAULT_CONTEXT, "").await.unwrap(),
            Some(Mode::ReadOnly)
        );
        store.delete_mode(DEFAULT_CONTEXT, "").await.unwrap();
        assert_eq!(store.get_mode(DEFAULT_CONTEXT, "").await.unwrap(), None);
    }

    #[tokio::test]
    async fn allocator_is_monotonic_and_settable() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.next_id(DEFAULT_CONTEXT).await.unwrap(), 1);
        assert_eq!(store.next_id(DEFAULT_CONTEXT).await.unwrap(), 2);
        store.set_next_id(DEFAULT_CONTEXT, 100).await.unwrap();
        assert_eq!(store.next_id(DEFAULT_CONTEXT).await.unwrap(), 100);
        assert!(store.set_next_id(DEFAULT_CONTEXT, 5).await.is_err());
    }

    #[tokio::test]
    async fn list_schemas_prefix_latest_paging() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{}", "fp1"))
            .await
            .unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{\"v\":2}", "fp2"))
            .await
            .unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("orders-value", "{}", "fp3"))
            .await
            .unwrap();

        let all = store
            .list_schemas(DEFAULT_CONTEXT, &ListSchemasParams::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let latest_users = store
            .list_schemas(
                DEFAULT_CONTEXT,
                &ListSchemasParams {
                    subject_prefix: Some("users".into()),
                    latest_only: true,
                    ..ListSchemasParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(latest_users.len(), 1);
        assert_eq!(latest_users[0].version, 2);

        let page = store
            .list_schemas(
                DEFAULT_CONTEXT,
                &ListSchemasParams {
                    offset: 2,
                    limit: 5,
                    ..ListSchemasParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn migrations_are_reentrant() {
        let store = SqliteStore::in_memory().await.unwrap();
        // A second pass over the migration list must be a no-op.
        store.migrate().await.unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
    }
}
