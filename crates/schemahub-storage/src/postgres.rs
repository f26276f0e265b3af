//! PostgreSQL storage backend.
//!
//! Production deployments with a replicated database. Uses `sqlx` with
//! connection pooling; the registration path is the same three-transaction
//! split as the SQLite backend, with Postgres error codes (unique
//! violation, deadlock, serialization failure) classified as retriable.
//!
//! # Feature flag
//! Requires the `postgres` feature:
//! ```toml
//! schemahub-storage = { version = "0.2", features = ["postgres"] }
//! ```

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use schemahub_core::{
    ListSchemasParams, Metadata, Mode, NewSchema, RegistryError, RuleSet, SchemaFormat,
    SchemaRecord, SchemaReference, SchemaStore, SubjectConfig, SubjectVersion, LATEST_VERSION,
};

use crate::retry::RetryPolicy;
use crate::DbConfig;

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
            deleted     BOOLEAN NOT NULL DEFAULT FALSE,
            created_at  BIGINT  NOT NULL,
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
            schema_id   BIGINT NOT NULL,
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
            schema_id   BIGINT  NOT NULL,
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
            ctx     TEXT   PRIMARY KEY,
            next_id BIGINT NOT NULL
        )",
    ),
    (
        "0008_contexts",
        "CREATE TABLE IF NOT EXISTS contexts (
            name       TEXT   PRIMARY KEY,
            created_at BIGINT NOT NULL
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

/// PostgreSQL-backed schema store.
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
}

fn map_err(e: sqlx::Error) -> RegistryError {
    match &e {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            // 23505 unique_violation, 40001 serialization_failure,
            // 40P01 deadlock_detected
            if matches!(code.as_str(), "23505" | "40001" | "40P01") {
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

impl PostgresStore {
    /// Connect to a PostgreSQL database and apply migrations.
    ///
    /// The URL follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, RegistryError> {
        let pool = PgPool::connect(database_url).await.map_err(map_err)?;
        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.migrate().await?;
        info!("postgres store connected and migrated");
        Ok(store)
    }

    /// Connect with pool sizing from a `DbConfig`.
    pub async fn connect_with_config(config: &DbConfig) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.postgres_url())
            .await
            .map_err(map_err)?;
        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the migration list in order; "already exists" is a benign
    /// no-op, anything else aborts startup.
    async fn migrate(&self) -> Result<(), RegistryError> {
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
             WHERE ctx = $1 AND schema_id = $2 ORDER BY pos",
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
                version: row.get::<i32, _>("ref_version"),
            })
            .collect())
    }

    fn record_from_row(
        ctx: &str,
        row: &sqlx::postgres::PgRow,
    ) -> Result<SchemaRecord, RegistryError> {
        let format: String = row.get("format");
        Ok(SchemaRecord {
            context: ctx.to_string(),
            subject: row.get("subject"),
            version: row.get::<i32, _>("version"),
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

    async fn hydrate(
        &self,
        ctx: &str,
        row: &sqlx::postgres::PgRow,
    ) -> Result<SchemaRecord, RegistryError> {
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
        let row = sqlx::query("SELECT 1 FROM schemas WHERE ctx = $1 AND subject = $2 LIMIT 1")
            .bind(ctx)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(row.is_some())
    }

    async fn resolve_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<i32, RegistryError> {
        if version == LATEST_VERSION {
            let row = sqlx::query(
                "SELECT MAX(version) AS v FROM schemas
                 WHERE ctx = $1 AND subject = $2 AND NOT deleted",
            )
            .bind(ctx)
            .bind(subject)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            return match row.get::<Option<i32>, _>("v") {
                Some(v) => Ok(v),
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

    async fn try_create_schema(
        &self,
        ctx: &str,
        new: &NewSchema,
    ) -> Result<SchemaRecord, RegistryError> {
        // T1: version allocation before the fingerprint scan, then the row
        // insert. Unique-key losses against concurrent writers retry.
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let next_version: i32 = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS v FROM schemas
             WHERE ctx = $1 AND subject = $2",
        )
        .bind(ctx)
        .bind(&new.subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_err)?
        .get("v");

        let rows = sqlx::query(
            "SELECT version, deleted, metadata, rule_set FROM schemas
             WHERE ctx = $1 AND subject = $2 AND fingerprint = $3",
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
                matched_version = Some(row.get::<i32, _>("version"));
                break;
            }
        }

        if matched_version.is_none() {
            if existing_deleted {
                sqlx::query(
                    "DELETE FROM schemas
                     WHERE ctx = $1 AND subject = $2 AND fingerprint = $3 AND deleted",
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
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)",
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
                "INSERT INTO contexts (name, created_at) VALUES ($1, $2)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(ctx)
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        }

        let known_id: Option<i64> = sqlx::query(
            "SELECT schema_id FROM schema_fingerprints WHERE ctx = $1 AND fingerprint = $2",
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
                // T2: short-lived allocator claim; the row lock on
                // ctx_id_alloc is held only for this statement.
                let mut tx2 = self.pool.begin().await.map_err(map_err)?;
                sqlx::query(
                    "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES ($1, 1)
                     ON CONFLICT (ctx) DO NOTHING",
                )
                .bind(ctx)
                .execute(&mut *tx2)
                .await
                .map_err(map_err)?;
                let candidate: i64 = sqlx::query(
                    "UPDATE ctx_id_alloc SET next_id = next_id + 1
                     WHERE ctx = $1 RETURNING next_id - 1 AS id",
                )
                .bind(ctx)
                .fetch_one(&mut *tx2)
                .await
                .map_err(map_err)?
                .get("id");
                tx2.commit().await.map_err(map_err)?;

                // T3: first-writer-wins; a lost race abandons `candidate`.
                let mut tx3 = self.pool.begin().await.map_err(map_err)?;
                sqlx::query(
                    "INSERT INTO schema_fingerprints (ctx, fingerprint, schema_id)
                     VALUES ($1, $2, $3) ON CONFLICT (ctx, fingerprint) DO NOTHING",
                )
                .bind(ctx)
                .bind(&new.fingerprint)
                .bind(candidate)
                .execute(&mut *tx3)
                .await
                .map_err(map_err)?;
                let id: i64 = sqlx::query(
                    "SELECT schema_id FROM schema_fingerprints
                     WHERE ctx = $1 AND fingerprint = $2",
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

        let version = matched_version.unwrap_or(next_version);
        debug!(ctx, subject = %new.subject, id, version, "schema stored");
        self.get_by_subject_version(ctx, &new.subject, version).await
    }

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
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS c FROM schema_references WHERE ctx = $1 AND schema_id = $2",
        )
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
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (ctx, schema_id, name) DO NOTHING",
                )
                .bind(ctx)
                .bind(id)
                .bind(pos as i32)
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

    async fn cleanup_orphan(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ctx: &str,
        fingerprint: &str,
    ) -> Result<(), RegistryError> {
        let remaining: i64 =
            sqlx::query("SELECT COUNT(*) AS c FROM schemas WHERE ctx = $1 AND fingerprint = $2")
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
            "SELECT schema_id FROM schema_fingerprints WHERE ctx = $1 AND fingerprint = $2",
        )
        .bind(ctx)
        .bind(fingerprint)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_err)?
        .map(|row| row.get("schema_id"));
        if let Some(id) = id {
            sqlx::query("DELETE FROM schema_fingerprints WHERE ctx = $1 AND fingerprint = $2")
                .bind(ctx)
                .bind(fingerprint)
                .execute(&mut **tx)
                .await
                .map_err(map_err)?;
            sqlx::query("DELETE FROM schema_references WHERE ctx = $1 AND schema_id = $2")
                .bind(ctx)
                .bind(id)
                .execute(&mut **tx)
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaStore for PostgresStore {
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
             WHERE ctx = $1 AND (fingerprint = $2 OR schema_id = $3)",
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

        let occupied =
            sqlx::query("SELECT 1 FROM schemas WHERE ctx = $1 AND subject = $2 AND version = $3")
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
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
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
             VALUES ($1, $2, $3) ON CONFLICT (ctx, fingerprint) DO NOTHING",
        )
        .bind(ctx)
        .bind(&record.fingerprint)
        .bind(record.id)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES ($1, $2)
             ON CONFLICT (ctx) DO UPDATE
             SET next_id = GREATEST(ctx_id_alloc.next_id, excluded.next_id)",
        )
        .bind(ctx)
        .bind(record.id + 1)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
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
            "{} WHERE s.ctx = $1 AND f.schema_id = $2
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
            "{} WHERE s.ctx = $1 AND s.subject = $2 AND s.version = $3 AND NOT s.deleted",
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
            "{} WHERE s.ctx = $1 AND s.subject = $2 AND s.fingerprint = $3",
            Self::SELECT_RECORD
        );
        if !include_deleted {
            sql.push_str(" AND NOT s.deleted");
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
            "{} WHERE s.ctx = $1 AND s.fingerprint = $2 AND NOT s.deleted
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
        let mut sql = format!("{} WHERE s.ctx = $1 AND s.subject = $2", Self::SELECT_RECORD);
        if !include_deleted {
            sql.push_str(" AND NOT s.deleted");
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
             WHERE s.ctx = $1 AND f.schema_id = $2",
        );
        if !include_deleted {
            sql.push_str(" AND NOT s.deleted");
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
             WHERE s.ctx = $1 AND f.schema_id = $2",
        );
        if !include_deleted {
            sql.push_str(" AND NOT s.deleted");
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
                version: row.get::<i32, _>("version"),
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
             JOIN schemas s ON s.ctx = r.ctx AND s.fingerprint = f.fingerprint AND NOT s.deleted
             WHERE r.ctx = $1 AND r.ref_subject = $2 AND r.ref_version = $3
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
        let mut sql = String::from("SELECT DISTINCT subject FROM schemas WHERE ctx = $1");
        if !include_deleted {
            sql.push_str(" AND NOT deleted");
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
             WHERE ctx = $1 AND subject = $2 ORDER BY version",
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
            .map(|row| row.get::<i32, _>("version"))
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
        let mut sql = format!("{} WHERE s.ctx = $1", Self::SELECT_RECORD);
        let mut arg = 1;
        if !params.include_deleted {
            sql.push_str(" AND NOT s.deleted");
        }
        if params.subject_prefix.is_some() {
            arg += 1;
            sql.push_str(&format!(" AND s.subject LIKE ${arg}"));
        }
        if params.latest_only {
            sql.push_str(
                " AND s.version = (SELECT MAX(version) FROM schemas s2
                   WHERE s2.ctx = s.ctx AND s2.subject = s.subject",
            );
            if !params.include_deleted {
                sql.push_str(" AND NOT s2.deleted");
            }
            sql.push(')');
        }
        sql.push_str(&format!(
            " ORDER BY s.subject, s.version LIMIT ${} OFFSET ${}",
            arg + 1,
            arg + 2
        ));

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
             WHERE ctx = $1 AND subject = $2 AND version = $3",
        )
        .bind(ctx)
        .bind(subject)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;
        let Some(row) = row else {
            let exists =
                sqlx::query("SELECT 1 FROM schemas WHERE ctx = $1 AND subject = $2 LIMIT 1")
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
            sqlx::query(
                "UPDATE schemas SET deleted = TRUE
                 WHERE ctx = $1 AND subject = $2 AND version = $3",
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
        sqlx::query("DELETE FROM schemas WHERE ctx = $1 AND subject = $2 AND version = $3")
            .bind(ctx)
            .bind(subject)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        self.cleanup_orphan(&mut tx, ctx, &fingerprint).await?;
        tx.commit().await.map_err(map_err)?;
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
             WHERE ctx = $1 AND subject = $2 ORDER BY version",
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
                .map(|row| row.get::<i32, _>("version"))
                .collect();
            if live.is_empty() {
                return Err(RegistryError::SubjectDeleted {
                    subject: subject.to_string(),
                });
            }
            sqlx::query("UPDATE schemas SET deleted = TRUE WHERE ctx = $1 AND subject = $2")
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
        sqlx::query("DELETE FROM schemas WHERE ctx = $1 AND subject = $2")
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
        sqlx::query("DELETE FROM configs WHERE ctx = $1 AND subject = $2")
            .bind(ctx)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        sqlx::query("DELETE FROM modes WHERE ctx = $1 AND subject = $2")
            .bind(ctx)
            .bind(subject)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i32, _>("version"))
            .collect())
    }

    async fn get_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<Option<SubjectConfig>, RegistryError> {
        let row = sqlx::query("SELECT config FROM configs WHERE ctx = $1 AND subject = $2")
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
            "INSERT INTO configs (ctx, subject, config) VALUES ($1, $2, $3)
             ON CONFLICT (ctx, subject) DO UPDATE SET config = excluded.config",
        )
        .bind(ctx)
        .bind(subject)
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(ctx)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_config(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM configs WHERE ctx = $1 AND subject = $2")
            .bind(ctx)
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_mode(&self, ctx: &str, subject: &str) -> Result<Option<Mode>, RegistryError> {
        let row = sqlx::query("SELECT mode FROM modes WHERE ctx = $1 AND subject = $2")
            .bind(ctx)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(|r| r.get::<String, _>("mode").parse()).transpose()
    }

    async fn set_mode(&self, ctx: &str, subject: &str, mode: Mode) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO modes (ctx, subject, mode) VALUES ($1, $2, $3)
             ON CONFLICT (ctx, subject) DO UPDATE SET mode = excluded.mode",
        )
        .bind(ctx)
        .bind(subject)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        sqlx::query(
            "INSERT INTO contexts (name, created_at) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(ctx)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_mode(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        sqlx::query("DELETE FROM modes WHERE ctx = $1 AND subject = $2")
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
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES ($1, 1)
             ON CONFLICT (ctx) DO NOTHING",
        )
        .bind(ctx)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        let id: i64 = sqlx::query(
            "UPDATE ctx_id_alloc SET next_id = next_id + 1
             WHERE ctx = $1 RETURNING next_id - 1 AS id",
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
            "INSERT INTO ctx_id_alloc (ctx, next_id) VALUES ($1, 1)
             ON CONFLICT (ctx) DO NOTHING",
        )
        .bind(ctx)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
        let current: i64 = sqlx::query("SELECT next_id FROM ctx_id_alloc WHERE ctx = $1")
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
        sqlx::query("UPDATE ctx_id_alloc SET next_id = $1 WHERE ctx = $2")
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
            "SELECT COALESCE(MAX(schema_id), 0) AS max_id
             FROM schema_fingerprints WHERE ctx = $1",
        )
        .bind(ctx)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(row.get("max_id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemahub_core::DEFAULT_CONTEXT;

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

    async fn connect() -> PostgresStore {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        PostgresStore::connect(&url).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn register_dedupe_and_delete_roundtrip() {
        let store = connect().await;
        let ctx = "it-roundtrip";

        let first = store
            .create_schema(ctx, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        let second = store
            .create_schema(ctx, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!((first.id, first.version), (second.id, second.version));

        store.delete_schema(ctx, "users", 1, false).await.unwrap();
        store.delete_schema(ctx, "users", 1, true).await.unwrap();
        assert!(store.list_versions(ctx, "users", true).await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn concurrent_registrations_never_share_versions() {
        let store = connect().await;
        let ctx = "it-concurrency";

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_schema(
                        ctx,
                        new_schema("contended", &format!("{{\"v\":{i}}}"), &format!("fp{i}")),
                    )
                    .await
                    .unwrap()
                    .version
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        let expected: Vec<i32> = (1..=16).collect();
        assert_eq!(versions, expected, "versions must be dense and unique");

        store.delete_subject(ctx, "contended", false).await.unwrap();
        store.delete_subject(ctx, "contended", true).await.unwrap();
    }
}
