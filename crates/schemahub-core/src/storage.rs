//! Backend-neutral storage contract.
//!
//! Implementations include `InMemoryStore`, `SqliteStore`, and
//! `PostgresStore` in `schemahub-storage`. Every operation is scoped to a
//! context; ids, subjects, configs, and modes in different contexts are
//! disjoint.

use async_trait::async_trait;

use crate::config::SubjectConfig;
use crate::error::RegistryError;
use crate::mode::Mode;
use crate::types::{NewSchema, SchemaRecord, SubjectVersion};

/// Paging and filtering parameters for `list_schemas`.
#[derive(Debug, Clone, Default)]
pub struct ListSchemasParams {
    /// Only subjects starting with this prefix.
    pub subject_prefix: Option<String>,
    pub include_deleted: bool,
    /// Only the latest version of each subject.
    pub latest_only: bool,
    pub offset: usize,
    /// Zero means no limit.
    pub limit: usize,
}

/// Durable store for schemas, configs, modes, references, and contexts.
///
/// Safe under concurrent calls from any number of tasks. All multi-step
/// writes happen inside backend transactions; a dropped (canceled) call
/// rolls back and leaves no partial state.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    // ── Writes ────────────────────────────────────────────────────────────

    /// Idempotent registration.
    ///
    /// Allocates the next version for `(ctx, subject)` and a per-context
    /// content id, deduping by fingerprint: re-submitting identical text
    /// with equal (normalized) metadata and rule set returns the existing
    /// row instead of writing a new one.
    async fn create_schema(&self, ctx: &str, new: NewSchema)
        -> Result<SchemaRecord, RegistryError>;

    /// Insert a record with a caller-chosen id (migrations).
    ///
    /// Fails with `IdConflict` if the id is already bound to a different
    /// fingerprint in this context, and with `SchemaExists` if
    /// `(ctx, subject, version)` is occupied.
    async fn import_schema(
        &self,
        ctx: &str,
        record: SchemaRecord,
    ) -> Result<SchemaRecord, RegistryError>;

    // ── Reads ─────────────────────────────────────────────────────────────

    async fn get_by_id(&self, ctx: &str, id: i64) -> Result<SchemaRecord, RegistryError>;

    /// `version == LATEST_VERSION` (-1) selects the latest non-deleted
    /// version.
    async fn get_by_subject_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<SchemaRecord, RegistryError>;

    async fn get_latest(&self, ctx: &str, subject: &str) -> Result<SchemaRecord, RegistryError>;

    /// Find a version of `subject` carrying this fingerprint.
    async fn get_by_fingerprint(
        &self,
        ctx: &str,
        subject: &str,
        fingerprint: &str,
        include_deleted: bool,
    ) -> Result<Option<SchemaRecord>, RegistryError>;

    /// Find any record carrying this fingerprint anywhere in the context.
    async fn get_by_global_fingerprint(
        &self,
        ctx: &str,
        fingerprint: &str,
    ) -> Result<Option<SchemaRecord>, RegistryError>;

    async fn schemas_by_subject(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>, RegistryError>;

    /// Subjects with at least one version carrying the schema id.
    async fn subjects_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError>;

    /// `(subject, version)` pairs carrying the schema id.
    async fn versions_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<SubjectVersion>, RegistryError>;

    /// Global ids of schemas that reference `(ctx, subject, version)`.
    async fn referenced_by(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<Vec<i64>, RegistryError>;

    async fn list_subjects(
        &self,
        ctx: &str,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError>;

    async fn list_versions(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<i32>, RegistryError>;

    async fn list_schemas(
        &self,
        ctx: &str,
        params: &ListSchemasParams,
    ) -> Result<Vec<SchemaRecord>, RegistryError>;

    /// Every context that has ever been written to, sorted.
    async fn list_contexts(&self) -> Result<Vec<String>, RegistryError>;

    // ── Deletes ───────────────────────────────────────────────────────────

    /// Soft delete flips the deleted flag (idempotent on already-soft rows);
    /// permanent delete requires a prior soft state and removes the row,
    /// cleaning up the fingerprint→id mapping and references when the last
    /// row for the fingerprint goes away.
    async fn delete_schema(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError>;

    /// Soft-deletes every live version, or hard-deletes all versions once
    /// every one of them is already soft-deleted. Returns affected versions.
    async fn delete_subject(
        &self,
        ctx: &str,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError>;

    // ── Config ────────────────────────────────────────────────────────────

    async fn get_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<Option<SubjectConfig>, RegistryError>;

    async fn set_config(
        &self,
        ctx: &str,
        subject: &str,
        config: SubjectConfig,
    ) -> Result<(), RegistryError>;

    async fn delete_config(&self, ctx: &str, subject: &str) -> Result<(), RegistryError>;

    // ── Mode ──────────────────────────────────────────────────────────────

    async fn get_mode(&self, ctx: &str, subject: &str) -> Result<Option<Mode>, RegistryError>;

    async fn set_mode(&self, ctx: &str, subject: &str, mode: Mode) -> Result<(), RegistryError>;

    async fn delete_mode(&self, ctx: &str, subject: &str) -> Result<(), RegistryError>;

    // ── Id allocator ──────────────────────────────────────────────────────

    /// Claim and return the next unused schema id for the context.
    async fn next_id(&self, ctx: &str) -> Result<i64, RegistryError>;

    /// Move the allocator forward (import support). Fails if `id` is not
    /// beyond the highest allocated id.
    async fn set_next_id(&self, ctx: &str, id: i64) -> Result<(), RegistryError>;

    /// Highest schema id currently in use in the context (0 when empty).
    async fn max_schema_id(&self, ctx: &str) -> Result<i64, RegistryError>;
}
