//! In-memory storage backend.
//!
//! Keeps every context's schemas, configs, and modes in RAM behind one
//! mutex. Useful for tests and short-lived embedded registries; all data is
//! lost when the process exits.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use schemahub_core::{
    ListSchemasParams, Metadata, Mode, NewSchema, RegistryError, RuleSet, SchemaRecord,
    SchemaStore, SubjectConfig, SubjectVersion, LATEST_VERSION,
};

/// In-memory schema store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<BTreeMap<String, ContextState>>,
}

#[derive(Default)]
struct ContextState {
    /// All version rows, live and soft-deleted.
    schemas: Vec<SchemaRecord>,
    /// fingerprint → schema id.
    fingerprints: HashMap<String, i64>,
    /// Next id to hand out; 0 means "not yet initialized".
    next_id: i64,
    configs: HashMap<String, SubjectConfig>,
    modes: HashMap<String, Mode>,
}

impl ContextState {
    fn alloc_id(&mut self) -> i64 {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn max_version(&self, subject: &str) -> i32 {
        self.schemas
            .iter()
            .filter(|r| r.subject == subject)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
    }

    fn latest_live(&self, subject: &str) -> Option<&SchemaRecord> {
        self.schemas
            .iter()
            .filter(|r| r.subject == subject && !r.deleted)
            .max_by_key(|r| r.version)
    }

    fn has_subject(&self, subject: &str) -> bool {
        self.schemas.iter().any(|r| r.subject == subject)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Resolve `-1` to the latest live version; error taxonomy as for
    /// direct version reads.
    fn resolve_version(
        ctx_state: &ContextState,
        subject: &str,
        version: i32,
    ) -> Result<i32, RegistryError> {
        if version == LATEST_VERSION {
            return match ctx_state.latest_live(subject) {
                Some(record) => Ok(record.version),
                None if ctx_state.has_subject(subject) => Err(RegistryError::SubjectDeleted {
                    subject: subject.to_string(),
                }),
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
}

#[async_trait]
impl SchemaStore for InMemoryStore {
    async fn create_schema(
        &self,
        ctx: &str,
        new: NewSchema,
    ) -> Result<SchemaRecord, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(ctx.to_string()).or_default();

        // Version max is computed before the dedup scan, mirroring the SQL
        // backends' snapshot ordering.
        let next_version = state.max_version(&new.subject) + 1;

        let mut existing_deleted = false;
        for record in state
            .schemas
            .iter()
            .filter(|r| r.subject == new.subject && r.fingerprint == new.fingerprint)
        {
            if record.deleted {
                existing_deleted = true;
                continue;
            }
            if Metadata::normalized(record.metadata.as_ref())
                == Metadata::normalized(new.metadata.as_ref())
                && RuleSet::normalized(record.rule_set.as_ref())
                    == RuleSet::normalized(new.rule_set.as_ref())
            {
                // Full idempotent hit.
                return Ok(record.clone());
            }
        }
        if existing_deleted {
            state
                .schemas
                .retain(|r| !(r.subject == new.subject && r.fingerprint == new.fingerprint && r.deleted));
        }

        let id = match state.fingerprints.get(&new.fingerprint) {
            Some(id) => *id,
            None => {
                let id = state.alloc_id();
                state.fingerprints.insert(new.fingerprint.clone(), id);
                id
            }
        };

        let record = SchemaRecord {
            context: ctx.to_string(),
            subject: new.subject,
            version: next_version,
            id,
            format: new.format,
            schema: new.schema,
            fingerprint: new.fingerprint,
            references: new.references,
            metadata: new.metadata,
            rule_set: new.rule_set,
            deleted: false,
            created_at: Self::now_millis(),
        };
        state.schemas.push(record.clone());
        Ok(record)
    }

    async fn import_schema(
        &self,
        ctx: &str,
        record: SchemaRecord,
    ) -> Result<SchemaRecord, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(ctx.to_string()).or_default();

        if let Some(existing) = state.fingerprints.get(&record.fingerprint) {
            if *existing != record.id {
                return Err(RegistryError::IdConflict { id: record.id });
            }
        }
        if state
            .fingerprints
            .iter()
            .any(|(fp, id)| *id == record.id && *fp != record.fingerprint)
        {
            return Err(RegistryError::IdConflict { id: record.id });
        }
        if state
            .schemas
            .iter()
            .any(|r| r.subject == record.subject && r.version == record.version)
        {
            return Err(RegistryError::SchemaExists {
                subject: record.subject.clone(),
                id: record.id,
                version: record.version,
            });
        }

        state
            .fingerprints
            .insert(record.fingerprint.clone(), record.id);
        if state.next_id <= record.id {
            state.next_id = record.id + 1;
        }
        let mut stored = record;
        stored.context = ctx.to_string();
        stored.created_at = Self::now_millis();
        state.schemas.push(stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, ctx: &str, id: i64) -> Result<SchemaRecord, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let state = inner
            .get(ctx)
            .ok_or(RegistryError::SchemaNotFound { id })?;
        state
            .schemas
            .iter()
            .filter(|r| r.id == id)
            // Prefer a live row; fall back to soft-deleted content.
            .min_by_key(|r| (r.deleted, r.subject.clone(), r.version))
            .cloned()
            .ok_or(RegistryError::SchemaNotFound { id })
    }

    async fn get_by_subject_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<SchemaRecord, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let state = inner.get(ctx).ok_or_else(|| RegistryError::SubjectNotFound {
            subject: subject.to_string(),
        })?;
        let version = Self::resolve_version(state, subject, version)?;
        match state
            .schemas
            .iter()
            .find(|r| r.subject == subject && r.version == version)
        {
            Some(record) if !record.deleted => Ok(record.clone()),
            Some(_) => Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
            None if state.has_subject(subject) => Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version,
            }),
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
        let inner = self.inner.lock().unwrap();
        Ok(inner.get(ctx).and_then(|state| {
            state
                .schemas
                .iter()
                .filter(|r| {
                    r.subject == subject
                        && r.fingerprint == fingerprint
                        && (include_deleted || !r.deleted)
                })
                .max_by_key(|r| r.version)
                .cloned()
        }))
    }

    async fn get_by_global_fingerprint(
        &self,
        ctx: &str,
        fingerprint: &str,
    ) -> Result<Option<SchemaRecord>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.get(ctx).and_then(|state| {
            state
                .schemas
                .iter()
                .filter(|r| r.fingerprint == fingerprint && !r.deleted)
                .max_by_key(|r| r.version)
                .cloned()
        }))
    }

    async fn schemas_by_subject(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<SchemaRecord>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<SchemaRecord> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| r.subject == subject && (include_deleted || !r.deleted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.version);
        Ok(records)
    }

    async fn subjects_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let mut subjects: Vec<String> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| r.id == id && (include_deleted || !r.deleted))
                    .map(|r| r.subject.clone())
                    .collect()
            })
            .unwrap_or_default();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn versions_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<SubjectVersion>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let mut versions: Vec<SubjectVersion> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| r.id == id && (include_deleted || !r.deleted))
                    .map(|r| SubjectVersion {
                        subject: r.subject.clone(),
                        version: r.version,
                    })
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by(|a, b| (&a.subject, a.version).cmp(&(&b.subject, b.version)));
        Ok(versions)
    }

    async fn referenced_by(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<Vec<i64>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<i64> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| {
                        !r.deleted
                            && r.references
                                .iter()
                                .any(|reference| {
                                    reference.subject == subject && reference.version == version
                                })
                    })
                    .map(|r| r.id)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn list_subjects(
        &self,
        ctx: &str,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let mut subjects: Vec<String> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| include_deleted || !r.deleted)
                    .map(|r| r.subject.clone())
                    .collect()
            })
            .unwrap_or_default();
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    async fn list_versions(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let records = self.schemas_by_subject(ctx, subject, true).await?;
        if records.is_empty() {
            return Err(RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            });
        }
        let versions: Vec<i32> = records
            .iter()
            .filter(|r| include_deleted || !r.deleted)
            .map(|r| r.version)
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
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<SchemaRecord> = inner
            .get(ctx)
            .map(|state| {
                state
                    .schemas
                    .iter()
                    .filter(|r| params.include_deleted || !r.deleted)
                    .filter(|r| {
                        params
                            .subject_prefix
                            .as_deref()
                            .map(|p| r.subject.starts_with(p))
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| (&a.subject, a.version).cmp(&(&b.subject, b.version)));
        if params.latest_only {
            let mut latest: BTreeMap<String, SchemaRecord> = BTreeMap::new();
            for record in records {
                latest.insert(record.subject.clone(), record);
            }
            records = latest.into_values().collect();
        }
        let records: Vec<SchemaRecord> = records
            .into_iter()
            .skip(params.offset)
            .take(if params.limit == 0 {
                usize::MAX
            } else {
                params.limit
            })
            .collect();
        Ok(records)
    }

    async fn list_contexts(&self) -> Result<Vec<String>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.keys().cloned().collect())
    }

    async fn delete_schema(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.get_mut(ctx).ok_or_else(|| RegistryError::SubjectNotFound {
            subject: subject.to_string(),
        })?;
        let version = Self::resolve_version(state, subject, version)?;
        let position = state
            .schemas
            .iter()
            .position(|r| r.subject == subject && r.version == version)
            .ok_or_else(|| {
                if state.has_subject(subject) {
                    RegistryError::VersionNotFound {
                        subject: subject.to_string(),
                        version,
                    }
                } else {
                    RegistryError::SubjectNotFound {
                        subject: subject.to_string(),
                    }
                }
            })?;

        if !permanent {
            // Idempotent on already-soft rows.
            state.schemas[position].deleted = true;
            return Ok(version);
        }

        if !state.schemas[position].deleted {
            return Err(RegistryError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            });
        }
        let removed = state.schemas.remove(position);
        let orphaned = !state
            .schemas
            .iter()
            .any(|r| r.fingerprint == removed.fingerprint);
        if orphaned {
            state.fingerprints.remove(&removed.fingerprint);
        }
        Ok(version)
    }

    async fn delete_subject(
        &self,
        ctx: &str,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.get_mut(ctx).ok_or_else(|| RegistryError::SubjectNotFound {
            subject: subject.to_string(),
        })?;
        if !state.has_subject(subject) {
            return Err(RegistryError::SubjectNotFound {
                subject: subject.to_string(),
            });
        }

        if !permanent {
            let mut versions = Vec::new();
            for record in state
                .schemas
                .iter_mut()
                .filter(|r| r.subject == subject && !r.deleted)
            {
                record.deleted = true;
                versions.push(record.version);
            }
            if versions.is_empty() {
                return Err(RegistryError::SubjectDeleted {
                    subject: subject.to_string(),
                });
            }
            versions.sort_unstable();
            return Ok(versions);
        }

        if state
            .schemas
            .iter()
            .any(|r| r.subject == subject && !r.deleted)
        {
            return Err(RegistryError::SubjectNotSoftDeleted {
                subject: subject.to_string(),
            });
        }
        let removed: Vec<SchemaRecord> = state
            .schemas
            .iter()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect();
        state.schemas.retain(|r| r.subject != subject);
        for record in &removed {
            let orphaned = !state
                .schemas
                .iter()
                .any(|r| r.fingerprint == record.fingerprint);
            if orphaned {
                state.fingerprints.remove(&record.fingerprint);
            }
        }
        state.configs.remove(subject);
        state.modes.remove(subject);
        let mut versions: Vec<i32> = removed.iter().map(|r| r.version).collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn get_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<Option<SubjectConfig>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(ctx)
            .and_then(|state| state.configs.get(subject).cloned()))
    }

    async fn set_config(
        &self,
        ctx: &str,
        subject: &str,
        config: SubjectConfig,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(ctx.to_string())
            .or_default()
            .configs
            .insert(subject.to_string(), config);
        Ok(())
    }

    async fn delete_config(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.get_mut(ctx) {
            state.configs.remove(subject);
        }
        Ok(())
    }

    async fn get_mode(&self, ctx: &str, subject: &str) -> Result<Option<Mode>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(ctx)
            .and_then(|state| state.modes.get(subject).copied()))
    }

    async fn set_mode(&self, ctx: &str, subject: &str, mode: Mode) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(ctx.to_string())
            .or_default()
            .modes
            .insert(subject.to_string(), mode);
        Ok(())
    }

    async fn delete_mode(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.get_mut(ctx) {
            state.modes.remove(subject);
        }
        Ok(())
    }

    async fn next_id(&self, ctx: &str) -> Result<i64, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.entry(ctx.to_string()).or_default().alloc_id())
    }

    async fn set_next_id(&self, ctx: &str, id: i64) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(ctx.to_string()).or_default();
        if id < state.next_id {
            return Err(RegistryError::Storage(format!(
                "next id {id} is behind the allocator (at {})",
                state.next_id
            )));
        }
        state.next_id = id;
        Ok(())
    }

    async fn max_schema_id(&self, ctx: &str) -> Result<i64, RegistryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(ctx)
            .and_then(|state| state.fingerprints.values().max().copied())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemahub_core::{SchemaFormat, SchemaReference, DEFAULT_CONTEXT};

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
    async fn versions_are_dense_per_subject() {
        let store = InMemoryStore::new();
        for (i, fp) in ["fp1", "fp2", "fp3"].into_iter().enumerate() {
            let record = store
                .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", fp))
                .await
                .unwrap();
            assert_eq!(record.version, i as i32 + 1);
        }
        let versions = store
            .list_versions(DEFAULT_CONTEXT, "users", false)
            .await
            .unwrap();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn identical_content_dedupes_to_same_id_and_version() {
        let store = InMemoryStore::new();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.version, second.version);
        assert_eq!(
            store
                .list_versions(DEFAULT_CONTEXT, "users", false)
                .await
                .unwrap(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn same_content_across_subjects_shares_id() {
        let store = InMemoryStore::new();
        let a = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{}", "fp1"))
            .await
            .unwrap();
        let b = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-key", "{}", "fp1"))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 1);

        let subjects = store
            .subjects_by_id(DEFAULT_CONTEXT, a.id, false)
            .await
            .unwrap();
        assert_eq!(subjects, vec!["users-key", "users-value"]);
    }

    #[tokio::test]
    async fn differing_metadata_creates_a_new_version_with_same_id() {
        let store = InMemoryStore::new();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        let mut with_meta = new_schema("users", "{}", "fp1");
        let mut metadata = Metadata::default();
        metadata.properties.insert("owner".into(), "core".into());
        with_meta.metadata = Some(metadata);
        let second = store
            .create_schema(DEFAULT_CONTEXT, with_meta)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn contexts_are_isolated() {
        let store = InMemoryStore::new();
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

        // Each context resolves its own row.
        assert_eq!(
            store.get_by_id(DEFAULT_CONTEXT, 1).await.unwrap().context,
            DEFAULT_CONTEXT
        );
        assert_eq!(store.get_by_id("dev", 1).await.unwrap().context, "dev");
        assert!(store.get_by_id("prod", 1).await.is_err());

        let contexts = store.list_contexts().await.unwrap();
        assert_eq!(contexts, vec![DEFAULT_CONTEXT.to_string(), "dev".to_string()]);
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent_and_gates_permanent() {
        let store = InMemoryStore::new();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();

        // Permanent delete before soft delete is refused.
        let err = store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::VersionNotSoftDeleted { .. }));

        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();
        // Idempotent re-soft-delete.
        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, false)
            .await
            .unwrap();

        store
            .delete_schema(DEFAULT_CONTEXT, "users", 1, true)
            .await
            .unwrap();
        assert!(store
            .list_versions(DEFAULT_CONTEXT, "users", true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reregistering_after_soft_delete_reuses_the_id() {
        let store = InMemoryStore::new();
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
        // The soft-deleted row was replaced, not stacked.
        assert_eq!(
            store
                .list_versions(DEFAULT_CONTEXT, "users", true)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn permanent_delete_of_last_row_cleans_the_fingerprint() {
        let store = InMemoryStore::new();
        let first = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
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

        // Mapping is gone: the same content now gets a fresh id.
        let second = store
            .create_schema(DEFAULT_CONTEXT, new_schema("users", "{}", "fp1"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn delete_subject_soft_then_hard() {
        let store = InMemoryStore::new();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("orders", "{}", "fp1"))
            .await
            .unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("orders", "{}", "fp2"))
            .await
            .unwrap();

        let err = store
            .delete_subject(DEFAULT_CONTEXT, "orders", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SubjectNotSoftDeleted { .. }));

        let versions = store
            .delete_subject(DEFAULT_CONTEXT, "orders", false)
            .await
            .unwrap();
        assert_eq!(versions, vec![1, 2]);
        assert!(!store
            .list_subjects(DEFAULT_CONTEXT, false)
            .await
            .unwrap()
            .contains(&"orders".to_string()));
        assert!(store
            .list_subjects(DEFAULT_CONTEXT, true)
            .await
            .unwrap()
            .contains(&"orders".to_string()));

        let versions = store
            .delete_subject(DEFAULT_CONTEXT, "orders", true)
            .await
            .unwrap();
        assert_eq!(versions, vec![1, 2]);
        assert!(store
            .list_subjects(DEFAULT_CONTEXT, true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn import_rejects_id_conflicts_and_occupied_slots() {
        let store = InMemoryStore::new();
        let record = SchemaRecord {
            context: DEFAULT_CONTEXT.to_string(),
            subject: "users".into(),
            version: 3,
            id: 100,
            format: SchemaFormat::Avro,
            schema: "{}".into(),
            fingerprint: "fp1".into(),
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

        // Same id, different content.
        let mut conflicting = record.clone();
        conflicting.version = 4;
        conflicting.fingerprint = "fp-other".into();
        assert!(matches!(
            store.import_schema(DEFAULT_CONTEXT, conflicting).await,
            Err(RegistryError::IdConflict { .. })
        ));

        // Occupied (subject, version).
        let mut occupied = record.clone();
        occupied.id = 101;
        occupied.fingerprint = "fp2".into();
        assert!(matches!(
            store.import_schema(DEFAULT_CONTEXT, occupied).await,
            Err(RegistryError::SchemaExists { .. })
        ));

        // The allocator moved past the imported id.
        let next = store.next_id(DEFAULT_CONTEXT).await.unwrap();
        assert!(next > 100);
    }

    #[tokio::test]
    async fn referenced_by_lists_referring_ids() {
        let store = InMemoryStore::new();
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

        let ids = store
            .referenced_by(DEFAULT_CONTEXT, "address", 1)
            .await
            .unwrap();
        assert_eq!(ids, vec![customer.id]);
        assert!(store
            .referenced_by(DEFAULT_CONTEXT, "address", 2)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn config_and_mode_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store
            .get_config(DEFAULT_CONTEXT, "")
            .await
            .unwrap()
            .is_none());

        let config = SubjectConfig {
            compatibility_level: Some(schemahub_core::CompatibilityLevel::Full),
            ..SubjectConfig::default()
        };
        store
            .set_config(DEFAULT_CONTEXT, "", config.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get_config(DEFAULT_CONTEXT, "").await.unwrap(),
            Some(config)
        );
        store.delete_config(DEFAULT_CONTEXT, "").await.unwrap();
        assert!(store
            .get_config(DEFAULT_CONTEXT, "")
            .await
            .unwrap()
            .is_none());

        store
            .set_mode(DEFAULT_CONTEXT, "users", Mode::Import)
            .await
            .unwrap();
        assert_eq!(
            store.get_mode(DEFAULT_CONTEXT, "users").await.unwrap(),
            Some(Mode::Import)
        );
        store.delete_mode(DEFAULT_CONTEXT, "users").await.unwrap();
        assert!(store
            .get_mode(DEFAULT_CONTEXT, "users")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_schemas_supports_prefix_latest_and_paging() {
        let store = InMemoryStore::new();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{}", "fp1"))
            .await
            .unwrap();
        store
            .create_schema(DEFAULT_CONTEXT, new_schema("users-value", "{}", "fp2"))
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

        let users_latest = store
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
        assert_eq!(users_latest.len(), 1);
        assert_eq!(users_latest[0].version, 2);

        let paged = store
            .list_schemas(
                DEFAULT_CONTEXT,
                &ListSchemasParams {
                    offset: 1,
                    limit: 1,
                    ..ListSchemasParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }
}
