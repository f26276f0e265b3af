//! The orchestrator front: mode enforcement, parsing, normalization, and
//! compatibility policy around a `SchemaStore`.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use schemahub_avro::AvroHandler;
use schemahub_core::{
    CompatibilityLevel, FormatRegistry, ListSchemasParams, Mode, NewSchema, ReferenceMap,
    RegistryError, SchemaFormat, SchemaHandler, SchemaRecord, SchemaReference, SchemaStore,
    SubjectConfig, SubjectVersion, GLOBAL_SUBJECT,
};
use schemahub_json::JsonSchemaHandler;
use schemahub_protobuf::ProtobufHandler;

use crate::request::{CompatibilityResult, RegisterRequest, RegisterResponse};

/// The registry core consumed by external collaborators.
pub struct Registry {
    store: Arc<dyn SchemaStore>,
    formats: FormatRegistry,
}

impl Registry {
    /// Build a registry over `store` with the three standard format
    /// handlers installed.
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        let mut formats = FormatRegistry::new();
        formats.insert(Arc::new(AvroHandler::new()));
        formats.insert(Arc::new(ProtobufHandler::new()));
        formats.insert(Arc::new(JsonSchemaHandler::new()));
        Self { store, formats }
    }

    /// Build with a custom handler set.
    pub fn with_formats(store: Arc<dyn SchemaStore>, formats: FormatRegistry) -> Self {
        Self { store, formats }
    }

    pub fn store(&self) -> &Arc<dyn SchemaStore> {
        &self.store
    }

    /// The format vocabulary advertised by `GET /schemas/types`.
    pub fn schema_types() -> Vec<&'static str> {
        SchemaFormat::all().iter().map(|f| f.as_str()).collect()
    }

    // ── Resolution helpers ────────────────────────────────────────────────

    /// Subject mode, falling back to the context-global mode, then
    /// READWRITE.
    pub async fn effective_mode(&self, ctx: &str, subject: &str) -> Result<Mode, RegistryError> {
        if let Some(mode) = self.store.get_mode(ctx, subject).await? {
            return Ok(mode);
        }
        if let Some(mode) = self.store.get_mode(ctx, GLOBAL_SUBJECT).await? {
            return Ok(mode);
        }
        Ok(Mode::default())
    }

    /// Compatibility level and normalize flag, subject config overriding
    /// the context-global one, defaulting to BACKWARD / no normalization.
    pub async fn effective_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<(CompatibilityLevel, bool), RegistryError> {
        let subject_config = self.store.get_config(ctx, subject).await?;
        let global_config = self.store.get_config(ctx, GLOBAL_SUBJECT).await?;
        let level = subject_config
            .as_ref()
            .and_then(|c| c.compatibility_level)
            .or_else(|| global_config.as_ref().and_then(|c| c.compatibility_level))
            .unwrap_or_default();
        let normalize = subject_config
            .as_ref()
            .and_then(|c| c.normalize)
            .or_else(|| global_config.as_ref().and_then(|c| c.normalize))
            .unwrap_or(false);
        Ok((level, normalize))
    }

    /// Resolve declared references (transitively) into `name → text`.
    /// Every reference must point at a live version in this context.
    async fn resolve_references(
        &self,
        ctx: &str,
        references: &[SchemaReference],
    ) -> Result<ReferenceMap, RegistryError> {
        let mut map = ReferenceMap::new();
        let mut queue: VecDeque<SchemaReference> = references.iter().cloned().collect();
        let mut seen = HashSet::new();
        while let Some(reference) = queue.pop_front() {
            if !seen.insert(reference.name.clone()) {
                continue;
            }
            let record = self
                .store
                .get_by_subject_version(ctx, &reference.subject, reference.version)
                .await
                .map_err(|_| RegistryError::InvalidReference {
                    name: reference.name.clone(),
                    subject: reference.subject.clone(),
                    version: reference.version,
                })?;
            map.insert(reference.name.clone(), record.schema.clone());
            queue.extend(record.references.iter().cloned());
        }
        Ok(map)
    }

    /// Prior versions the policy requires checking against.
    async fn versions_for_policy(
        &self,
        ctx: &str,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Result<Vec<SchemaRecord>, RegistryError> {
        if level.is_transitive() {
            return self.store.schemas_by_subject(ctx, subject, false).await;
        }
        match self.store.get_latest(ctx, subject).await {
            Ok(record) => Ok(vec![record]),
            Err(RegistryError::SubjectNotFound { .. })
            | Err(RegistryError::SubjectDeleted { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn run_checks(
        &self,
        ctx: &str,
        level: CompatibilityLevel,
        handler: &dyn SchemaHandler,
        new_schema: &str,
        new_refs: &ReferenceMap,
        priors: &[SchemaRecord],
    ) -> Result<Vec<String>, RegistryError> {
        let mut messages = Vec::new();
        for prior in priors {
            let prior_refs = self.resolve_references(ctx, &prior.references).await?;
            if level.checks_backward() {
                let report = handler.check(new_schema, new_refs, &prior.schema, &prior_refs);
                messages.extend(report.messages);
            }
            if level.checks_forward() {
                let report = handler.check(&prior.schema, &prior_refs, new_schema, new_refs);
                messages.extend(report.messages);
            }
        }
        Ok(messages)
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Register a schema version: enforce mode, parse, normalize if the
    /// config says so, run the compatibility policy, then store.
    pub async fn register(
        &self,
        ctx: &str,
        subject: &str,
        req: RegisterRequest,
    ) -> Result<RegisterResponse, RegistryError> {
        let mode = self.effective_mode(ctx, subject).await?;
        if mode == Mode::ReadOnly {
            return Err(RegistryError::ReadOnlyMode {
                subject: subject.to_string(),
            });
        }
        let handler = self.formats.get(req.format())?.clone();
        let references = self.resolve_references(ctx, &req.references).await?;
        handler.validate(&req.schema, &references)?;

        let (level, config_normalize) = self.effective_config(ctx, subject).await?;
        let normalize = req.normalize.unwrap_or(config_normalize);
        let schema_text = if normalize {
            handler.normalize(&req.schema, &references)?
        } else {
            req.schema.clone()
        };

        // IMPORT mode registrations skip the policy entirely.
        if mode != Mode::Import && level != CompatibilityLevel::None {
            let priors = self.versions_for_policy(ctx, subject, level).await?;
            let messages = self
                .run_checks(ctx, level, handler.as_ref(), &schema_text, &references, &priors)
                .await?;
            if !messages.is_empty() {
                debug!(ctx, subject, ?level, "registration rejected as incompatible");
                return Err(RegistryError::Incompatible { messages });
            }
        }

        let fingerprint = handler.fingerprint(&schema_text, &references)?;
        let record = self
            .store
            .create_schema(
                ctx,
                NewSchema {
                    subject: subject.to_string(),
                    format: req.format(),
                    schema: schema_text,
                    fingerprint,
                    references: req.references,
                    metadata: req.metadata,
                    rule_set: req.rule_set,
                },
            )
            .await?;
        info!(ctx, subject, id = record.id, version = record.version, "schema registered");
        Ok(RegisterResponse {
            id: record.id,
            version: record.version,
        })
    }

    /// `POST /subjects/{subject}` — find the version carrying this exact
    /// schema content, without writing.
    pub async fn lookup(
        &self,
        ctx: &str,
        subject: &str,
        req: &RegisterRequest,
        include_deleted: bool,
    ) -> Result<SchemaRecord, RegistryError> {
        let handler = self.formats.get(req.format())?;
        let references = self.resolve_references(ctx, &req.references).await?;
        let fingerprint = handler.fingerprint(&req.schema, &references)?;
        match self
            .store
            .get_by_fingerprint(ctx, subject, &fingerprint, include_deleted)
            .await?
        {
            Some(record) => Ok(record),
            None => Err(RegistryError::SchemaContentNotFound {
                subject: subject.to_string(),
            }),
        }
    }

    /// Same compatibility logic as registration, without writing.
    /// `version: None` checks against every version the policy selects.
    pub async fn test_compatibility(
        &self,
        ctx: &str,
        subject: &str,
        version: Option<i32>,
        req: &RegisterRequest,
    ) -> Result<CompatibilityResult, RegistryError> {
        let handler = self.formats.get(req.format())?.clone();
        let references = self.resolve_references(ctx, &req.references).await?;
        if let Err(e) = handler.validate(&req.schema, &references) {
            return Ok(CompatibilityResult {
                is_compatible: false,
                messages: vec![format!("failed to parse new schema: {e}")],
            });
        }
        let (level, _) = self.effective_config(ctx, subject).await?;
        if level == CompatibilityLevel::None {
            return Ok(CompatibilityResult {
                is_compatible: true,
                messages: Vec::new(),
            });
        }
        let priors = match version {
            Some(v) => vec![self.store.get_by_subject_version(ctx, subject, v).await?],
            None => self.versions_for_policy(ctx, subject, level).await?,
        };
        let messages = self
            .run_checks(ctx, level, handler.as_ref(), &req.schema, &references, &priors)
            .await?;
        Ok(CompatibilityResult {
            is_compatible: messages.is_empty(),
            messages,
        })
    }

    /// Insert a record with a caller-chosen id; requires IMPORT mode. The
    /// fingerprint is recomputed from the submitted text, never trusted.
    pub async fn import(
        &self,
        ctx: &str,
        mut record: SchemaRecord,
    ) -> Result<SchemaRecord, RegistryError> {
        let mode = self.effective_mode(ctx, &record.subject).await?;
        if mode != Mode::Import {
            return Err(RegistryError::NotInImportMode {
                subject: record.subject.clone(),
            });
        }
        let handler = self.formats.get(record.format)?;
        let references = self.resolve_references(ctx, &record.references).await?;
        handler.validate(&record.schema, &references)?;
        record.fingerprint = handler.fingerprint(&record.schema, &references)?;
        self.store.import_schema(ctx, record).await
    }

    pub async fn delete_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError> {
        if self.effective_mode(ctx, subject).await? == Mode::ReadOnly {
            return Err(RegistryError::ReadOnlyMode {
                subject: subject.to_string(),
            });
        }
        self.store
            .delete_schema(ctx, subject, version, permanent)
            .await
    }

    pub async fn delete_subject(
        &self,
        ctx: &str,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        if self.effective_mode(ctx, subject).await? == Mode::ReadOnly {
            return Err(RegistryError::ReadOnlyMode {
                subject: subject.to_string(),
            });
        }
        self.store.delete_subject(ctx, subject, permanent).await
    }

    // ── Reads (straight delegation) ───────────────────────────────────────

    pub async fn get_by_id(&self, ctx: &str, id: i64) -> Result<SchemaRecord, RegistryError> {
        self.store.get_by_id(ctx, id).await
    }

    pub async fn get_version(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<SchemaRecord, RegistryError> {
        self.store.get_by_subject_version(ctx, subject, version).await
    }

    pub async fn list_subjects(
        &self,
        ctx: &str,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        self.store.list_subjects(ctx, include_deleted).await
    }

    pub async fn list_versions(
        &self,
        ctx: &str,
        subject: &str,
        include_deleted: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        self.store.list_versions(ctx, subject, include_deleted).await
    }

    pub async fn subjects_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<String>, RegistryError> {
        self.store.subjects_by_id(ctx, id, include_deleted).await
    }

    pub async fn versions_by_id(
        &self,
        ctx: &str,
        id: i64,
        include_deleted: bool,
    ) -> Result<Vec<SubjectVersion>, RegistryError> {
        self.store.versions_by_id(ctx, id, include_deleted).await
    }

    pub async fn referenced_by(
        &self,
        ctx: &str,
        subject: &str,
        version: i32,
    ) -> Result<Vec<i64>, RegistryError> {
        self.store.referenced_by(ctx, subject, version).await
    }

    pub async fn list_schemas(
        &self,
        ctx: &str,
        params: &ListSchemasParams,
    ) -> Result<Vec<SchemaRecord>, RegistryError> {
        self.store.list_schemas(ctx, params).await
    }

    pub async fn list_contexts(&self) -> Result<Vec<String>, RegistryError> {
        self.store.list_contexts().await
    }

    // ── Config / mode control ─────────────────────────────────────────────

    pub async fn get_config(
        &self,
        ctx: &str,
        subject: &str,
    ) -> Result<Option<SubjectConfig>, RegistryError> {
        self.store.get_config(ctx, subject).await
    }

    pub async fn set_config(
        &self,
        ctx: &str,
        subject: &str,
        config: SubjectConfig,
    ) -> Result<(), RegistryError> {
        self.store.set_config(ctx, subject, config).await
    }

    pub async fn delete_config(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        self.store.delete_config(ctx, subject).await
    }

    pub async fn get_mode(&self, ctx: &str, subject: &str) -> Result<Option<Mode>, RegistryError> {
        self.store.get_mode(ctx, subject).await
    }

    pub async fn set_mode(&self, ctx: &str, subject: &str, mode: Mode) -> Result<(), RegistryError> {
        self.store.set_mode(ctx, subject, mode).await
    }

    pub async fn delete_mode(&self, ctx: &str, subject: &str) -> Result<(), RegistryError> {
        self.store.delete_mode(ctx, subject).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemahub_core::DEFAULT_CONTEXT;
    use schemahub_storage::InMemoryStore;

    fn registry() -> Registry {
        Registry::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn schema_types_vocabulary() {
        assert_eq!(Registry::schema_types(), vec!["AVRO", "PROTOBUF", "JSON"]);
    }

    #[tokio::test]
    async fn mode_resolution_falls_back_to_global_then_default() {
        let registry = registry();
        assert_eq!(
            registry
                .effective_mode(DEFAULT_CONTEXT, "users")
                .await
                .unwrap(),
            Mode::ReadWrite
        );
        registry
            .set_mode(DEFAULT_CONTEXT, GLOBAL_SUBJECT, Mode::ReadOnly)
            .await
            .unwrap();
        assert_eq!(
            registry
                .effective_mode(DEFAULT_CONTEXT, "users")
                .await
                .unwrap(),
            Mode::ReadOnly
        );
        registry
            .set_mode(DEFAULT_CONTEXT, "users", Mode::Import)
            .await
            .unwrap();
        assert_eq!(
            registry
                .effective_mode(DEFAULT_CONTEXT, "users")
                .await
                .unwrap(),
            Mode::Import
        );
    }

    #[tokio::test]
    async fn config_resolution_subject_overrides_global() {
        let registry = registry();
        let (level, normalize) = registry
            .effective_config(DEFAULT_CONTEXT, "users")
            .await
            .unwrap();
        assert_eq!(level, CompatibilityLevel::Backward);
        assert!(!normalize);

        registry
            .set_config(
                DEFAULT_CONTEXT,
                GLOBAL_SUBJECT,
                SubjectConfig {
                    compatibility_level: Some(CompatibilityLevel::Full),
                    normalize: Some(true),
                    ..SubjectConfig::default()
                },
            )
            .await
            .unwrap();
        registry
            .set_config(
                DEFAULT_CONTEXT,
                "users",
                SubjectConfig {
                    compatibility_level: Some(CompatibilityLevel::None),
                    ..SubjectConfig::default()
                },
            )
            .await
            .unwrap();
        let (level, normalize) = registry
            .effective_config(DEFAULT_CONTEXT, "users")
            .await
            .unwrap();
        assert_eq!(level, CompatibilityLevel::None);
        // Normalize not set on the subject, inherited from global.
        assert!(normalize);
    }
}
