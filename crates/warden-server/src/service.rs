use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use warden_core::cache::{CacheConfig, CacheKey, CacheStats, ResultCache};
use warden_core::engine::{CheckEngine, CheckError, CheckRequest, CheckResult, EngineConfig};
use warden_core::schema::{ActiveSchema, LoadOutcome, SchemaLimits, SchemaRegistry};
use warden_core::tuple::{ObjectRef, SubjectRef, Tuple, TupleFilter, is_valid_name};
use warden_storage::keys::{decode_cursor, encode_cursor};
use warden_storage::traits::clamp_limit;
use warden_storage::{
    MAX_PAGE_SIZE, Page, RelationshipStore, SchemaStore, TuplePage, WriteSummary,
};

use crate::adapter::StoreTupleReader;
use crate::error::ApiError;
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct CheckInput {
    pub subject: SubjectRef,
    pub permission: String,
    pub object: ObjectRef,
    pub timeout: Option<Duration>,
    pub bypass_cache: bool,
}

impl CheckInput {
    pub fn new(subject: SubjectRef, permission: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            permission: permission.into(),
            object,
            timeout: None,
            bypass_cache: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Touch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipUpdate {
    pub operation: UpdateOperation,
    pub tuple: Tuple,
}

impl RelationshipUpdate {
    pub fn touch(tuple: Tuple) -> Self {
        Self {
            operation: UpdateOperation::Touch,
            tuple,
        }
    }

    pub fn delete(tuple: Tuple) -> Self {
        Self {
            operation: UpdateOperation::Delete,
            tuple,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelationshipQuery {
    /// Tuples of one object type, optionally narrowed further.
    ByObject(TupleFilter),
    /// Tuples naming a subject, optionally on one object type.
    BySubject {
        subject_type: String,
        subject_id: String,
        object_type: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct LookupInput {
    pub object_type: String,
    pub permission: String,
    pub subject: SubjectRef,
    pub cursor: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupPage {
    pub object_ids: Vec<String>,
    pub next_cursor: Option<String>,
}

pub struct PermissionService<S: RelationshipStore + SchemaStore> {
    store: Arc<S>,
    engine: CheckEngine<StoreTupleReader<S>>,
    registry: SchemaRegistry,
    cache: ResultCache,
    schema_writes: tokio::sync::Mutex<()>,
    metrics: Arc<Metrics>,
}

impl<S: RelationshipStore + SchemaStore> PermissionService<S> {
    pub fn new(
        store: Arc<S>,
        engine_config: EngineConfig,
        schema_limits: SchemaLimits,
        cache_config: CacheConfig,
    ) -> Self {
        let reader = Arc::new(StoreTupleReader::new(Arc::clone(&store)));
        Self {
            store,
            engine: CheckEngine::new(reader, engine_config),
            registry: SchemaRegistry::new(schema_limits),
            cache: ResultCache::new(&cache_config),
            schema_writes: tokio::sync::Mutex::new(()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Activates the store's current schema version, if it has one.
    pub async fn bootstrap(&self) -> Result<Option<u64>, ApiError> {
        let Some(stored) = self.store.read_schema().await? else {
            tracing::info!("no stored schema, starting without one");
            return Ok(None);
        };
        let outcome = self.registry.load(stored.version, &stored.definition)?;
        tracing::info!(version = outcome.active.version, "schema restored from store");
        Ok(Some(outcome.active.version))
    }

    pub fn active_schema(&self) -> Option<Arc<ActiveSchema>> {
        self.registry.active()
    }

    fn require_schema(&self) -> Result<Arc<ActiveSchema>, ApiError> {
        self.registry.active().ok_or(ApiError::SchemaNotLoaded)
    }

    #[tracing::instrument(
        skip_all,
        fields(subject = %input.subject, permission = %input.permission, object = %input.object)
    )]
    pub async fn check(&self, input: CheckInput) -> Result<CheckResult, ApiError> {
        input.object.validate()?;
        input.subject.validate()?;
        let active = self.require_schema()?;
        self.check_with(&active, input).await
    }

    async fn check_with(
        &self,
        active: &ActiveSchema,
        input: CheckInput,
    ) -> Result<CheckResult, ApiError> {
        let key = CacheKey {
            subject: input.subject.clone(),
            permission: input.permission.clone(),
            object: input.object.clone(),
        };
        let use_cache = self.cache.is_enabled() && !input.bypass_cache;
        if use_cache {
            if let Some(hit) = self.cache.get(&key) {
                self.metrics.record_check_cache_hit();
                return Ok(hit);
            }
            self.metrics.record_check_cache_miss();
        }

        let stamp = self.cache.stamp(&key);
        let mut request = CheckRequest::new(input.subject, input.permission, input.object);
        if let Some(timeout) = input.timeout {
            request = request.with_timeout(timeout);
        }

        match self.engine.check(&active.schema, &request).await {
            Ok(result) => {
                // A schema swapped in mid-check makes this answer stale.
                let still_active = self
                    .registry
                    .active()
                    .is_some_and(|current| current.version == active.version);
                if use_cache && still_active {
                    self.cache.insert(key, stamp, result.clone());
                }
                Ok(result)
            }
            Err(err) => {
                match err {
                    CheckError::MaxDepthExceeded(_) => self.metrics.record_depth_exceeded(),
                    CheckError::Timeout(_) => self.metrics.record_timeout(),
                    _ => {}
                }
                Err(err.into())
            }
        }
    }

    /// Applies a batch atomically: every delete, then every touch.
    #[tracing::instrument(skip_all, fields(updates = updates.len()))]
    pub async fn write_relationships(
        &self,
        updates: &[RelationshipUpdate],
    ) -> Result<WriteSummary, ApiError> {
        let mut writes = Vec::new();
        let mut deletes = Vec::new();
        for update in updates {
            update.tuple.validate()?;
            match update.operation {
                UpdateOperation::Touch => writes.push(update.tuple.clone()),
                UpdateOperation::Delete => deletes.push(TupleFilter::exact(&update.tuple)),
            }
        }
        if !writes.is_empty() {
            let active = self.require_schema()?;
            for tuple in &writes {
                active.schema.validate_tuple(tuple)?;
            }
        }

        let summary = self.store.write(&writes, &deletes).await?;
        for update in updates {
            self.cache.invalidate_tuple(&update.tuple);
        }
        tracing::debug!(
            written = summary.written,
            deleted = summary.deleted,
            "relationships written"
        );
        Ok(summary)
    }

    #[tracing::instrument(skip_all)]
    pub async fn delete_relationships(&self, filter: &TupleFilter) -> Result<usize, ApiError> {
        let summary = self.store.write(&[], std::slice::from_ref(filter)).await?;
        self.invalidate_filter(filter);
        tracing::debug!(deleted = summary.deleted, "relationships deleted");
        Ok(summary.deleted)
    }

    /// Bumps the stripes the filter pins down. An unpinned filter can touch
    /// anything, so it clears the whole cache.
    fn invalidate_filter(&self, filter: &TupleFilter) {
        let mut targeted = false;
        if let Some(object) = filter.object() {
            self.cache.invalidate_object(&object);
            targeted = true;
        }
        if let (Some(subject_type), Some(subject_id)) = (&filter.subject_type, &filter.subject_id)
        {
            self.cache
                .invalidate_subject(&SubjectRef::direct(subject_type, subject_id));
            targeted = true;
        }
        if !targeted {
            self.cache.clear();
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn list_relationships(
        &self,
        query: &RelationshipQuery,
        page: &Page,
    ) -> Result<TuplePage, ApiError> {
        match query {
            RelationshipQuery::ByObject(filter) => {
                if filter.object_type.is_none() {
                    return Err(ApiError::InvalidArgument(
                        "object_type is required".to_string(),
                    ));
                }
                Ok(self.store.read(filter, page).await?)
            }
            RelationshipQuery::BySubject {
                subject_type,
                subject_id,
                object_type,
            } => Ok(self
                .store
                .read_by_subject(subject_type, subject_id, object_type.as_deref(), page)
                .await?),
        }
    }

    /// Objects of `object_type` on which the subject holds the permission,
    /// in id order. Candidates come from the object index page by page;
    /// direct grants skip the full check.
    #[tracing::instrument(
        skip_all,
        fields(object_type = %input.object_type, permission = %input.permission, subject = %input.subject)
    )]
    pub async fn lookup_resources(&self, input: &LookupInput) -> Result<LookupPage, ApiError> {
        input.subject.validate()?;
        if !is_valid_name(&input.object_type) {
            return Err(ApiError::InvalidArgument(format!(
                "invalid object type '{}'",
                input.object_type
            )));
        }
        let active = self.require_schema()?;
        active
            .schema
            .resolve(&input.object_type, &input.permission)
            .map_err(CheckError::from)?;

        let limit = clamp_limit(input.limit);
        let mut after = input
            .cursor
            .as_deref()
            .map(decode_cursor::<String>)
            .transpose()?;
        let direct = self.direct_grants(input).await?;
        let mut object_ids = Vec::new();

        let active = &active;
        let direct = &direct;
        loop {
            let candidates = self
                .store
                .list_object_ids(&input.object_type, after.as_deref(), limit)
                .await?;
            let batch_len = candidates.len();
            let exhausted = batch_len < limit;

            let mut checks = stream::iter(candidates)
                .map(|id| async move {
                    if direct.contains(&id) {
                        return (id, Ok(true));
                    }
                    let check = CheckInput::new(
                        input.subject.clone(),
                        input.permission.clone(),
                        ObjectRef::new(&input.object_type, id.as_str()),
                    );
                    let allowed = self.check_with(active, check).await.map(|r| r.allowed);
                    (id, allowed)
                })
                .buffered(self.engine.config().max_concurrent_branches.max(1));

            let mut examined = 0;
            while let Some((id, allowed)) = checks.next().await {
                examined += 1;
                if allowed? {
                    object_ids.push(id.clone());
                }
                if object_ids.len() == limit {
                    drop(checks);
                    let more = examined < batch_len
                        || (!exhausted && self.has_candidates_after(input, &id).await?);
                    return Ok(LookupPage {
                        object_ids,
                        next_cursor: more.then(|| encode_cursor(&id)),
                    });
                }
                after = Some(id);
            }

            if exhausted {
                return Ok(LookupPage {
                    object_ids,
                    next_cursor: None,
                });
            }
        }
    }

    async fn has_candidates_after(&self, input: &LookupInput, id: &str) -> Result<bool, ApiError> {
        let next = self
            .store
            .list_object_ids(&input.object_type, Some(id), 1)
            .await?;
        Ok(!next.is_empty())
    }

    /// Ids of objects where the subject holds a tuple named like the
    /// requested permission.
    async fn direct_grants(&self, input: &LookupInput) -> Result<HashSet<String>, ApiError> {
        let mut ids = HashSet::new();
        let mut page = Page::first(MAX_PAGE_SIZE);
        loop {
            let result = self
                .store
                .read_by_subject(
                    input.subject.subject_type(),
                    input.subject.subject_id(),
                    Some(&input.object_type),
                    &page,
                )
                .await?;
            ids.extend(
                result
                    .tuples
                    .into_iter()
                    .filter(|t| t.relation == input.permission && t.subject == input.subject)
                    .map(|t| t.object.object_id),
            );
            match result.next_cursor {
                Some(cursor) => page = Page::after(cursor, MAX_PAGE_SIZE),
                None => return Ok(ids),
            }
        }
    }

    /// Validates, persists and activates a schema. Loads are serialised; a
    /// rejected schema leaves the active one untouched.
    #[tracing::instrument(skip_all, fields(bytes = source.len()))]
    pub async fn load_schema(&self, source: &str) -> Result<LoadOutcome, ApiError> {
        let _guard = self.schema_writes.lock().await;
        let schema = self.registry.compile(source)?;
        let version = self.store.write_schema(source).await?;
        let outcome = self.registry.activate(version, source.to_string(), schema);
        self.cache.clear();
        Ok(outcome)
    }
}
