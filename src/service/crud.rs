//! Generic CRUD over entity definitions: validate, build, route, execute, cache.

use crate::cache::{self, CacheStrategy, MemoryCache};
use crate::config::{EntityDefinition, EntityStore};
use crate::error::{ConfigError, EngineError};
use crate::pool::{BackendAdapter, Cell, ConnectionRegistry, PoolHandle, Record};
use crate::response::{BulkOutcome, CrudResponse, ErrorItem, Page, Pagination, ResponseMeta, WriteOutcome};
use crate::service::routing::{ConnectionRequest, ConnectionStrategy, PrecedenceStrategy};
use crate::service::validation::DataValidator;
use crate::sql::{SearchOptions, SqlBuilder, SqlStatement};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const BULK_LIMIT: usize = 100;

pub struct CrudService {
    entities: Arc<EntityStore>,
    registry: Arc<ConnectionRegistry>,
    strategy: Arc<dyn ConnectionStrategy>,
    cache: Arc<dyn CacheStrategy>,
    list_ttl: Option<Duration>,
    item_ttl: Option<Duration>,
    generations: Mutex<Generations>,
}

/// Write counters. A read stores its result only if no write to the entity landed
/// while it was querying.
#[derive(Default)]
struct Generations {
    all: u64,
    entities: HashMap<String, u64>,
}

impl Generations {
    fn current(&self, entity: &str) -> (u64, u64) {
        (self.all, self.entities.get(entity).copied().unwrap_or(0))
    }
}

/// Timing and routing facts gathered while one operation runs.
struct Call {
    started: Instant,
    connection: String,
}

impl Call {
    fn meta(&self, cached: bool) -> ResponseMeta {
        ResponseMeta {
            cached,
            execution_time_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            connection_used: self.connection.clone(),
        }
    }
}

impl CrudService {
    /// Precedence routing and an in-memory cache with default settings. The cache has no
    /// background sweeper; expired entries go on access.
    pub fn new(entities: Arc<EntityStore>, registry: Arc<ConnectionRegistry>) -> Self {
        CrudService {
            entities,
            registry,
            strategy: Arc::new(PrecedenceStrategy),
            cache: Arc::new(MemoryCache::<Value>::new(Default::default())),
            list_ttl: None,
            item_ttl: None,
            generations: Mutex::new(Generations::default()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStrategy>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ConnectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// TTLs for list pages and single items; `None` uses the cache's default.
    pub fn with_cache_ttls(mut self, list: Option<Duration>, item: Option<Duration>) -> Self {
        self.list_ttl = list;
        self.item_ttl = item;
        self
    }

    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn CacheStrategy> {
        &self.cache
    }

    /// Empty options sized by the loaded page settings.
    pub fn options(&self) -> SearchOptions {
        SearchOptions::new(self.entities.settings())
    }

    /// Reload definitions from their source and drop every cached entity read.
    pub fn reload_entities(&self) -> Result<(), ConfigError> {
        self.entities.reload()?;
        let mut generations = self.lock_generations();
        generations.all += 1;
        if let Ok(all) = Regex::new("^entity:") {
            self.cache.invalidate(&all);
        }
        Ok(())
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityDefinition>, EngineError> {
        self.entities
            .get(name)
            .ok_or_else(|| EngineError::UnknownEntity(name.to_string()))
    }

    fn require(entity: &EntityDefinition, enabled: bool, operation: &'static str) -> Result<(), EngineError> {
        if enabled {
            Ok(())
        } else {
            Err(EngineError::OperationNotAllowed {
                entity: entity.name.clone(),
                operation,
            })
        }
    }

    fn route(&self, entity: &EntityDefinition, request: &ConnectionRequest) -> Result<Arc<PoolHandle>, EngineError> {
        let name = self.strategy.select(request, entity)?;
        Ok(self.registry.resolve(name.as_deref())?)
    }

    fn start(&self, entity: &EntityDefinition, request: &ConnectionRequest) -> Result<(Arc<PoolHandle>, Call), EngineError> {
        let started = Instant::now();
        let handle = self.route(entity, request)?;
        let call = Call {
            started,
            connection: handle.name().to_string(),
        };
        Ok((handle, call))
    }

    /// One page of rows plus pagination totals. Count and page run concurrently.
    pub async fn list(
        &self,
        entity_name: &str,
        mut options: SearchOptions,
        request: &ConnectionRequest,
    ) -> Result<CrudResponse<Page>, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.read, "read")?;
        if options.search_text().is_some() {
            Self::require(&entity, entity.operations.search, "search")?;
        }
        if options.current_page() > 1 {
            Self::require(&entity, entity.operations.paginate, "paginate")?;
        }
        for (name, value) in options.filters_mut().iter_mut() {
            if let Some(field) = entity.field_case_insensitive(name) {
                *value = DataValidator::coerce_value(field, value);
            }
        }

        let (handle, call) = self.start(&entity, request)?;
        let key = cache::list_key(&entity.name, &options, &call.connection);
        if let Some(hit) = self.cache_get::<Page>(&key) {
            tracing::debug!(entity = %entity.name, connection = %call.connection, "list served from cache");
            return Ok(CrudResponse::ok(hit, call.meta(true)));
        }
        let generation = self.generation(&entity.name);

        let builder = SqlBuilder::new(&entity).dialect(handle.dialect());
        let count_stmt = builder.count(&options)?;
        let page_stmt = builder.select(&options)?;
        let (count_rows, rows) = tokio::try_join!(handle.query(&count_stmt), handle.query(&page_stmt))?;

        let total = count_rows
            .first()
            .and_then(|r| r.get("total").or_else(|| r.first()))
            .and_then(Cell::as_i64)
            .unwrap_or(0)
            .max(0) as u64;
        let adapter = handle.dialect().adapter();
        let page = Page {
            items: rows.into_iter().map(|r| to_item(&entity, adapter, r)).collect(),
            pagination: Pagination::new(options.current_page(), options.current_page_size(), total),
        };
        self.cache_put(&entity.name, generation, &key, &page, self.list_ttl);
        Ok(CrudResponse::ok(page, call.meta(false)))
    }

    /// Row by primary key. A missing row is an unsuccessful response, not an error.
    pub async fn get_by_id(&self, entity_name: &str, id: &Value, request: &ConnectionRequest) -> Result<CrudResponse, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.read, "read")?;
        let id = coerce_id(&entity, id);

        let (handle, call) = self.start(&entity, request)?;
        let key = cache::item_key(&entity.name, &id, &call.connection);
        if let Some(hit) = self.cache_get::<Value>(&key) {
            return Ok(CrudResponse::ok(hit, call.meta(true)));
        }
        let generation = self.generation(&entity.name);

        let stmt = SqlBuilder::new(&entity).dialect(handle.dialect()).select_by_id(&id);
        let rows = handle.query(&stmt).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(CrudResponse::failed(vec![not_found(&entity, &id)], call.meta(false)));
        };
        let item = to_item(&entity, handle.dialect().adapter(), row);
        self.cache_put(&entity.name, generation, &key, &item, self.item_ttl);
        Ok(CrudResponse::ok(item, call.meta(false)))
    }

    /// Validate and insert. Invalid payloads come back as errors without touching the backend.
    pub async fn create(&self, entity_name: &str, payload: &Value, request: &ConnectionRequest) -> Result<CrudResponse<WriteOutcome>, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.create, "create")?;
        let payload = as_object(payload)?;

        let (handle, call) = self.start(&entity, request)?;
        let outcome = DataValidator::validate(&entity, payload, false);
        if !outcome.is_valid {
            let errors = outcome.errors.into_iter().map(ErrorItem::from).collect();
            return Ok(CrudResponse::failed(errors, call.meta(false)));
        }

        let stmt = SqlBuilder::new(&entity).dialect(handle.dialect()).insert(&outcome.sanitized)?;
        let (id, rows_affected) = if stmt.returning.is_some() {
            let rows = handle.query(&stmt).await?;
            let id = rows
                .first()
                .and_then(|r| r.get(&entity.primary_key).or_else(|| r.first()))
                .cloned()
                .map(Cell::into_json)
                .unwrap_or(Value::Null);
            (id, rows.len() as u64)
        } else {
            let affected = handle.execute(&stmt).await?;
            let id = outcome.sanitized.get(&entity.primary_key).cloned().unwrap_or(Value::Null);
            (id, affected)
        };

        self.invalidate(cache::list_pattern(&entity.name), &entity.name);
        tracing::debug!(entity = %entity.name, connection = %call.connection, id = %id, "created");
        Ok(CrudResponse::ok(WriteOutcome { id, rows_affected }, call.meta(false)))
    }

    /// Validate and update the fields present in `payload`.
    pub async fn update(
        &self,
        entity_name: &str,
        id: &Value,
        payload: &Value,
        request: &ConnectionRequest,
    ) -> Result<CrudResponse<WriteOutcome>, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.update, "update")?;
        let payload = as_object(payload)?;
        let id = coerce_id(&entity, id);

        let (handle, call) = self.start(&entity, request)?;
        let outcome = DataValidator::validate(&entity, payload, true);
        if !outcome.is_valid {
            let errors = outcome.errors.into_iter().map(ErrorItem::from).collect();
            return Ok(CrudResponse::failed(errors, call.meta(false)));
        }

        let stmt = SqlBuilder::new(&entity).dialect(handle.dialect()).update(&id, &outcome.sanitized)?;
        let rows_affected = handle.execute(&stmt).await?;
        if rows_affected == 0 {
            return Ok(CrudResponse::failed(vec![not_found(&entity, &id)], call.meta(false)));
        }
        self.invalidate(cache::entity_and_item_pattern(&entity.name, &id), &entity.name);
        Ok(CrudResponse::ok(WriteOutcome { id, rows_affected }, call.meta(false)))
    }

    pub async fn delete(&self, entity_name: &str, id: &Value, request: &ConnectionRequest) -> Result<CrudResponse<WriteOutcome>, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.delete, "delete")?;
        let id = coerce_id(&entity, id);

        let (handle, call) = self.start(&entity, request)?;
        let stmt = SqlBuilder::new(&entity).dialect(handle.dialect()).delete(&id);
        let rows_affected = handle.execute(&stmt).await?;
        if rows_affected == 0 {
            return Ok(CrudResponse::failed(vec![not_found(&entity, &id)], call.meta(false)));
        }
        self.invalidate(cache::entity_and_item_pattern(&entity.name, &id), &entity.name);
        Ok(CrudResponse::ok(WriteOutcome { id, rows_affected }, call.meta(false)))
    }

    /// Insert up to 100 payloads in one transaction. Every payload is validated first;
    /// any failure rejects the whole batch before a statement runs.
    pub async fn bulk_create(
        &self,
        entity_name: &str,
        payloads: &[Value],
        request: &ConnectionRequest,
    ) -> Result<CrudResponse<BulkOutcome>, EngineError> {
        let entity = self.entity(entity_name)?;
        Self::require(&entity, entity.operations.create, "create")?;
        if payloads.is_empty() {
            return Err(EngineError::BadRequest("bulk create needs at least one item".into()));
        }
        if payloads.len() > BULK_LIMIT {
            return Err(EngineError::BadRequest(format!(
                "bulk create limited to {} items",
                BULK_LIMIT
            )));
        }

        let (handle, call) = self.start(&entity, request)?;
        let builder = SqlBuilder::new(&entity).dialect(handle.dialect());
        let mut errors = Vec::new();
        let mut stmts: Vec<SqlStatement> = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            let outcome = DataValidator::validate(&entity, as_object(payload)?, false);
            if !outcome.is_valid {
                errors.extend(outcome.errors.into_iter().map(|e| {
                    let mut item = ErrorItem::from(e);
                    item.field = item.field.map(|f| format!("[{}].{}", i, f));
                    item
                }));
                continue;
            }
            let mut stmt = builder.insert(&outcome.sanitized)?;
            stmt.returning = None;
            stmts.push(stmt);
        }
        if !errors.is_empty() {
            return Ok(CrudResponse::failed(errors, call.meta(false)));
        }

        let affected = handle.transaction(&stmts).await?;
        self.invalidate(cache::list_pattern(&entity.name), &entity.name);
        let outcome = BulkOutcome {
            count: stmts.len(),
            rows_affected: affected.iter().sum(),
        };
        tracing::debug!(entity = %entity.name, connection = %call.connection, count = outcome.count, "bulk created");
        Ok(CrudResponse::ok(outcome, call.meta(false)))
    }

    fn cache_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable cache entry; treating as miss");
                None
            }
        }
    }

    fn lock_generations(&self) -> std::sync::MutexGuard<'_, Generations> {
        self.generations.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn generation(&self, entity: &str) -> (u64, u64) {
        self.lock_generations().current(entity)
    }

    /// Store a read result unless a write to `entity` has happened since `generation`
    /// was taken. Check and store share the lock that writes invalidate under.
    fn cache_put<T: serde::Serialize>(&self, entity: &str, generation: (u64, u64), key: &str, value: &T, ttl: Option<Duration>) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "value not cached");
                return;
            }
        };
        let generations = self.lock_generations();
        if generations.current(entity) != generation {
            tracing::debug!(key = %key, "entity written during read; result not cached");
            return;
        }
        self.cache.set(key, value, ttl);
    }

    fn invalidate(&self, pattern: Option<Regex>, entity: &str) {
        let mut generations = self.lock_generations();
        *generations.entities.entry(entity.to_string()).or_insert(0) += 1;
        match pattern {
            Some(re) => {
                self.cache.invalidate(&re);
            }
            None => tracing::warn!(entity = %entity, "could not build cache invalidation pattern"),
        }
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, EngineError> {
    payload
        .as_object()
        .ok_or_else(|| EngineError::BadRequest("payload must be a JSON object".into()))
}

fn coerce_id(entity: &EntityDefinition, id: &Value) -> Value {
    match entity.primary_key_field() {
        Some(pk) => DataValidator::coerce_value(pk, id),
        None => id.clone(),
    }
}

fn not_found(entity: &EntityDefinition, id: &Value) -> ErrorItem {
    ErrorItem::not_found(format!("{} {} not found", entity.display_name, id))
}

/// Row keyed by definition field names, large fields materialized by the backend adapter.
fn to_item(entity: &EntityDefinition, adapter: &dyn BackendAdapter, record: Record) -> Value {
    let mut out = Map::new();
    for field in &entity.fields {
        let cell = record.get(&field.name).cloned().unwrap_or(Cell::Null);
        let value = if field.kind.is_large() {
            adapter.materialize_large_field(&field.kind, cell)
        } else {
            cell.into_json()
        };
        out.insert(field.name.clone(), value);
    }
    Value::Object(out)
}
