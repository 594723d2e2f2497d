//! Entity CRUD engine: definition-driven validation, SQL building, pooled execution and caching.

pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod pool;
pub mod response;
pub mod service;
pub mod settings;
pub mod sql;
pub mod telemetry;

pub use cache::{CacheSettings, CacheStats, CacheStrategy, MemoryCache, NoCache};
pub use config::{load_from_path, load_from_str, EntityCatalog, EntityDefinition, EntityStore, FieldDefinition, FieldKind};
pub use error::{ConfigError, ConnectionError, EngineError, SqlBuildError};
pub use extractors::ConnectionOverride;
pub use pool::{ConnectionConfig, ConnectionRegistry, PoolHandle, RegistryOptions, TestResult};
pub use response::{BulkOutcome, CrudResponse, ErrorItem, Page, Pagination, ResponseMeta, WriteOutcome};
pub use service::{ConnectionRequest, ConnectionStrategy, CrudService, DataValidator, PrecedenceStrategy, ValidationOutcome};
pub use settings::EngineSettings;
pub use sql::{OrderDirection, SearchOptions, SqlBuilder, SqlStatement};
pub use telemetry::init_tracing;
