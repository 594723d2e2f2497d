//! Engine settings from the environment (and `.env`).

use crate::cache::{CacheSettings, CacheStrategy, MemoryCache};
use crate::config::EntityStore;
use crate::error::{ConfigError, EngineError};
use crate::pool::{ConnectionConfig, ConnectionRegistry, RegistryOptions};
use crate::service::CrudService;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENTITY_CONFIG_PATH: &str = "config/entities.json";

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub entity_config_path: PathBuf,
    pub connections_config_path: Option<PathBuf>,
    /// Registered as the connection named `default`.
    pub database_url: Option<String>,
    pub pool_max: Option<u32>,
    pub pool_min: Option<u32>,
    pub pool_timeout_secs: Option<u64>,
    pub cache_ttl: Duration,
    pub cache_item_ttl: Duration,
    pub cache_max_size: usize,
    pub cache_sweep_interval: Duration,
    pub query_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            entity_config_path: PathBuf::from(DEFAULT_ENTITY_CONFIG_PATH),
            connections_config_path: None,
            database_url: None,
            pool_max: None,
            pool_min: None,
            pool_timeout_secs: None,
            cache_ttl: Duration::from_secs(300),
            cache_item_ttl: Duration::from_secs(600),
            cache_max_size: 1000,
            cache_sweep_interval: Duration::from_millis(60_000),
            query_timeout: None,
        }
    }
}

impl EngineSettings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = EngineSettings::default();
        Ok(EngineSettings {
            entity_config_path: get("ENTITY_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.entity_config_path),
            connections_config_path: get("CONNECTIONS_CONFIG_PATH").map(PathBuf::from),
            database_url: get("DATABASE_URL"),
            pool_max: parse(&get, "POOL_MAX")?,
            pool_min: parse(&get, "POOL_MIN")?,
            pool_timeout_secs: parse(&get, "POOL_TIMEOUT")?,
            cache_ttl: parse(&get, "CACHE_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_item_ttl: parse(&get, "CACHE_ITEM_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_item_ttl),
            cache_max_size: parse(&get, "CACHE_MAX_SIZE")?.unwrap_or(defaults.cache_max_size),
            cache_sweep_interval: parse(&get, "CACHE_SWEEP_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_sweep_interval),
            query_timeout: parse(&get, "QUERY_TIMEOUT_MS")?.map(Duration::from_millis),
        })
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: self.cache_ttl,
            max_size: self.cache_max_size,
            sweep_interval: self.cache_sweep_interval,
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            statement_timeout: self.query_timeout,
        }
    }

    /// Connections from the definitions file, then `DATABASE_URL` as `default` unless the
    /// file already defines that name.
    pub fn connection_configs(&self) -> Result<Vec<ConnectionConfig>, ConfigError> {
        let mut configs = match &self.connections_config_path {
            Some(path) => ConnectionConfig::load_list(path)?,
            None => Vec::new(),
        };
        if let Some(url) = &self.database_url {
            if !configs.iter().any(|c| c.name == "default") {
                let mut c = ConnectionConfig::new("default", url.clone());
                if let Some(max) = self.pool_max {
                    c.pool_max = max;
                }
                if let Some(min) = self.pool_min {
                    c.pool_min = min;
                }
                if let Some(secs) = self.pool_timeout_secs {
                    c.pool_timeout = secs;
                }
                c.is_default = !configs.iter().any(|c| c.is_default);
                configs.push(c);
            }
        }
        Ok(configs)
    }

    /// Load definitions, register every connection and start the cache sweeper.
    /// Must run inside a Tokio runtime.
    pub fn build_service(&self) -> Result<CrudService, EngineError> {
        let entities = Arc::new(EntityStore::load_from_path(&self.entity_config_path)?);
        let registry = Arc::new(ConnectionRegistry::from_configs(
            self.connection_configs()?,
            self.registry_options(),
        )?);
        let cache = Arc::new(MemoryCache::<Value>::new(self.cache_settings()));
        cache.start_sweeper();
        let cache: Arc<dyn CacheStrategy> = cache;
        Ok(CrudService::new(entities, registry)
            .with_cache(cache)
            .with_cache_ttls(Some(self.cache_ttl), Some(self.cache_item_ttl)))
    }
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Validation(format!("{}='{}': {}", key, raw, e))),
    }
}
