//! Registry of named pools with a system default.

use crate::error::{ConnectionError, EngineError};
use crate::pool::config::ConnectionConfig;
use crate::pool::handle::{PoolHandle, PoolStats, TestResult};
use crate::pool::rows::Record;
use crate::sql::SqlStatement;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct RegistryOptions {
    /// Caller-side limit on a single statement or transaction.
    pub statement_timeout: Option<Duration>,
}

#[derive(Default)]
struct RegistryState {
    pools: HashMap<String, Arc<PoolHandle>>,
    default: Option<String>,
}

/// Connection listing entry; never carries the password.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub name: String,
    pub url: String,
    pub user: Option<String>,
    pub password: Option<&'static str>,
    pub description: Option<String>,
    pub active: bool,
    pub is_default: bool,
    pub pool_increment: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub stats: PoolStats,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub default_connection: Option<String>,
    pub open_connections: u32,
    pub in_use_connections: u32,
}

/// Pools are created lazily, but their maintenance tasks need a Tokio runtime, so
/// `register` must be called from inside one.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    options: RegistryOptions,
}

impl ConnectionRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        sqlx::any::install_default_drivers();
        ConnectionRegistry {
            state: RwLock::new(RegistryState::default()),
            options,
        }
    }

    /// Register every config in order.
    pub fn from_configs(configs: Vec<ConnectionConfig>, options: RegistryOptions) -> Result<Self, ConnectionError> {
        let registry = Self::new(options);
        for c in configs {
            registry.register(c)?;
        }
        Ok(registry)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Create a pool under `config.name`. A name held by an active pool is rejected;
    /// a deactivated one is replaced. The first pool, or one flagged `isDefault`,
    /// becomes the default.
    pub fn register(&self, config: ConnectionConfig) -> Result<(), ConnectionError> {
        let name = config.name.clone();
        if let Some(existing) = self.read_state().pools.get(&name) {
            if existing.is_active() {
                return Err(ConnectionError::AlreadyRegistered(name));
            }
        }
        let make_default = config.is_default;
        let handle = Arc::new(PoolHandle::open(config, self.options.statement_timeout)?);
        let mut state = self.write_state();
        if let Some(existing) = state.pools.get(&name) {
            if existing.is_active() {
                return Err(ConnectionError::AlreadyRegistered(name));
            }
        }
        tracing::info!(
            connection = %name,
            url = %handle.masked_url(),
            pool_min = handle.config().pool_min,
            pool_max = handle.config().pool_max,
            "pool registered"
        );
        state.pools.insert(name.clone(), handle);
        if make_default || state.default.is_none() {
            state.default = Some(name);
        }
        Ok(())
    }

    /// Handle for `name`, or the default when `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<PoolHandle>, ConnectionError> {
        let state = self.read_state();
        let name = match name {
            Some(n) => n.to_string(),
            None => state.default.clone().ok_or(ConnectionError::NoDefault)?,
        };
        let handle = state
            .pools
            .get(&name)
            .cloned()
            .ok_or_else(|| ConnectionError::Unknown(name.clone()))?;
        if !handle.is_active() {
            return Err(ConnectionError::Inactive(name));
        }
        Ok(handle)
    }

    pub async fn query(&self, stmt: &SqlStatement, name: Option<&str>) -> Result<Vec<Record>, EngineError> {
        let handle = self.resolve(name)?;
        handle.query(stmt).await
    }

    pub async fn execute(&self, stmt: &SqlStatement, name: Option<&str>) -> Result<u64, EngineError> {
        let handle = self.resolve(name)?;
        handle.execute(stmt).await
    }

    pub async fn transaction(&self, stmts: &[SqlStatement], name: Option<&str>) -> Result<Vec<u64>, EngineError> {
        let handle = self.resolve(name)?;
        handle.transaction(stmts).await
    }

    /// Probe one connection. Resolution failures are reported in the result.
    pub async fn test(&self, name: Option<&str>) -> TestResult {
        match self.resolve(name) {
            Ok(handle) => handle.test().await,
            Err(e) => TestResult {
                connection: name.unwrap_or_default().to_string(),
                ok: false,
                latency_ms: 0.0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Probe every active connection.
    pub async fn test_all(&self) -> Vec<TestResult> {
        let handles: Vec<Arc<PoolHandle>> = {
            let state = self.read_state();
            let mut v: Vec<_> = state.pools.values().filter(|h| h.is_active()).cloned().collect();
            v.sort_by(|a, b| a.name().cmp(b.name()));
            v
        };
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.test().await);
        }
        out
    }

    /// Stop serving `name` and close its pool. The default moves to another active pool.
    pub async fn deactivate(&self, name: &str) -> Result<(), ConnectionError> {
        let handle = {
            let mut state = self.write_state();
            let handle = state
                .pools
                .get(name)
                .cloned()
                .ok_or_else(|| ConnectionError::Unknown(name.to_string()))?;
            if state.default.as_deref() == Some(name) {
                let mut others: Vec<String> = state
                    .pools
                    .iter()
                    .filter(|(n, h)| n.as_str() != name && h.is_active())
                    .map(|(n, _)| n.clone())
                    .collect();
                others.sort();
                state.default = others.into_iter().next();
            }
            handle.mark_inactive();
            handle
        };
        handle.deactivate().await;
        Ok(())
    }

    /// Close every pool and forget them.
    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<PoolHandle>> = {
            let mut state = self.write_state();
            state.default = None;
            state.pools.drain().map(|(_, h)| h).collect()
        };
        let count = handles.len();
        for h in handles {
            h.deactivate().await;
        }
        tracing::info!(pools = count, "all pools shut down");
    }

    pub fn set_default(&self, name: &str) -> Result<(), ConnectionError> {
        let mut state = self.write_state();
        match state.pools.get(name) {
            None => Err(ConnectionError::Unknown(name.to_string())),
            Some(h) if !h.is_active() => Err(ConnectionError::Inactive(name.to_string())),
            Some(_) => {
                state.default = Some(name.to_string());
                Ok(())
            }
        }
    }

    pub fn default_name(&self) -> Option<String> {
        self.read_state().default.clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_state().pools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.read_state();
        let mut out: Vec<ConnectionInfo> = state
            .pools
            .values()
            .map(|h| {
                let c = h.config();
                ConnectionInfo {
                    name: c.name.clone(),
                    url: h.masked_url(),
                    user: c.user.clone(),
                    password: c.password.as_ref().map(|_| "***"),
                    description: c.description.clone(),
                    active: h.is_active(),
                    is_default: state.default.as_deref() == Some(c.name.as_str()),
                    pool_increment: c.pool_increment,
                    created_at: h.created_at(),
                    last_used: h.last_used(),
                    stats: h.stats(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn summary(&self) -> RegistrySummary {
        let state = self.read_state();
        let active = state.pools.values().filter(|h| h.is_active()).count();
        let (open, in_use) = state.pools.values().fold((0u32, 0u32), |(o, u), h| {
            let s = h.stats();
            (o + s.open, u + s.in_use)
        });
        RegistrySummary {
            total: state.pools.len(),
            active,
            inactive: state.pools.len() - active,
            default_connection: state.default.clone(),
            open_connections: open,
            in_use_connections: in_use,
        }
    }
}
