//! One named pool and the statements it runs.

use crate::error::{ConnectionError, EngineError};
use crate::pool::config::{mask_url, ConnectionConfig};
use crate::pool::rows::{decode_row, Record};
use crate::pool::Dialect;
use crate::sql::{bind_all, SqlStatement};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Connection};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub open: u32,
    pub idle: u32,
    pub in_use: u32,
    pub pool_max: u32,
    pub pool_min: u32,
}

/// Outcome of a connectivity probe. Never an error.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub connection: String,
    pub ok: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct PoolHandle {
    config: ConnectionConfig,
    dialect: Dialect,
    pool: AnyPool,
    /// Goes false once and stays false.
    active: AtomicBool,
    created_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
    statement_timeout: Option<Duration>,
}

impl PoolHandle {
    /// Build the pool lazily; nothing connects until the first acquire.
    pub fn open(config: ConnectionConfig, statement_timeout: Option<Duration>) -> Result<Self, ConnectionError> {
        config.validate()?;
        let dialect = config.dialect()?;
        let url = config.connect_url()?;
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool_max)
            .min_connections(config.pool_min)
            .acquire_timeout(config.acquire_timeout())
            .connect_lazy(&url)
            .map_err(|e| ConnectionError::InvalidConfig {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;
        let now = Utc::now();
        Ok(PoolHandle {
            config,
            dialect,
            pool,
            active: AtomicBool::new(true),
            created_at: now,
            last_used_ms: AtomicI64::new(now.timestamp_millis()),
            statement_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn masked_url(&self) -> String {
        mask_url(&self.config.url)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_used_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.created_at)
    }

    pub fn stats(&self) -> PoolStats {
        let open = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX).min(open);
        PoolStats {
            open,
            idle,
            in_use: open - idle,
            pool_max: self.config.pool_max,
            pool_min: self.config.pool_min,
        }
    }

    /// Stop handing out connections. Returns whether this call made the change.
    pub fn mark_inactive(&self) -> bool {
        let changed = self.active.swap(false, Ordering::AcqRel);
        if changed {
            tracing::info!(connection = %self.name(), "deactivating pool");
        }
        changed
    }

    /// Mark inactive and close the pool. Waits for checked-out connections to come back.
    pub async fn deactivate(&self) {
        self.mark_inactive();
        self.pool.close().await;
    }

    async fn acquire(&self) -> Result<PoolConnection<Any>, EngineError> {
        if !self.is_active() {
            return Err(ConnectionError::Inactive(self.name().to_string()).into());
        }
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| EngineError::from_sqlx(self.name(), self.config.acquire_timeout(), e))?;
        self.last_used_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Ok(conn)
    }

    fn backend_err(&self, e: sqlx::Error) -> EngineError {
        EngineError::from_sqlx(self.name(), self.config.acquire_timeout(), e)
    }

    /// Run a row-returning statement.
    pub async fn query(self: &Arc<Self>, stmt: &SqlStatement) -> Result<Vec<Record>, EngineError> {
        let handle = self.clone();
        let stmt = stmt.clone();
        self.with_timeout(async move { handle.query_inner(&stmt).await }).await
    }

    /// Run a statement and report rows affected.
    pub async fn execute(self: &Arc<Self>, stmt: &SqlStatement) -> Result<u64, EngineError> {
        let handle = self.clone();
        let stmt = stmt.clone();
        self.with_timeout(async move { handle.execute_inner(&stmt).await }).await
    }

    /// Run statements in order on one connection; commit if all succeed, else roll back
    /// and return the first error.
    pub async fn transaction(self: &Arc<Self>, stmts: &[SqlStatement]) -> Result<Vec<u64>, EngineError> {
        let handle = self.clone();
        let stmts = stmts.to_vec();
        self.with_timeout(async move { handle.transaction_inner(&stmts).await }).await
    }

    /// `SELECT 1` round trip.
    pub async fn test(self: &Arc<Self>) -> TestResult {
        let started = Instant::now();
        let result = self.query(&SqlStatement::new("SELECT 1")).await;
        TestResult {
            connection: self.name().to_string(),
            ok: result.is_ok(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: result.err().map(|e| e.to_string()),
        }
    }

    // Spawned so that a caller giving up does not cancel the statement mid-flight; the
    // task finishes on its own and its connection goes back to the pool.
    async fn with_timeout<T, F>(&self, work: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        let Some(limit) = self.statement_timeout else {
            return work.await;
        };
        let task = tokio::spawn(work);
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EngineError::Backend {
                connection: self.name().to_string(),
                code: None,
                message: format!("statement task failed: {}", join),
            }),
            Err(_) => Err(ConnectionError::StatementTimeout {
                name: self.name().to_string(),
                waited: limit,
            }
            .into()),
        }
    }

    async fn query_inner(&self, stmt: &SqlStatement) -> Result<Vec<Record>, EngineError> {
        let rendered = stmt.render(self.dialect.adapter())?;
        tracing::debug!(connection = %self.name(), sql = %rendered.sql, params = ?rendered.values, "query");
        let mut conn = self.acquire().await?;
        let rows = bind_all(sqlx::query(&rendered.sql), rendered.values)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| self.backend_err(e))?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute_inner(&self, stmt: &SqlStatement) -> Result<u64, EngineError> {
        let rendered = stmt.render(self.dialect.adapter())?;
        tracing::debug!(connection = %self.name(), sql = %rendered.sql, params = ?rendered.values, "execute");
        let mut conn = self.acquire().await?;
        let result = bind_all(sqlx::query(&rendered.sql), rendered.values)
            .execute(&mut *conn)
            .await
            .map_err(|e| self.backend_err(e))?;
        Ok(result.rows_affected())
    }

    async fn transaction_inner(&self, stmts: &[SqlStatement]) -> Result<Vec<u64>, EngineError> {
        let mut rendered = Vec::with_capacity(stmts.len());
        for s in stmts {
            rendered.push(s.render(self.dialect.adapter())?);
        }
        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await.map_err(|e| self.backend_err(e))?;
        let mut affected = Vec::with_capacity(rendered.len());
        for (i, r) in rendered.into_iter().enumerate() {
            tracing::debug!(connection = %self.name(), step = i, sql = %r.sql, params = ?r.values, "transaction");
            match bind_all(sqlx::query(&r.sql), r.values).execute(&mut *tx).await {
                Ok(result) => affected.push(result.rows_affected()),
                Err(e) => {
                    tracing::error!(connection = %self.name(), step = i, error = %e, "transaction rolled back");
                    if let Err(rb) = tx.rollback().await {
                        tracing::warn!(connection = %self.name(), error = %rb, "rollback failed");
                    }
                    return Err(self.backend_err(e));
                }
            }
        }
        tx.commit().await.map_err(|e| self.backend_err(e))?;
        Ok(affected)
    }
}
