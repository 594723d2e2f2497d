//! Named connection definitions.

use crate::error::{ConfigError, ConnectionError};
use crate::pool::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,
    /// Connect URL; the scheme picks the backend (`postgres://`, `sqlite://`).
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    /// Reported only; pools grow one connection at a time.
    #[serde(default = "default_pool_increment")]
    pub pool_increment: u32,
    /// Seconds to wait for a free connection.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

fn default_pool_max() -> u32 {
    10
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_increment() -> u32 {
    1
}

fn default_pool_timeout() -> u64 {
    4
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("url", &mask_url(&self.url))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("pool_max", &self.pool_max)
            .field("pool_min", &self.pool_min)
            .field("pool_timeout", &self.pool_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        ConnectionConfig {
            name: name.into(),
            url: url.into(),
            user: None,
            password: None,
            pool_max: default_pool_max(),
            pool_min: default_pool_min(),
            pool_increment: default_pool_increment(),
            pool_timeout: default_pool_timeout(),
            description: None,
            is_default: false,
        }
    }

    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.pool_min = min;
        self.pool_max = max;
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout)
    }

    pub fn dialect(&self) -> Result<Dialect, ConnectionError> {
        Dialect::from_url(&self.url).ok_or_else(|| ConnectionError::UnsupportedBackend {
            name: self.name.clone(),
            scheme: self.url.split(':').next().unwrap_or_default().to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConnectionError> {
        let invalid = |reason: &str| ConnectionError::InvalidConfig {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(invalid("url must not be empty"));
        }
        if self.pool_max == 0 {
            return Err(invalid("poolMax must be at least 1"));
        }
        if self.pool_min > self.pool_max {
            return Err(invalid("poolMin must not exceed poolMax"));
        }
        self.dialect()?;
        Ok(())
    }

    /// URL handed to the driver, with `user`/`password` filled in when given separately.
    pub fn connect_url(&self) -> Result<String, ConnectionError> {
        if self.user.is_none() && self.password.is_none() {
            return Ok(self.url.clone());
        }
        if self.dialect()? == Dialect::Sqlite {
            return Ok(self.url.clone());
        }
        let mut url = url::Url::parse(&self.url).map_err(|e| ConnectionError::InvalidConfig {
            name: self.name.clone(),
            reason: format!("url: {}", e),
        })?;
        let cannot = |_| ConnectionError::InvalidConfig {
            name: self.name.clone(),
            reason: "url cannot carry credentials".into(),
        };
        if let Some(user) = &self.user {
            url.set_username(user).map_err(cannot)?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(cannot)?;
        }
        Ok(url.to_string())
    }

    /// Read a JSON array of connection definitions.
    pub fn load_list(path: impl AsRef<Path>) -> Result<Vec<ConnectionConfig>, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let list: Vec<ConnectionConfig> = serde_json::from_str(&text)?;
        for c in &list {
            c.validate().map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        Ok(list)
    }
}

/// Connect URL with any embedded password replaced by `***`.
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) if u.password().is_some() => {
            let _ = u.set_password(Some("***"));
            u.to_string()
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_json() {
        let c: ConnectionConfig = serde_json::from_str(r#"{ "name": "main", "url": "postgres://db/app" }"#).unwrap();
        assert_eq!((c.pool_min, c.pool_max, c.pool_increment, c.pool_timeout), (2, 10, 1, 4));
        assert!(!c.is_default);
    }

    #[test]
    fn credentials_are_injected_and_masked() {
        let c = ConnectionConfig::new("main", "postgres://db:5432/app").credentials("app", "s3cret");
        assert_eq!(c.connect_url().unwrap(), "postgres://app:s3cret@db:5432/app");
        let shown = format!("{:?}", c);
        assert!(!shown.contains("s3cret"));
        assert_eq!(mask_url("postgres://app:s3cret@db/app"), "postgres://app:***@db/app");
    }

    #[test]
    fn validate_rejects_bad_sizes_and_schemes() {
        let c = ConnectionConfig::new("x", "postgres://db/app").pool_size(5, 2);
        assert!(matches!(c.validate(), Err(ConnectionError::InvalidConfig { .. })));
        let c = ConnectionConfig::new("x", "oracle://db/app");
        assert!(matches!(c.validate(), Err(ConnectionError::UnsupportedBackend { .. })));
    }
}
