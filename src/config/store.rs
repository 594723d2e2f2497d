//! Reloadable entity definition store.

use crate::config::loader::{load_from_path, load_from_str};
use crate::config::resolved::{EntityCatalog, EntityDefinition, PageSettings};
use crate::error::ConfigError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Holds the active catalog. Readers clone an `Arc` of the whole catalog, so a reload
/// is observed either entirely or not at all.
#[derive(Debug, Default)]
pub struct EntityStore {
    catalog: RwLock<Arc<EntityCatalog>>,
    source: RwLock<Option<PathBuf>>,
}

impl EntityStore {
    pub fn new(catalog: EntityCatalog) -> Self {
        EntityStore {
            catalog: RwLock::new(Arc::new(catalog)),
            source: RwLock::new(None),
        }
    }

    /// Load from a file and remember the path for [`EntityStore::reload`].
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let catalog = load_from_path(path)?;
        tracing::info!(path = %path.display(), entities = catalog.entities.len(), "entity definitions loaded");
        Ok(EntityStore {
            catalog: RwLock::new(Arc::new(catalog)),
            source: RwLock::new(Some(path.to_path_buf())),
        })
    }

    pub fn load_from_str(json: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(load_from_str(json)?))
    }

    /// Snapshot of the active catalog.
    pub fn catalog(&self) -> Arc<EntityCatalog> {
        match self.catalog.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityDefinition>> {
        self.catalog().get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.catalog().names()
    }

    pub fn settings(&self) -> PageSettings {
        self.catalog().settings
    }

    /// Swap in a new catalog.
    pub fn replace(&self, catalog: EntityCatalog) {
        let next = Arc::new(catalog);
        match self.catalog.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-read the file this store was loaded from. On error the previous catalog stays active.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = self
            .source
            .read()
            .ok()
            .and_then(|p| p.clone())
            .ok_or_else(|| ConfigError::Load("store was not loaded from a file".into()))?;
        self.reload_from_path(&path)
    }

    pub fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        match load_from_path(path) {
            Ok(catalog) => {
                tracing::info!(path = %path.display(), entities = catalog.entities.len(), "entity definitions reloaded");
                self.replace(catalog);
                if let Ok(mut source) = self.source.write() {
                    *source = Some(path.to_path_buf());
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "reload rejected; keeping previous definitions");
                Err(e)
            }
        }
    }

    /// Replace definitions from an in-memory document. On error the previous catalog stays active.
    pub fn reload_from_str(&self, json: &str) -> Result<(), ConfigError> {
        let catalog = load_from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "reload rejected; keeping previous definitions");
            e
        })?;
        self.replace(catalog);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ONE: &str = r#"{ "entities": { "a": { "tableName": "a", "primaryKey": "ID",
        "fields": { "ID": { "type": "integer", "primaryKey": true } } } } }"#;
    const TWO: &str = r#"{ "entities": {
        "a": { "tableName": "a", "primaryKey": "ID", "fields": { "ID": { "type": "integer", "primaryKey": true } } },
        "b": { "tableName": "b", "primaryKey": "ID", "fields": { "ID": { "type": "integer", "primaryKey": true } } } } }"#;

    #[test]
    fn failed_reload_keeps_previous_catalog() {
        let store = EntityStore::load_from_str(ONE).unwrap();
        let before = store.catalog();
        assert!(store.reload_from_str("{ not json").is_err());
        assert!(Arc::ptr_eq(&before, &store.catalog()));
        assert_eq!(store.names(), ["a"]);
    }

    #[test]
    fn reload_from_file_swaps_whole_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ONE.as_bytes()).unwrap();
        let store = EntityStore::load_from_path(file.path()).unwrap();
        let snapshot = store.catalog();

        std::fs::write(file.path(), TWO).unwrap();
        store.reload().unwrap();
        assert_eq!(store.names(), ["a", "b"]);
        // Earlier snapshot is untouched.
        assert_eq!(snapshot.names(), ["a"]);
    }

    #[test]
    fn reload_without_source_fails() {
        let store = EntityStore::load_from_str(ONE).unwrap();
        assert!(matches!(store.reload(), Err(ConfigError::Load(_))));
    }
}
