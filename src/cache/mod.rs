//! Read-through cache for entity lists and items.

pub mod keys;
pub mod memory;

pub use keys::{canonical_json, entity_and_item_pattern, item_key, list_key, list_pattern};
pub use memory::{CacheSettings, CacheStats, MemoryCache};

use regex::Regex;
use serde_json::Value;
use std::time::Duration;

/// Cache backend the CRUD service talks to.
pub trait CacheStrategy: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);
    /// Remove every key matching `pattern`; returns how many went.
    fn invalidate(&self, pattern: &Regex) -> usize;
    fn stats(&self) -> Option<CacheStats> {
        None
    }
}

impl CacheStrategy for MemoryCache<Value> {
    fn get(&self, key: &str) -> Option<Value> {
        MemoryCache::get(self, key)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        MemoryCache::set(self, key, value, ttl)
    }

    fn invalidate(&self, pattern: &Regex) -> usize {
        self.invalidate_pattern(pattern)
    }

    fn stats(&self) -> Option<CacheStats> {
        Some(MemoryCache::stats(self))
    }
}

/// Caching disabled: every read goes to the backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl CacheStrategy for NoCache {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) {}

    fn invalidate(&self, _pattern: &Regex) -> usize {
        0
    }
}
