//! In-process TTL cache with least-frequently-used eviction.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub max_size: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            default_ttl: Duration::from_secs(300),
            max_size: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub average_access_count: f64,
    pub oldest_entry_age_ms: u64,
    pub newest_entry_age_ms: u64,
}

struct CacheEntry<V> {
    value: V,
    written_at: Instant,
    ttl: Duration,
    access_count: AtomicU64,
    /// Nanoseconds since the cache's epoch.
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) > self.ttl
    }
}

/// Thread-safe cache. Reads share a read lock; access counters are atomics.
pub struct MemoryCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    settings: CacheSettings,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    pub fn new(settings: CacheSettings) -> Self {
        MemoryCache {
            entries: RwLock::new(HashMap::new()),
            settings: CacheSettings {
                max_size: settings.max_size.max(1),
                ..settings
            },
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|p| {
            tracing::warn!("cache lock poisoned; continuing with inner state");
            p.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|p| {
            tracing::warn!("cache lock poisoned; continuing with inner state");
            p.into_inner()
        })
    }

    fn tick(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Store `value`; `ttl` falls back to the default. Writing a new key into a full cache
    /// evicts exactly one entry first.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            written_at: now,
            ttl: ttl.filter(|t| !t.is_zero()).unwrap_or(self.settings.default_ttl),
            access_count: AtomicU64::new(0),
            last_access: AtomicU64::new(self.tick(now)),
        };
        let mut entries = self.write();
        if !entries.contains_key(&key) && entries.len() >= self.settings.max_size {
            if let Some(victim) = least_used(&entries) {
                entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %victim, "cache eviction");
            }
        }
        entries.insert(key, entry);
    }

    /// Live value for `key`. Expired entries are removed and count as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    entry.last_access.store(self.tick(now), Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }
        let mut entries = self.write();
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// True when a live entry exists. Does not count as an access.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.read().get(key).map(|e| !e.is_expired(now)).unwrap_or(false)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove every key matching `pattern`; returns how many went.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|k, _| !pattern.is_match(k));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(pattern = %pattern, removed, "cache invalidation");
        }
        removed
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries now; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "cache sweep");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.read();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_access: u64 = entries.values().map(|e| e.access_count.load(Ordering::Relaxed)).sum();
        let ages = entries.values().map(|e| now.saturating_duration_since(e.written_at).as_millis() as u64);
        let (oldest, newest) = ages.fold((0u64, u64::MAX), |(o, n), a| (o.max(a), n.min(a)));
        CacheStats {
            size: entries.len(),
            max_size: self.settings.max_size,
            hits,
            misses,
            hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            average_access_count: if entries.is_empty() {
                0.0
            } else {
                total_access as f64 / entries.len() as f64
            },
            oldest_entry_age_ms: oldest,
            newest_entry_age_ms: if entries.is_empty() { 0 } else { newest },
        }
    }

    /// Sweep expired entries every `sweep_interval` on the current runtime. The task holds
    /// a weak reference and ends once the cache is dropped or closed.
    pub fn start_sweeper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.settings.sweep_interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.purge_expired();
                    }
                    None => break,
                }
            }
        });
        let mut slot = self.sweeper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Stop the sweeper and drop every entry.
    pub fn close(&self) {
        if let Some(task) = self.sweeper.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        self.clear();
    }
}

impl<V> Drop for MemoryCache<V> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Key with the lowest access count; ties go to the least recently accessed.
fn least_used<V>(entries: &HashMap<String, CacheEntry<V>>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, e)| {
            (
                e.access_count.load(Ordering::Relaxed),
                e.last_access.load(Ordering::Relaxed),
            )
        })
        .map(|(k, _)| k.clone())
}
