//! Fingerprint-keyed response cache with TTL, LRU eviction, and
//! per-fingerprint single-flight coordination.
//!
//! Two requests with identical canonical prompt text share a fingerprint
//! (SHA-256 of the rendered prompt). Entries expire after a configured TTL
//! and the in-memory tier is bounded by LRU eviction. An optional durable
//! tier mirrors entries to disk so the cache survives restarts.
//!
//! Single-flight: callers that miss must hold the fingerprint's fill lock
//! while driving the provider call, so at most one provider call per
//! fingerprint is in flight; concurrent callers block on the lock and then
//! observe the freshly filled entry.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::router::RoutedCompletion;

/// Keep the fill-lock map from growing without bound.
const FLIGHT_MAP_SWEEP_AT: usize = 128;

/// Compute the stable fingerprint of a canonical prompt text.
pub fn fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// One cached completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: RoutedCompletion,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(response: RoutedCompletion) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.cached_at);
        age.num_milliseconds() >= ttl.as_millis() as i64
    }
}

/// Cache hit/miss statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// Hits / total lookups, in percent. 0 when there were no lookups.
    pub hit_rate_percent: f64,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Thread-safe completion cache with TTL and LRU bounds.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    durable_dir: Option<PathBuf>,
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseCache {
    /// Create a cache with the given TTL and maximum entry count.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        info!(
            ttl_secs = ttl.as_secs(),
            max_entries, "response cache initialized"
        );
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(
                    NonZeroUsize::new(max_entries.max(1)).expect("max(1) is non-zero"),
                ),
                hits: 0,
                misses: 0,
            }),
            ttl,
            durable_dir: None,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Enable the durable tier under `<data_dir>/response_cache/`.
    pub fn with_durable_dir(mut self, data_dir: &std::path::Path) -> Self {
        self.durable_dir = Some(data_dir.join("response_cache"));
        self
    }

    /// Return the cached response for `fp` if present and unexpired.
    ///
    /// Promotes the entry's LRU position. On an in-memory miss with the
    /// durable tier enabled, falls through to disk before reporting a miss.
    pub fn get(&self, fp: &str) -> Option<RoutedCompletion> {
        let mut inner = self.inner.lock().expect("response cache lock poisoned");

        let expired = inner.entries.get(fp).map(|entry| entry.is_expired(self.ttl));
        if let Some(expired) = expired {
            if expired {
                inner.entries.pop(fp);
                inner.misses += 1;
                debug!(fingerprint = %&fp[..12.min(fp.len())], "cache entry expired");
                return None;
            }
            inner.hits += 1;
            return Some(inner.entries.get(fp).unwrap().response.clone());
        }

        // In-memory miss: try the durable tier.
        if let Some(entry) = self.read_durable(fp) {
            if !entry.is_expired(self.ttl) {
                let response = entry.response.clone();
                inner.entries.put(fp.to_string(), entry);
                inner.hits += 1;
                debug!(fingerprint = %&fp[..12.min(fp.len())], "durable tier hit");
                return Some(response);
            }
        }

        inner.misses += 1;
        None
    }

    /// Insert or replace an entry, evicting the least-recently-used entry
    /// past the size bound. Writes through to the durable tier if enabled.
    pub fn set(&self, fp: &str, response: RoutedCompletion) {
        let entry = CacheEntry::new(response);
        if let Some(ref dir) = self.durable_dir {
            if let Err(e) = write_durable(dir, fp, &entry) {
                warn!(error = %e, "durable cache write failed");
            }
        }
        let mut inner = self.inner.lock().expect("response cache lock poisoned");
        inner.entries.put(fp.to_string(), entry);
    }

    /// Drop all entries (memory and durable tier).
    pub fn clear_all(&self) {
        let count = {
            let mut inner = self.inner.lock().expect("response cache lock poisoned");
            let count = inner.entries.len();
            inner.entries.clear();
            count
        };
        if let Some(ref dir) = self.durable_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
        info!(entries_removed = count, "cache cleared");
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("response cache lock poisoned");
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            hit_rate_percent: if total > 0 {
                inner.hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// The fill lock for a fingerprint.
    ///
    /// A caller about to fill a miss must hold this lock across its
    /// provider call; other callers for the same fingerprint block here
    /// instead of issuing duplicate provider calls.
    pub fn fill_lock(&self, fp: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut flights = self.flights.lock().expect("response cache lock poisoned");
        if flights.len() > FLIGHT_MAP_SWEEP_AT {
            flights.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        flights
            .entry(fp.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── Durable tier ────────────────────────────────────────────────

    fn read_durable(&self, fp: &str) -> Option<CacheEntry> {
        let dir = self.durable_dir.as_ref()?;
        let text = std::fs::read_to_string(dir.join(format!("{fp}.json"))).ok()?;
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "corrupt durable cache entry ignored");
                None
            }
        }
    }
}

fn write_durable(dir: &std::path::Path, fp: &str, entry: &CacheEntry) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string(entry).map_err(std::io::Error::other)?;
    let path = dir.join(format!("{fp}.json"));
    let tmp = dir.join(format!("{fp}.json.tmp"));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}
