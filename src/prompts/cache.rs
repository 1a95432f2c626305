//! Two-tier composed-prompt cache.
//!
//! The in-process LRU tier is authoritative for correctness; the optional
//! shared tier (a Redis-like KV behind [`SharedCache`]) is a best-effort
//! optimisation whose failures are logged and swallowed to keep liveness
//! under partial outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use super::models::ComposedPrompt;

/// Default in-process capacity.
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

/// Shared cache tier contract (e.g. Redis). All methods may fail; the
/// owning [`PromptCache`] treats every failure as a miss.
pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<ComposedPrompt>>;
    fn set(&self, key: &str, value: &ComposedPrompt) -> anyhow::Result<()>;
    fn invalidate(&self, key: &str) -> anyhow::Result<()>;
    fn invalidate_pattern(&self, pattern: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

struct LruState {
    entries: HashMap<String, ComposedPrompt>,
    /// Access order, least recently used first.
    order: Vec<String>,
}

impl LruState {
    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(position);
            self.order.push(key);
        }
    }
}

/// Cache statistics, maintained across both tiers.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

/// Two-tier cache for composed prompts.
pub struct PromptCache {
    memory: Mutex<LruState>,
    capacity: usize,
    shared: Option<Arc<dyn SharedCache>>,
    stats: CacheStats,
}

impl PromptCache {
    /// Memory-only cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            memory: Mutex::new(LruState {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            capacity: capacity.max(1),
            shared: None,
            stats: CacheStats::default(),
        }
    }

    /// Builder: attach a shared tier.
    pub fn with_shared(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Look up a composed prompt. Memory first, then the shared tier; a
    /// shared hit is promoted into memory.
    pub fn get(&self, key: &str) -> Option<ComposedPrompt> {
        {
            let mut memory = self.memory.lock();
            if let Some(value) = memory.entries.get(key).cloned() {
                memory.touch(key);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
        }

        if let Some(shared) = &self.shared {
            match shared.get(key) {
                Ok(Some(value)) => {
                    debug!(key, "shared cache hit, promoting to memory");
                    self.insert_memory(key, value.clone());
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Ok(None) => {}
                Err(error) => warn!(key, %error, "shared cache get failed"),
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store in both tiers.
    pub fn set(&self, key: &str, value: &ComposedPrompt) {
        self.insert_memory(key, value.clone());
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.set(key, value) {
                warn!(key, %error, "shared cache set failed");
            }
        }
    }

    /// Drop one key from both tiers.
    pub fn invalidate(&self, key: &str) {
        {
            let mut memory = self.memory.lock();
            memory.entries.remove(key);
            memory.order.retain(|k| k != key);
        }
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.invalidate(key) {
                warn!(key, %error, "shared cache invalidate failed");
            }
        }
    }

    /// Drop every key matching a `*` glob from both tiers.
    pub fn invalidate_pattern(&self, pattern: &str) {
        let matcher = glob_to_regex(pattern);
        {
            let mut memory = self.memory.lock();
            let doomed: Vec<String> = memory
                .entries
                .keys()
                .filter(|key| matcher.is_match(key))
                .cloned()
                .collect();
            for key in &doomed {
                memory.entries.remove(key);
            }
            memory.order.retain(|k| !matcher.is_match(k));
        }
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.invalidate_pattern(pattern) {
                warn!(pattern, %error, "shared cache pattern invalidation failed");
            }
        }
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        {
            let mut memory = self.memory.lock();
            memory.entries.clear();
            memory.order.clear();
        }
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.clear() {
                warn!(%error, "shared cache clear failed");
            }
        }
    }

    /// (hits, misses, evictions) so far.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.hits.load(Ordering::Relaxed),
            self.stats.misses.load(Ordering::Relaxed),
            self.stats.evictions.load(Ordering::Relaxed),
        )
    }

    fn insert_memory(&self, key: &str, value: ComposedPrompt) {
        let mut memory = self.memory.lock();
        if memory.entries.contains_key(key) {
            memory.entries.insert(key.to_string(), value);
            memory.touch(key);
            return;
        }

        if memory.entries.len() >= self.capacity {
            if !memory.order.is_empty() {
                let evicted = memory.order.remove(0);
                memory.entries.remove(&evicted);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        memory.entries.insert(key.to_string(), value);
        memory.order.push(key.to_string());
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a `*` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Regex {
    static FALLBACK: Lazy<Regex> =
        Lazy::new(|| Regex::new("^$").expect("empty regex is valid"));

    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped)).unwrap_or_else(|_| FALLBACK.clone())
}
