//! Expiring object cache.
//!
//! The [`EntityCache`] maps [`EntityId`]s to live objects with a per-entry
//! expiry computed at write time from the entity's [`CacheStrategy`]. Reads
//! evict expired entries on demand; [`EntityCache::clear_expired_records`]
//! sweeps the whole table and is meant for a maintenance owner.
//!
//! # Design
//!
//! The cache is shared behind `Arc` and may be touched from more than one
//! thread, so every operation runs under one mutex. Time is read through a
//! [`Clock`] so tests can move it by hand.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(EntityCache::new(CacheConfig::default()));
//! cache.add(&id, object.clone());
//! assert!(cache.get(&id).is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use relmap_core::{CacheStrategy, ObjectRef};
use serde::Deserialize;

use crate::entity_id::EntityId;

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lifetimes the cache strategies map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL under `Normal`, and the floor added to the `Statistical` estimate.
    pub short_life: Duration,
    /// Upper interval seed for the `Statistical` estimate.
    pub long_life: Duration,
    /// TTL under `DistantFuture`.
    pub distant_future: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_life: Duration::from_secs(30),
            long_life: Duration::from_secs(180),
            distant_future: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Running extremes of the interval between cache writes.
#[derive(Debug)]
struct WriteStat {
    last: Option<Instant>,
    min_interval: Duration,
    max_interval: Duration,
}

impl WriteStat {
    fn new(config: &CacheConfig) -> Self {
        Self {
            last: None,
            min_interval: config.short_life,
            max_interval: config.long_life,
        }
    }

    fn record(&mut self, now: Instant, config: &CacheConfig) {
        // The first write counts as one long interval.
        let interval = match self.last {
            Some(last) => now.saturating_duration_since(last),
            None => config.long_life,
        };
        self.last = Some(now);
        self.min_interval = self.min_interval.min(interval);
        self.max_interval = self.max_interval.max(interval);
    }

    fn ttl(&self, config: &CacheConfig) -> Duration {
        (self.min_interval + self.max_interval) / 2 + config.short_life
    }
}

#[derive(Debug)]
struct CachedRecord {
    object: ObjectRef,
    expires_at: Instant,
}

#[derive(Debug)]
struct State {
    records: HashMap<EntityId, CachedRecord>,
    stat: WriteStat,
}

/// Thread-safe map from identity to live object with per-entry expiry.
#[derive(Debug)]
pub struct EntityCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl EntityCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                records: HashMap::new(),
                stat: WriteStat::new(&config),
            }),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace. Entities under `CacheStrategy::None` are never
    /// stored, but still feed the write statistics.
    pub fn add(&self, id: &EntityId, object: ObjectRef) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.stat.record(now, &self.config);

        let ttl = match id.strategy() {
            CacheStrategy::None => return,
            CacheStrategy::Normal => self.config.short_life,
            CacheStrategy::Statistical => state.stat.ttl(&self.config),
            CacheStrategy::DistantFuture => self.config.distant_future,
        };
        let record = CachedRecord {
            object,
            expires_at: now + ttl,
        };
        if state.records.insert(id.clone(), record).is_some() {
            tracing::debug!(entity_id = %id, ttl_ms = ttl.as_millis() as u64, "cache entry replaced");
        } else {
            tracing::debug!(entity_id = %id, ttl_ms = ttl.as_millis() as u64, "object cached");
        }
    }

    /// The live object, unless absent or expired. Expired entries are
    /// evicted by this call.
    pub fn get(&self, id: &EntityId) -> Option<ObjectRef> {
        if id.strategy() == CacheStrategy::None {
            return None;
        }
        let now = self.clock.now();
        let mut state = self.lock();
        match state.records.get(id) {
            Some(record) if record.expires_at >= now => {
                tracing::trace!(entity_id = %id, "cache hit");
                Some(record.object.clone())
            }
            Some(_) => {
                state.records.remove(id);
                tracing::debug!(entity_id = %id, "expired cache entry evicted");
                None
            }
            None => None,
        }
    }

    /// Is there an entry, expired or not?
    pub fn contains(&self, id: &EntityId) -> bool {
        self.lock().records.contains_key(id)
    }

    pub fn remove(&self, id: &EntityId) -> Option<ObjectRef> {
        let removed = self.lock().records.remove(id).map(|record| record.object);
        if removed.is_some() {
            tracing::debug!(entity_id = %id, "removed from cache");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().records.clear();
        tracing::debug!("cache cleared");
    }

    /// Drop every expired entry and return how many went.
    pub fn clear_expired_records(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|_, record| record.expires_at >= now);
        let removed = before - state.records.len();
        if removed > 0 {
            tracing::debug!(removed = removed, "expired cache entries cleared");
        }
        removed
    }

    /// Entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// TTL a `Statistical` entry written now would get.
    pub fn statistical_ttl(&self) -> Duration {
        self.lock().stat.ttl(&self.config)
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
