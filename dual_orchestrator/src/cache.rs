//! Three-tier in-memory cache with per-tier TTL and statistics.
//!
//! * Tier 1 holds routed call results (seconds to minutes).
//! * Tier 2 holds composed artifacts such as workflow outputs (minutes).
//! * Tier 3 holds long-lived session data (days).
//!
//! Expired entries are evicted lazily on read, or in bulk by
//! [`MultiTierCache::cleanup_expired`]. The cache itself does no locking;
//! owners that share it wrap it in a mutex (see [`spawn_maintenance`]).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::OrchestrationError;
use crate::settings::CacheConfig;

/// Cache tier selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Results,
    Compositions,
    Sessions,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Results, CacheTier::Compositions, CacheTier::Sessions];

    /// 1-based level number
    pub fn level(self) -> u8 {
        match self {
            CacheTier::Results => 1,
            CacheTier::Compositions => 2,
            CacheTier::Sessions => 3,
        }
    }

    fn index(self) -> usize {
        self.level() as usize - 1
    }
}

impl TryFrom<u8> for CacheTier {
    type Error = OrchestrationError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(CacheTier::Results),
            2 => Ok(CacheTier::Compositions),
            3 => Ok(CacheTier::Sessions),
            other => Err(OrchestrationError::InvalidCacheTier(other)),
        }
    }
}

/// Cache entry with expiry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            hits: 0,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TierCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct Tier<V> {
    entries: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    counters: TierCounters,
}

impl<V> Tier<V> {
    fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            counters: TierCounters::default(),
        }
    }
}

/// Statistics for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub evictions: u64,
}

/// Statistics for all tiers, keyed `level_1` .. `level_3`
pub type CacheStats = BTreeMap<String, TierStats>;

/// Multi-tier cache system
#[derive(Debug)]
pub struct MultiTierCache<V = Value> {
    tiers: [Tier<V>; 3],
}

impl<V> Default for MultiTierCache<V> {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl<V> MultiTierCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            tiers: [
                Tier::new(Duration::from_secs(config.results_ttl_secs)),
                Tier::new(Duration::from_secs(config.compositions_ttl_secs)),
                Tier::new(Duration::from_secs(config.sessions_ttl_secs)),
            ],
        }
    }

    fn tier_mut(&mut self, tier: CacheTier) -> &mut Tier<V> {
        &mut self.tiers[tier.index()]
    }

    /// Store `value`, replacing any previous entry. `ttl` defaults to the tier's TTL.
    pub fn set(&mut self, key: impl Into<String>, value: V, tier: CacheTier, ttl: Option<Duration>) {
        let store = self.tier_mut(tier);
        let ttl = ttl.unwrap_or(store.default_ttl);
        store.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    pub fn delete(&mut self, key: &str, tier: CacheTier) -> bool {
        self.tier_mut(tier).entries.remove(key).is_some()
    }

    /// Clear one tier, or every tier when `tier` is `None`. Statistics are kept.
    pub fn clear(&mut self, tier: Option<CacheTier>) {
        match tier {
            Some(tier) => self.tier_mut(tier).entries.clear(),
            None => self.tiers.iter_mut().for_each(|t| t.entries.clear()),
        }
    }

    /// Remove every expired entry from all tiers, returning how many were evicted.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for tier in &mut self.tiers {
            let before = tier.entries.len();
            tier.entries.retain(|_, entry| !entry.is_expired_at(now));
            let removed = before - tier.entries.len();
            tier.counters.evictions += removed as u64;
            evicted += removed;
        }

        if evicted > 0 {
            debug!(evicted, "Cleaned up expired cache entries");
        }
        evicted
    }

    pub fn len(&self, tier: CacheTier) -> usize {
        self.tiers[tier.index()].entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(|t| t.entries.is_empty())
    }

    pub fn stats(&self) -> CacheStats {
        CacheTier::ALL
            .iter()
            .map(|tier| {
                let store = &self.tiers[tier.index()];
                let TierCounters { hits, misses, evictions } = store.counters;
                let total = hits + misses;
                let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
                (
                    format!("level_{}", tier.level()),
                    TierStats {
                        hits,
                        misses,
                        hit_rate,
                        size: store.entries.len(),
                        evictions,
                    },
                )
            })
            .collect()
    }
}

impl<V: Clone> MultiTierCache<V> {
    /// Look up `key`, counting a hit or a miss. An expired entry is evicted and reported absent.
    pub fn get(&mut self, key: &str, tier: CacheTier) -> Option<V> {
        let now = Instant::now();
        let store = self.tier_mut(tier);

        let expired = match store.entries.get_mut(key) {
            None => {
                store.counters.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired_at(now) => true,
            Some(entry) => {
                entry.hits += 1;
                store.counters.hits += 1;
                return Some(entry.value.clone());
            }
        };

        if expired {
            store.entries.remove(key);
            store.counters.misses += 1;
            store.counters.evictions += 1;
        }
        None
    }
}

/// Periodically sweep expired entries from a shared cache.
pub fn spawn_maintenance<V>(cache: Arc<Mutex<MultiTierCache<V>>>, interval: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = cache.lock().cleanup_expired();
            if evicted > 0 {
                info!(evicted, "Cache maintenance sweep");
            }
        }
    })
}
