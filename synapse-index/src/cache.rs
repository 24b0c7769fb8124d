//! Unified cache over vectors, hot metadata, and HNSW node records.
//!
//! One byte-budgeted LRU spans all three entry variants so eviction
//! pressure is shared. Entries are `Arc`ed; an entry whose value is still
//! referenced by an in-flight operation is pinned and skipped at eviction.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use synapse_core::config::CacheConfig;
use synapse_core::{NounRecord, SynapseId};
use tracing::debug;

/// Entry variant discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Vector,
    Metadata,
    HnswNode,
}

impl CacheKind {
    const ALL: [CacheKind; 3] = [CacheKind::Vector, CacheKind::Metadata, CacheKind::HnswNode];

    fn index(self) -> usize {
        match self {
            CacheKind::Vector => 0,
            CacheKind::Metadata => 1,
            CacheKind::HnswNode => 2,
        }
    }
}

/// A cached value; the `Arc` doubles as the pin.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Vector(Arc<Vec<f32>>),
    Metadata(Arc<serde_json::Value>),
    HnswNode(Arc<NounRecord>),
}

impl CacheValue {
    pub fn kind(&self) -> CacheKind {
        match self {
            CacheValue::Vector(_) => CacheKind::Vector,
            CacheValue::Metadata(_) => CacheKind::Metadata,
            CacheValue::HnswNode(_) => CacheKind::HnswNode,
        }
    }

    fn bytes(&self) -> u64 {
        match self {
            CacheValue::Vector(v) => 16 + 4 * v.len() as u64,
            CacheValue::Metadata(v) => 16 + json_size(v),
            CacheValue::HnswNode(r) => {
                48 + 4 * r.vector.len() as u64
                    + r.connections
                        .values()
                        .map(|layer| 16 * layer.len() as u64)
                        .sum::<u64>()
            }
        }
    }

    fn pinned(&self) -> bool {
        match self {
            CacheValue::Vector(v) => Arc::strong_count(v) > 1,
            CacheValue::Metadata(v) => Arc::strong_count(v) > 1,
            CacheValue::HnswNode(v) => Arc::strong_count(v) > 1,
        }
    }
}

fn json_size(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(_) => 8,
        serde_json::Value::Number(_) => 16,
        serde_json::Value::String(s) => 24 + s.len() as u64,
        serde_json::Value::Array(items) => 24 + items.iter().map(json_size).sum::<u64>(),
        serde_json::Value::Object(map) => {
            24 + map
                .iter()
                .map(|(k, v)| 24 + k.len() as u64 + json_size(v))
                .sum::<u64>()
        }
    }
}

type CacheKey = (CacheKind, SynapseId);

struct Inner {
    lru: LruCache<CacheKey, CacheValue>,
    bytes: [u64; 3],
}

/// Cache statistics and tuning hints.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub budget_bytes: u64,
    pub total_bytes: u64,
    pub hit_rate: f64,
    pub entries: usize,
    /// Bytes held per variant (vector, metadata, hnsw-node)
    pub bytes_per_kind: [u64; 3],
    /// Share of accesses per variant
    pub access_share: [f64; 3],
    /// True when one variant holds most bytes while receiving few accesses
    pub fairness_violation: bool,
    pub recommendations: Vec<String>,
}

/// Single LRU over the three entry variants, sized in bytes.
pub struct UnifiedCache {
    inner: Mutex<Inner>,
    budget: AtomicU64,
    hits: [AtomicU64; 3],
    misses: [AtomicU64; 3],
    config: CacheConfig,
    /// Advisory note from the resource sensor, surfaced in stats
    pressure_note: RwLock<Option<String>>,
}

impl UnifiedCache {
    pub fn new(budget_bytes: u64, config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                bytes: [0; 3],
            }),
            budget: AtomicU64::new(budget_bytes),
            hits: Default::default(),
            misses: Default::default(),
            config,
            pressure_note: RwLock::new(None),
        }
    }

    /// Look up an entry, promoting it on hit.
    pub fn get(&self, kind: CacheKind, id: SynapseId) -> Option<CacheValue> {
        let mut inner = self.inner.lock();
        match inner.lru.get(&(kind, id)) {
            Some(value) => {
                self.hits[kind.index()].fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses[kind.index()].fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, evicting to budget.
    pub fn insert(&self, id: SynapseId, value: CacheValue) {
        let kind = value.kind();
        let size = value.bytes();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.lru.put((kind, id), value) {
            inner.bytes[kind.index()] = inner.bytes[kind.index()].saturating_sub(old.bytes());
        }
        inner.bytes[kind.index()] += size;

        self.evict_to_budget(&mut inner);
    }

    /// Drop one variant of an entity.
    pub fn invalidate(&self, kind: CacheKind, id: SynapseId) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.lru.pop(&(kind, id)) {
            inner.bytes[kind.index()] = inner.bytes[kind.index()].saturating_sub(old.bytes());
        }
    }

    /// Drop every variant of an entity; used on update and delete.
    pub fn invalidate_entity(&self, id: SynapseId) {
        for kind in CacheKind::ALL {
            self.invalidate(kind, id);
        }
    }

    /// Replace the byte budget (resource sensor resize).
    pub fn set_budget(&self, bytes: u64) {
        self.budget.store(bytes, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        self.evict_to_budget(&mut inner);
    }

    /// Attach an advisory note from the resource sensor.
    pub fn set_pressure_note(&self, note: Option<String>) {
        *self.pressure_note.write() = note;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let budget = self.budget.load(Ordering::Relaxed);
        let total: u64 = inner.bytes.iter().sum();

        let mut hits = 0u64;
        let mut accesses_per_kind = [0u64; 3];
        for i in 0..3 {
            let h = self.hits[i].load(Ordering::Relaxed);
            hits += h;
            accesses_per_kind[i] = h + self.misses[i].load(Ordering::Relaxed);
        }
        let accesses: u64 = accesses_per_kind.iter().sum();

        let access_share = accesses_per_kind.map(|a| {
            if accesses == 0 {
                0.0
            } else {
                a as f64 / accesses as f64
            }
        });

        let fairness_violation = self
            .overrepresented(&inner.bytes, &access_share, total)
            .is_some();

        let hit_rate = if accesses == 0 {
            0.0
        } else {
            hits as f64 / accesses as f64
        };

        let mut recommendations = Vec::new();
        if accesses > 100 && hit_rate < 0.5 {
            recommendations
                .push("hit rate below 50%; consider raising cache.max_size".to_string());
        }
        if fairness_violation {
            recommendations.push(
                "one entry variant dominates cache bytes with few accesses; eviction is rebalancing"
                    .to_string(),
            );
        }
        if let Some(note) = self.pressure_note.read().clone() {
            recommendations.push(note);
        }

        CacheStats {
            budget_bytes: budget,
            total_bytes: total,
            hit_rate,
            entries: inner.lru.len(),
            bytes_per_kind: inner.bytes,
            access_share,
            fairness_violation,
            recommendations,
        }
    }

    /// The variant violating the fairness rule, if any.
    fn overrepresented(
        &self,
        bytes: &[u64; 3],
        access_share: &[f64; 3],
        total: u64,
    ) -> Option<CacheKind> {
        if total == 0 {
            return None;
        }
        CacheKind::ALL.into_iter().find(|kind| {
            let share = bytes[kind.index()] as f64 / total as f64;
            share > self.config.fairness_byte_share
                && access_share[kind.index()] < self.config.fairness_access_share
        })
    }

    fn evict_to_budget(&self, inner: &mut Inner) {
        let budget = self.budget.load(Ordering::Relaxed);

        let mut accesses_per_kind = [0u64; 3];
        for i in 0..3 {
            accesses_per_kind[i] =
                self.hits[i].load(Ordering::Relaxed) + self.misses[i].load(Ordering::Relaxed);
        }
        let accesses: u64 = accesses_per_kind.iter().sum();
        let access_share = accesses_per_kind.map(|a| {
            if accesses == 0 {
                0.0
            } else {
                a as f64 / accesses as f64
            }
        });

        // Bounded pass: pinned entries are promoted instead of dropped, so
        // one sweep over the map suffices before giving up.
        let mut remaining = inner.lru.len();
        while inner.bytes.iter().sum::<u64>() > budget && remaining > 0 {
            remaining -= 1;
            let total: u64 = inner.bytes.iter().sum();
            let forced = self.overrepresented(&inner.bytes, &access_share, total);

            let victim_key = match forced {
                Some(kind) => inner
                    .lru
                    .iter()
                    .rev()
                    .find(|((k, _), _)| *k == kind)
                    .map(|(key, _)| *key),
                None => inner.lru.iter().rev().next().map(|(key, _)| *key),
            };

            let Some(key) = victim_key else { break };
            let pinned = inner.lru.peek(&key).is_some_and(CacheValue::pinned);
            if pinned {
                inner.lru.promote(&key);
                continue;
            }
            if let Some(old) = inner.lru.pop(&key) {
                inner.bytes[key.0.index()] =
                    inner.bytes[key.0.index()].saturating_sub(old.bytes());
                debug!(kind = ?key.0, id = %key.1, forced = forced.is_some(), "evicted cache entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vector_entry(len: usize) -> CacheValue {
        CacheValue::Vector(Arc::new(vec![0.0; len]))
    }

    #[test]
    fn test_hit_miss_accounting() {
        let cache = UnifiedCache::new(1 << 20, CacheConfig::default());
        let id = SynapseId::new();

        assert!(cache.get(CacheKind::Vector, id).is_none());
        cache.insert(id, vector_entry(8));
        assert!(cache.get(CacheKind::Vector, id).is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_eviction_respects_budget() {
        // Budget fits roughly two 100-float vectors
        let cache = UnifiedCache::new(900, CacheConfig::default());
        for _ in 0..5 {
            cache.insert(SynapseId::new(), vector_entry(100));
        }
        let stats = cache.stats();
        assert!(stats.total_bytes <= 900);
        assert!(stats.entries < 5);
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let cache = UnifiedCache::new(900, CacheConfig::default());
        let pinned_id = SynapseId::new();
        let value = Arc::new(vec![0.0f32; 100]);
        cache.insert(pinned_id, CacheValue::Vector(Arc::clone(&value)));

        for _ in 0..5 {
            cache.insert(SynapseId::new(), vector_entry(100));
        }
        assert!(
            cache.get(CacheKind::Vector, pinned_id).is_some(),
            "pinned entry must not be evicted"
        );
        drop(value);
    }

    #[test]
    fn test_invalidate_entity_clears_all_variants() {
        let cache = UnifiedCache::new(1 << 20, CacheConfig::default());
        let id = SynapseId::new();
        cache.insert(id, vector_entry(4));
        cache.insert(id, CacheValue::Metadata(Arc::new(json!({"a": 1}))));

        cache.invalidate_entity(id);
        assert!(cache.get(CacheKind::Vector, id).is_none());
        assert!(cache.get(CacheKind::Metadata, id).is_none());
        assert_eq!(cache.stats().total_bytes, 0);
    }

    #[test]
    fn test_fairness_forces_cold_variant_out() {
        let config = CacheConfig::default();
        let cache = UnifiedCache::new(100_000, config);

        // Fill with vector bytes that are never read again
        let cold: Vec<SynapseId> = (0..20).map(|_| SynapseId::new()).collect();
        for id in &cold {
            cache.insert(*id, vector_entry(1000));
        }
        // Metadata entries are hot
        let hot = SynapseId::new();
        cache.insert(hot, CacheValue::Metadata(Arc::new(json!({"k": "v"}))));
        for _ in 0..200 {
            cache.get(CacheKind::Metadata, hot);
        }

        let stats = cache.stats();
        assert!(stats.fairness_violation);

        // Next insert overflows the budget; the forced evictions must come
        // from the overrepresented vector variant, not from hot metadata.
        cache.set_budget(50_000);
        assert!(cache.get(CacheKind::Metadata, hot).is_some());
        let stats = cache.stats();
        assert!(stats.bytes_per_kind[CacheKind::Vector.index()] <= 50_000);
    }
}
