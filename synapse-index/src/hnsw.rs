//! HNSW vector index with noun-type shards.
//!
//! A hierarchical small-world graph over unit-normalized vectors under
//! cosine distance. Nodes keep per-layer neighbor lists in compact u32
//! keys; a type shard per noun-type supports filtered search. Vectors are
//! resident below the cache-strategy threshold and paged through the
//! unified cache above it.

use crate::cache::{CacheKind, CacheValue, UnifiedCache};
use crate::mapper::EntityIdMapper;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::sync::Arc;
use synapse_core::config::HnswConfig;
use synapse_core::{NounType, Result, SynapseError, SynapseId};
use synapse_storage::StorageAdapter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where node vectors live.
#[derive(Clone)]
pub enum VectorMode {
    /// Vectors resident in node records; right for small maps
    Preloaded,
    /// Vectors paged from storage through the unified cache
    OnDemand {
        cache: Arc<UnifiedCache>,
        adapter: Arc<dyn StorageAdapter>,
    },
}

impl std::fmt::Debug for VectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorMode::Preloaded => f.write_str("Preloaded"),
            VectorMode::OnDemand { .. } => f.write_str("OnDemand"),
        }
    }
}

struct HnswNode {
    level: usize,
    /// neighbors[layer] holds at most M (M_max0 at layer 0) keys
    neighbors: Vec<Vec<u32>>,
    /// `None` when paged (on-demand mode)
    vector: Option<Arc<Vec<f32>>>,
}

struct HnswCore {
    nodes: HashMap<u32, HnswNode>,
    key_types: HashMap<u32, NounType>,
    entry_point: Option<u32>,
}

/// Result of restoring a persisted index.
#[derive(Debug, Default)]
pub struct HnswLoadReport {
    pub loaded: usize,
    /// Entities whose stored vector length differs from D; skipped and
    /// logged for migration, never re-embedded.
    pub skipped: Vec<SynapseId>,
}

/// One search hit, ascending cosine distance.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: SynapseId,
    pub distance: f32,
}

/// The vector index.
pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    mode: VectorMode,
    mapper: Arc<EntityIdMapper>,
    core: RwLock<HnswCore>,
    shards: DashMap<NounType, HashSet<u32>>,
}

/// Heap candidate ordered by (distance, key) for deterministic ties.
#[derive(Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    key: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.key.cmp(&other.key))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Cosine distance between unit vectors.
fn unit_cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (1.0 - dot).max(0.0)
}

/// Normalize in place; zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

impl HnswIndex {
    pub fn new(
        config: HnswConfig,
        dimension: usize,
        mode: VectorMode,
        mapper: Arc<EntityIdMapper>,
    ) -> Self {
        info!(
            dimension,
            m = config.m,
            ef_construction = config.ef_construction,
            ef_search = config.ef_search,
            ?mode,
            "creating HNSW index"
        );
        Self {
            config,
            dimension,
            mode,
            mapper,
            core: RwLock::new(HnswCore {
                nodes: HashMap::new(),
                key_types: HashMap::new(),
                entry_point: None,
            }),
            shards: DashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn len(&self) -> usize {
        self.core.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.core.read().await.nodes.is_empty()
    }

    /// Per-type node counts, for statistics.
    pub fn shard_sizes(&self) -> BTreeMap<NounType, usize> {
        self.shards
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| (*e.key(), e.value().len()))
            .collect()
    }

    fn validate_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SynapseError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0()
        } else {
            self.config.m
        }
    }

    fn draw_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..=1.0);
        (-u.ln() * self.config.level_factor()).floor() as usize
    }

    /// Fetch a node's vector, paging through the cache in on-demand mode.
    /// A missing or mis-sized stored vector reads as `None` and is skipped.
    async fn vector_of(&self, core: &HnswCore, key: u32) -> Result<Option<Arc<Vec<f32>>>> {
        if let Some(node) = core.nodes.get(&key) {
            if let Some(vector) = &node.vector {
                return Ok(Some(Arc::clone(vector)));
            }
        } else {
            return Ok(None);
        }

        let VectorMode::OnDemand { cache, adapter } = &self.mode else {
            return Ok(None);
        };
        let Some(id) = self.mapper.resolve(key) else {
            return Ok(None);
        };

        if let Some(CacheValue::Vector(vector)) = cache.get(CacheKind::Vector, id) {
            return Ok(Some(vector));
        }

        match adapter.get_noun(id).await? {
            Some(record) if record.vector.len() == self.dimension => {
                let mut vector = record.vector;
                normalize(&mut vector);
                let vector = Arc::new(vector);
                cache.insert(id, CacheValue::Vector(Arc::clone(&vector)));
                Ok(Some(vector))
            }
            Some(record) => {
                warn!(%id, got = record.vector.len(), expected = self.dimension,
                    "stored vector has wrong dimension; skipping node");
                Ok(None)
            }
            None => {
                warn!(%id, "vector record missing during search");
                Ok(None)
            }
        }
    }

    async fn distance_to(&self, core: &HnswCore, query: &[f32], key: u32) -> Result<Option<f32>> {
        Ok(self
            .vector_of(core, key)
            .await?
            .map(|v| unit_cosine_distance(query, &v)))
    }

    /// Beam search within one layer. `entries` seeds the beam; returns up
    /// to `ef` closest nodes, ascending.
    async fn search_layer(
        &self,
        core: &HnswCore,
        query: &[f32],
        entries: Vec<Candidate>,
        ef: usize,
        layer: usize,
    ) -> Result<Vec<Candidate>> {
        let mut visited: HashSet<u32> = entries.iter().map(|c| c.key).collect();
        // Min-heap of frontier candidates, max-heap of current best set
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for entry in entries {
            frontier.push(Reverse(Candidate { ..entry }));
            best.push(entry);
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && best.len() >= ef {
                break;
            }

            let neighbors: Vec<u32> = core
                .nodes
                .get(&current.key)
                .and_then(|n| n.neighbors.get(layer).cloned())
                .unwrap_or_default();

            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(dist) = self.distance_to(core, query, neighbor).await? else {
                    continue;
                };
                let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if best.len() < ef || dist < worst {
                    frontier.push(Reverse(Candidate { dist, key: neighbor }));
                    best.push(Candidate { dist, key: neighbor });
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out = best.into_vec();
        out.sort();
        Ok(out)
    }

    /// Greedy descent with ef=1 from the top layer down to `to_layer + 1`.
    async fn greedy_descent(
        &self,
        core: &HnswCore,
        query: &[f32],
        mut current: Candidate,
        from_layer: usize,
        to_layer: usize,
    ) -> Result<Candidate> {
        let mut layer = from_layer;
        while layer > to_layer {
            let found = self
                .search_layer(core, query, vec![Candidate { ..current }], 1, layer)
                .await?;
            if let Some(closest) = found.into_iter().next() {
                current = closest;
            }
            layer -= 1;
        }
        Ok(current)
    }

    /// Select-neighbors heuristic with the keep-pruned extension: a
    /// candidate is kept only if it is closer to the query than to every
    /// already-kept neighbor; pruned candidates backfill to `m`.
    async fn select_neighbors(
        &self,
        core: &HnswCore,
        candidates: &[Candidate],
        m: usize,
    ) -> Result<Vec<u32>> {
        let mut kept: Vec<(u32, Arc<Vec<f32>>)> = Vec::with_capacity(m);
        let mut pruned: Vec<u32> = Vec::new();

        for candidate in candidates {
            if kept.len() >= m {
                break;
            }
            let Some(vector) = self.vector_of(core, candidate.key).await? else {
                continue;
            };
            let dominated = kept
                .iter()
                .any(|(_, kept_vec)| unit_cosine_distance(&vector, kept_vec) < candidate.dist);
            if dominated {
                pruned.push(candidate.key);
            } else {
                kept.push((candidate.key, vector));
            }
        }

        let mut out: Vec<u32> = kept.into_iter().map(|(key, _)| key).collect();
        for key in pruned {
            if out.len() >= m {
                break;
            }
            out.push(key);
        }
        Ok(out)
    }

    /// Re-prune an over-connected node down to capacity.
    async fn shrink_neighbors(&self, core: &mut HnswCore, key: u32, layer: usize) -> Result<()> {
        let max = self.max_neighbors(layer);
        let (vector, current) = {
            let Some(node) = core.nodes.get(&key) else {
                return Ok(());
            };
            if node.neighbors[layer].len() <= max {
                return Ok(());
            }
            (self.vector_of(core, key).await?, node.neighbors[layer].clone())
        };
        let Some(vector) = vector else {
            return Ok(());
        };

        let mut candidates = Vec::with_capacity(current.len());
        for other in current {
            if let Some(dist) = self.distance_to(core, &vector, other).await? {
                candidates.push(Candidate { dist, key: other });
            }
        }
        candidates.sort();
        let selected = self.select_neighbors(core, &candidates, max).await?;
        if let Some(node) = core.nodes.get_mut(&key) {
            node.neighbors[layer] = selected;
        }
        Ok(())
    }

    /// Insert a vector. Re-inserting an existing entity is a no-op:
    /// vectors are immutable after create.
    pub async fn insert(&self, id: SynapseId, noun_type: NounType, vector: Vec<f32>) -> Result<()> {
        self.validate_dimension(&vector)?;
        let mut vector = vector;
        normalize(&mut vector);
        let vector = Arc::new(vector);

        let key = self.mapper.intern(id);
        let mut core = self.core.write().await;
        if core.nodes.contains_key(&key) {
            debug!(%id, "re-insert ignored; vector immutable");
            return Ok(());
        }

        let level = self.draw_level();
        let mut node = HnswNode {
            level,
            neighbors: vec![Vec::new(); level + 1],
            vector: Some(Arc::clone(&vector)),
        };

        if let Some(entry_key) = core.entry_point {
            let top = core.nodes.get(&entry_key).map(|n| n.level).unwrap_or(0);
            let Some(entry_dist) = self.distance_to(&core, &vector, entry_key).await? else {
                return Err(SynapseError::internal("entry point vector unavailable"));
            };
            let mut current = Candidate {
                dist: entry_dist,
                key: entry_key,
            };

            if top > level {
                current = self
                    .greedy_descent(&core, &vector, current, top, level)
                    .await?;
            }

            let mut selected_per_layer: Vec<(usize, Vec<u32>)> = Vec::new();
            let mut seeds = vec![Candidate { ..current }];
            for layer in (0..=level.min(top)).rev() {
                let found = self
                    .search_layer(&core, &vector, seeds, self.config.ef_construction, layer)
                    .await?;
                let selected = self
                    .select_neighbors(&core, &found, self.max_neighbors(layer))
                    .await?;
                selected_per_layer.push((layer, selected));
                seeds = found;
            }

            for (layer, selected) in &selected_per_layer {
                node.neighbors[*layer] = selected.clone();
            }
            core.nodes.insert(key, node);

            // Bidirectional links, then back-prune over-connected neighbors
            for (layer, selected) in selected_per_layer {
                for neighbor in selected {
                    if let Some(n) = core.nodes.get_mut(&neighbor) {
                        if layer < n.neighbors.len() && !n.neighbors[layer].contains(&key) {
                            n.neighbors[layer].push(key);
                        }
                    }
                    self.shrink_neighbors(&mut core, neighbor, layer).await?;
                }
            }

            if level > top {
                core.entry_point = Some(key);
            }
        } else {
            core.nodes.insert(key, node);
            core.entry_point = Some(key);
        }

        core.key_types.insert(key, noun_type);
        self.shards.entry(noun_type).or_default().insert(key);

        // In on-demand mode, fresh vectors live in the cache, not the node
        if let VectorMode::OnDemand { cache, .. } = &self.mode {
            cache.insert(id, CacheValue::Vector(vector));
            if let Some(node) = core.nodes.get_mut(&key) {
                node.vector = None;
            }
        }

        Ok(())
    }

    /// k-nearest-neighbor search; empty index returns an empty list.
    ///
    /// `type_filter` restricts hits to the given shards; `allowed`
    /// restricts hits to an explicit candidate set (metadata pre-filter).
    /// Small candidate sets are scanned directly instead of walking the
    /// graph.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        type_filter: Option<&[NounType]>,
        allowed: Option<&HashSet<SynapseId>>,
    ) -> Result<Vec<VectorHit>> {
        self.validate_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut query = query.to_vec();
        normalize(&mut query);

        let core = self.core.read().await;
        let Some(entry_key) = core.entry_point else {
            return Ok(Vec::new());
        };

        let allowed_keys: Option<HashSet<u32>> = allowed.map(|ids| {
            ids.iter()
                .filter_map(|id| self.mapper.key_of(*id))
                .collect()
        });
        let shard_keys: Option<HashSet<u32>> = type_filter.map(|types| {
            types
                .iter()
                .filter_map(|t| self.shards.get(t))
                .flat_map(|s| s.iter().copied().collect::<Vec<_>>())
                .collect()
        });

        let ef = ef_override.unwrap_or(self.config.ef_search).max(k);

        // A restricted candidate set smaller than the beam is cheaper to
        // scan than to reach through the graph.
        let restricted: Option<HashSet<u32>> = match (&allowed_keys, &shard_keys) {
            (Some(a), Some(s)) => Some(a.intersection(s).copied().collect()),
            (Some(a), None) => Some(a.clone()),
            (None, Some(s)) if s.len() <= ef => Some(s.clone()),
            _ => None,
        };

        if let Some(candidates) = restricted {
            return self.scan_candidates(&core, &query, k, candidates).await;
        }

        let Some(entry_dist) = self.distance_to(&core, &query, entry_key).await? else {
            return Ok(Vec::new());
        };
        let top = core.nodes.get(&entry_key).map(|n| n.level).unwrap_or(0);
        let current = self
            .greedy_descent(
                &core,
                &query,
                Candidate {
                    dist: entry_dist,
                    key: entry_key,
                },
                top,
                0,
            )
            .await?;

        let beam = self
            .search_layer(&core, &query, vec![current], ef, 0)
            .await?;

        let mut hits = Vec::with_capacity(k);
        for candidate in beam {
            if let Some(shard) = &shard_keys {
                if !shard.contains(&candidate.key) {
                    continue;
                }
            }
            if let Some(id) = self.mapper.resolve(candidate.key) {
                hits.push(VectorHit {
                    id,
                    distance: candidate.dist,
                });
            }
            if hits.len() >= k {
                break;
            }
        }
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn scan_candidates(
        &self,
        core: &HnswCore,
        query: &[f32],
        k: usize,
        candidates: HashSet<u32>,
    ) -> Result<Vec<VectorHit>> {
        let mut hits = Vec::with_capacity(candidates.len());
        for key in candidates {
            let Some(dist) = self.distance_to(core, query, key).await? else {
                continue;
            };
            if let Some(id) = self.mapper.resolve(key) {
                hits.push(VectorHit { id, distance: dist });
            }
        }
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Remove an entity, rewiring its neighbors around the hole.
    /// Returns false when the entity was not indexed.
    pub async fn remove(&self, id: SynapseId) -> Result<bool> {
        let Some(key) = self.mapper.key_of(id) else {
            return Ok(false);
        };
        let mut core = self.core.write().await;
        let Some(node) = core.nodes.remove(&key) else {
            return Ok(false);
        };

        if let Some(noun_type) = core.key_types.remove(&key) {
            if let Some(mut shard) = self.shards.get_mut(&noun_type) {
                shard.remove(&key);
            }
        }

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            // Unlink, then reconnect the orphaned neighbors to each other
            for &neighbor in neighbors {
                if let Some(n) = core.nodes.get_mut(&neighbor) {
                    if layer < n.neighbors.len() {
                        n.neighbors[layer].retain(|&k| k != key);
                    }
                }
            }
            for &neighbor in neighbors {
                if !core.nodes.contains_key(&neighbor) {
                    continue;
                }
                let Some(vector) = self.vector_of(&core, neighbor).await? else {
                    continue;
                };
                let mut candidates = Vec::new();
                for &other in neighbors {
                    if other == neighbor || !core.nodes.contains_key(&other) {
                        continue;
                    }
                    if let Some(dist) = self.distance_to(&core, &vector, other).await? {
                        candidates.push(Candidate { dist, key: other });
                    }
                }
                candidates.sort();

                let max = self.max_neighbors(layer);
                for candidate in candidates {
                    let has_room = core
                        .nodes
                        .get(&neighbor)
                        .map(|n| {
                            layer < n.neighbors.len()
                                && n.neighbors[layer].len() < max
                                && !n.neighbors[layer].contains(&candidate.key)
                        })
                        .unwrap_or(false);
                    if !has_room {
                        break;
                    }
                    if let Some(n) = core.nodes.get_mut(&neighbor) {
                        n.neighbors[layer].push(candidate.key);
                    }
                    let mut linked_back = false;
                    if let Some(n) = core.nodes.get_mut(&candidate.key) {
                        if layer < n.neighbors.len() && !n.neighbors[layer].contains(&neighbor) {
                            n.neighbors[layer].push(neighbor);
                            linked_back = true;
                        }
                    }
                    if linked_back {
                        self.shrink_neighbors(&mut core, candidate.key, layer).await?;
                    }
                }
            }
        }

        if core.entry_point == Some(key) {
            core.entry_point = core
                .nodes
                .iter()
                .max_by(|(ka, a), (kb, b)| a.level.cmp(&b.level).then(kb.cmp(ka)))
                .map(|(k, _)| *k);
        }

        self.mapper.remove(id);
        if let VectorMode::OnDemand { cache, .. } = &self.mode {
            cache.invalidate(CacheKind::Vector, id);
        }
        debug!(%id, "removed from vector index");
        Ok(true)
    }

    /// Whether any node still links to this key; test and audit hook.
    pub async fn references(&self, id: SynapseId) -> bool {
        let Some(key) = self.mapper.key_of(id) else {
            return false;
        };
        let core = self.core.read().await;
        core.nodes
            .values()
            .any(|n| n.neighbors.iter().any(|layer| layer.contains(&key)))
    }

    /// Serialize topology to the `index.json` singleton shape. Vectors
    /// stay in their per-noun records.
    pub async fn snapshot(&self) -> HnswSnapshot {
        let core = self.core.read().await;
        let mut items: Vec<HnswSnapshotItem> = Vec::with_capacity(core.nodes.len());
        for (key, node) in &core.nodes {
            let Some(id) = self.mapper.resolve(*key) else {
                continue;
            };
            let connections = node
                .neighbors
                .iter()
                .enumerate()
                .map(|(layer, keys)| {
                    (
                        layer,
                        keys.iter()
                            .filter_map(|k| self.mapper.resolve(*k))
                            .collect(),
                    )
                })
                .collect();
            items.push(HnswSnapshotItem {
                id,
                level: node.level,
                connections,
            });
        }
        items.sort_by_key(|item| item.id);

        let type_map = self
            .shards
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| {
                let mut ids: Vec<SynapseId> = e
                    .value()
                    .iter()
                    .filter_map(|k| self.mapper.resolve(*k))
                    .collect();
                ids.sort();
                (e.key().as_str().to_string(), ids)
            })
            .collect();

        HnswSnapshot {
            dimensions: self.dimension,
            m: self.config.m,
            ef_construction: self.config.ef_construction,
            entry_point: core.entry_point.and_then(|k| self.mapper.resolve(k)),
            items,
            type_map,
        }
    }

    /// Restore topology from a snapshot. `vectors` supplies resident
    /// vectors in preloaded mode; items with a missing or mis-sized vector
    /// land in the skip-list. On-demand mode pages vectors later and skips
    /// them at first touch instead.
    pub async fn restore(
        &self,
        snapshot: HnswSnapshot,
        mut vectors: HashMap<SynapseId, Vec<f32>>,
    ) -> Result<HnswLoadReport> {
        if snapshot.dimensions != self.dimension {
            return Err(SynapseError::DimensionMismatch {
                expected: self.dimension,
                got: snapshot.dimensions,
            });
        }

        let mut report = HnswLoadReport::default();
        let preloaded = matches!(self.mode, VectorMode::Preloaded);
        let mut core = self.core.write().await;
        core.nodes.clear();
        core.key_types.clear();
        core.entry_point = None;
        self.shards.clear();

        let mut skipped: HashSet<SynapseId> = HashSet::new();
        for item in &snapshot.items {
            if preloaded {
                match vectors.get(&item.id) {
                    Some(v) if v.len() == self.dimension => {}
                    _ => {
                        warn!(id = %item.id, "vector missing or mis-sized at load; skipping");
                        skipped.insert(item.id);
                        report.skipped.push(item.id);
                        continue;
                    }
                }
            }
            self.mapper.intern(item.id);
        }

        for item in &snapshot.items {
            if skipped.contains(&item.id) {
                continue;
            }
            let key = self.mapper.intern(item.id);
            let level = item.level;
            let mut neighbors = vec![Vec::new(); level + 1];
            for (layer, ids) in &item.connections {
                if *layer <= level {
                    neighbors[*layer] = ids
                        .iter()
                        .filter(|id| !skipped.contains(id))
                        .filter_map(|id| self.mapper.key_of(*id))
                        .collect();
                }
            }
            let vector = if preloaded {
                match vectors.remove(&item.id) {
                    Some(mut v) => {
                        normalize(&mut v);
                        Some(Arc::new(v))
                    }
                    None => {
                        report.skipped.push(item.id);
                        continue;
                    }
                }
            } else {
                None
            };
            core.nodes.insert(
                key,
                HnswNode {
                    level,
                    neighbors,
                    vector,
                },
            );
            report.loaded += 1;
        }

        for (type_name, ids) in &snapshot.type_map {
            let noun_type = NounType::parse(type_name)?;
            let shard: HashSet<u32> = ids
                .iter()
                .filter(|id| !skipped.contains(id))
                .filter_map(|id| self.mapper.key_of(*id))
                .collect();
            for key in &shard {
                core.key_types.insert(*key, noun_type);
            }
            self.shards.insert(noun_type, shard);
        }

        core.entry_point = snapshot
            .entry_point
            .filter(|id| !skipped.contains(id))
            .and_then(|id| self.mapper.key_of(id))
            .or_else(|| {
                core.nodes
                    .iter()
                    .max_by(|(ka, a), (kb, b)| a.level.cmp(&b.level).then(kb.cmp(ka)))
                    .map(|(k, _)| *k)
            });

        info!(
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "restored HNSW index"
        );
        Ok(report)
    }
}

fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
}

/// Persisted shape of `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswSnapshot {
    #[serde(rename = "D")]
    pub dimensions: usize,
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "efConstruction")]
    pub ef_construction: usize,
    #[serde(rename = "entryPoint")]
    pub entry_point: Option<SynapseId>,
    pub items: Vec<HnswSnapshotItem>,
    #[serde(rename = "typeMap")]
    pub type_map: BTreeMap<String, Vec<SynapseId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswSnapshotItem {
    pub id: SynapseId,
    pub level: usize,
    pub connections: BTreeMap<usize, Vec<SynapseId>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::config::HnswConfig;

    fn index() -> HnswIndex {
        HnswIndex::new(
            HnswConfig::default(),
            4,
            VectorMode::Preloaded,
            Arc::new(EntityIdMapper::new()),
        )
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 4];
        v[i] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_empty_search_returns_empty() {
        let hnsw = index();
        let hits = hnsw.search(&axis(0), 5, None, None, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let hnsw = index();
        let err = hnsw
            .insert(SynapseId::new(), NounType::Thing, vec![1.0; 3])
            .await
            .unwrap_err();
        assert!(matches!(err, SynapseError::DimensionMismatch { expected: 4, got: 3 }));
    }

    #[tokio::test]
    async fn test_nearest_neighbor_ordering() {
        let hnsw = index();
        let a = SynapseId::new();
        let b = SynapseId::new();
        hnsw.insert(a, NounType::Concept, axis(0)).await.unwrap();
        hnsw.insert(b, NounType::Concept, axis(1)).await.unwrap();

        let hits = hnsw.search(&axis(0), 2, None, None, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, a);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_k_larger_than_index_returns_all() {
        let hnsw = index();
        for i in 0..3 {
            hnsw.insert(SynapseId::new(), NounType::Thing, axis(i))
                .await
                .unwrap();
        }
        let hits = hnsw.search(&axis(0), 100, None, None, None).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_type_filter_restricts_results() {
        let hnsw = index();
        let person = SynapseId::new();
        let product = SynapseId::new();
        hnsw.insert(person, NounType::Person, axis(0)).await.unwrap();
        hnsw.insert(product, NounType::Product, axis(0)).await.unwrap();

        let hits = hnsw
            .search(&axis(0), 10, None, Some(&[NounType::Person]), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, person);
    }

    #[tokio::test]
    async fn test_allowed_set_prefilter() {
        let hnsw = index();
        let keep = SynapseId::new();
        let drop = SynapseId::new();
        hnsw.insert(keep, NounType::Thing, axis(0)).await.unwrap();
        hnsw.insert(drop, NounType::Thing, axis(0)).await.unwrap();

        let allowed: HashSet<SynapseId> = [keep].into_iter().collect();
        let hits = hnsw
            .search(&axis(0), 10, None, None, Some(&allowed))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, keep);
    }

    #[tokio::test]
    async fn test_remove_unlinks_everywhere() {
        let hnsw = index();
        let ids: Vec<SynapseId> = (0..4).map(|_| SynapseId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            hnsw.insert(*id, NounType::Thing, axis(i)).await.unwrap();
        }

        assert!(hnsw.remove(ids[0]).await.unwrap());
        assert!(!hnsw.references(ids[0]).await);
        assert_eq!(hnsw.len().await, 3);

        // Removed entity never surfaces again
        let hits = hnsw.search(&axis(0), 10, None, None, None).await.unwrap();
        assert!(hits.iter().all(|h| h.id != ids[0]));

        // Double remove is a no-op
        assert!(!hnsw.remove(ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_larger_set_recall() {
        let hnsw = index();
        let mut ids = Vec::new();
        for i in 0..60 {
            let mut v = vec![
                (i % 7) as f32 + 1.0,
                (i % 5) as f32,
                (i % 3) as f32,
                (i % 11) as f32,
            ];
            normalize(&mut v);
            let id = SynapseId::new();
            hnsw.insert(id, NounType::Thing, v.clone()).await.unwrap();
            ids.push((id, v));
        }

        // The exact vector of a stored item must come back first
        let (probe_id, probe_vec) = ids[37].clone();
        let hits = hnsw.search(&probe_vec, 5, None, None, None).await.unwrap();
        assert_eq!(hits[0].id, probe_id);
        assert!(hits[0].distance < 1e-5);
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let hnsw = index();
        let mut stored: HashMap<SynapseId, Vec<f32>> = HashMap::new();
        for i in 0..4 {
            let id = SynapseId::new();
            hnsw.insert(id, NounType::Concept, axis(i)).await.unwrap();
            stored.insert(id, axis(i));
        }
        let snapshot = hnsw.snapshot().await;
        let json = serde_json::to_string(&snapshot).unwrap();
        let snapshot: HnswSnapshot = serde_json::from_str(&json).unwrap();

        let restored = index();
        let report = restored.restore(snapshot, stored.clone()).await.unwrap();
        assert_eq!(report.loaded, 4);
        assert!(report.skipped.is_empty());

        let (probe_id, probe_vec) = stored.iter().next().map(|(k, v)| (*k, v.clone())).unwrap();
        let hits = restored.search(&probe_vec, 1, None, None, None).await.unwrap();
        assert_eq!(hits[0].id, probe_id);
    }

    #[tokio::test]
    async fn test_restore_skips_mis_sized_vectors() {
        let hnsw = index();
        let good = SynapseId::new();
        let bad = SynapseId::new();
        hnsw.insert(good, NounType::Thing, axis(0)).await.unwrap();
        hnsw.insert(bad, NounType::Thing, axis(1)).await.unwrap();
        let snapshot = hnsw.snapshot().await;

        let mut vectors = HashMap::new();
        vectors.insert(good, axis(0));
        vectors.insert(bad, vec![1.0; 7]); // wrong dimension on disk

        let restored = index();
        let report = restored.restore(snapshot, vectors).await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, vec![bad]);

        let hits = restored.search(&axis(1), 5, None, None, None).await.unwrap();
        assert!(hits.iter().all(|h| h.id != bad));
    }
}
