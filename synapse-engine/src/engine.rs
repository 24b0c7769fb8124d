//! The entity engine: the public contract over storage, indexes, and cache.
//!
//! One `Synapse` instance exclusively owns the in-memory indexes and the
//! unified cache; the storage adapter owns durable bytes. Every
//! index-mutating operation appends to the WAL before the in-memory change
//! becomes visible, so a crash replays into the same state.

use crate::find::{Connected, Direction, FindHit, FindQuery};
use crate::migration::{Migration, MigrationReport, MigrationRunner};
use crate::scoring::VerbScorer;
use crate::stats::{EngineStats, ServiceStats, StatsRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use synapse_core::{
    metadata as md, Embedder, Noun, NounMetadataRecord, NounRecord, NounType, Result,
    SynapseConfig, SynapseError, SynapseId, Verb, VerbMetadataRecord, VerbRecord, VerbType,
};
use synapse_index::{
    cache::CacheValue, CacheKind, EntityIdMapper, Filter, GraphIndex, HnswIndex, MetadataIndex,
    ResourceSensor, UnifiedCache, VectorMode,
};
use synapse_storage::{keys, open_adapter, Page, StorageAdapter, StorageJson, WalRecord, WalWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineMode {
    Normal,
    ReadOnly,
    Frozen,
}

/// Search input: text to embed, a raw vector, or an existing entity whose
/// stored vector seeds the query.
#[derive(Debug, Clone)]
pub enum SearchQuery {
    Text(String),
    Vector(Vec<f32>),
    Entity(SynapseId),
}

/// Options for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Metadata pre-filter; ANN runs on the matching set only
    pub filter: Option<Filter>,
    /// Restrict to these noun types via the index shards
    pub types: Option<Vec<NounType>>,
    /// Beam width override
    pub ef: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

/// One search hit, ascending cosine distance.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub noun: Noun,
    pub distance: f32,
}

/// Options for `add`.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Display name; derived from the payload when absent
    pub name: Option<String>,
    /// Service tag for per-service statistics
    pub service: Option<String>,
    /// Override the configured dedup setting for this call
    pub dedup: Option<bool>,
}

/// Options for `relate`.
#[derive(Debug, Clone, Default)]
pub struct RelateOptions {
    /// Edge weight; scored or defaulted to 1.0 when absent
    pub weight: Option<f32>,
    pub confidence: Option<f32>,
    pub metadata: Option<Value>,
    pub service: Option<String>,
}

/// One completed import, appended to `import-history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: SynapseId,
    pub source: String,
    pub format: String,
    pub entities: usize,
    pub relationships: usize,
    pub errors: usize,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImportHistory {
    imports: Vec<ImportRecord>,
}

/// Builder for the engine.
pub struct SynapseBuilder {
    config: SynapseConfig,
    embedder: Option<Arc<dyn Embedder>>,
    adapter: Option<Arc<dyn StorageAdapter>>,
    migrations: Vec<Migration>,
}

impl SynapseBuilder {
    pub fn new(config: SynapseConfig) -> Self {
        Self {
            config,
            embedder: None,
            adapter: None,
            migrations: Vec::new(),
        }
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Inject a pre-built adapter (S3 connections, tests).
    pub fn adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Register compiled migrations, checked against persisted completions
    /// at open.
    pub fn migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    pub async fn open(self) -> Result<Arc<Synapse>> {
        let embedder = self
            .embedder
            .ok_or_else(|| SynapseError::config("an embedder is required"))?;
        if embedder.dimension() != self.config.vectors.dimensions {
            return Err(SynapseError::config(format!(
                "embedder dimension {} does not match vectors.dimensions {}",
                embedder.dimension(),
                self.config.vectors.dimensions
            )));
        }
        let adapter = match self.adapter {
            Some(adapter) => adapter,
            None => open_adapter(&self.config.storage)?,
        };
        Synapse::open(self.config, embedder, adapter, self.migrations).await
    }
}

/// Noun count below which pending migrations run inline at open.
const AUTO_MIGRATE_THRESHOLD: usize = 50_000;
/// Interval for the statistics refresh task.
const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Interval for memory pressure sampling.
const PRESSURE_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// The entity engine.
pub struct Synapse {
    config: SynapseConfig,
    adapter: Arc<dyn StorageAdapter>,
    embedder: Arc<dyn Embedder>,
    mapper: Arc<EntityIdMapper>,
    hnsw: HnswIndex,
    metadata: MetadataIndex,
    graph: GraphIndex,
    cache: Arc<UnifiedCache>,
    wal: WalWriter,
    sensor: Arc<ResourceSensor>,
    scorer: VerbScorer,
    stats: StatsRegistry,
    mode: tokio::sync::RwLock<EngineMode>,
    dirty: AtomicBool,
    /// Entities skipped at load for dimension mismatch
    skip_list: parking_lot::RwLock<Vec<SynapseId>>,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Synapse {
    pub fn builder(config: SynapseConfig) -> SynapseBuilder {
        SynapseBuilder::new(config)
    }

    async fn open(
        config: SynapseConfig,
        embedder: Arc<dyn Embedder>,
        adapter: Arc<dyn StorageAdapter>,
        migrations: Vec<Migration>,
    ) -> Result<Arc<Self>> {
        info!(backend = %adapter.describe(), "opening synapse engine");
        let dimension = config.vectors.dimensions;

        let sensor = Arc::new(ResourceSensor::probe(None));
        let budget = config
            .cache
            .max_size
            .unwrap_or_else(|| sensor.cache_budget());
        let cache = Arc::new(UnifiedCache::new(budget, config.cache.clone()));

        let mapper = Arc::new(EntityIdMapper::new());
        let metadata = MetadataIndex::new(config.metadata_index.clone(), Arc::clone(&mapper));

        let noun_count = adapter.list_nouns(Page::all()).await?.len();
        let mode = if noun_count >= config.hnsw.cache_strategy_threshold {
            VectorMode::OnDemand {
                cache: Arc::clone(&cache),
                adapter: Arc::clone(&adapter),
            }
        } else {
            VectorMode::Preloaded
        };
        let hnsw = HnswIndex::new(config.hnsw.clone(), dimension, mode, Arc::clone(&mapper));

        let engine_mode = if config.frozen {
            EngineMode::Frozen
        } else if config.read_only {
            EngineMode::ReadOnly
        } else {
            EngineMode::Normal
        };

        let wal = WalWriter::open(Arc::clone(&adapter), config.wal.redundancy).await?;

        let engine = Self {
            scorer: VerbScorer::new(config.verb_scoring.clone()),
            config,
            adapter,
            embedder,
            mapper,
            hnsw,
            metadata,
            graph: GraphIndex::new(),
            cache,
            wal,
            sensor,
            stats: StatsRegistry::new(),
            mode: tokio::sync::RwLock::new(engine_mode),
            dirty: AtomicBool::new(false),
            skip_list: parking_lot::RwLock::new(Vec::new()),
            tasks: parking_lot::Mutex::new(Vec::new()),
        };

        engine.load_singletons().await?;
        engine.replay_wal().await?;
        engine.apply_migrations(migrations, noun_count).await?;

        let engine = Arc::new(engine);
        Self::spawn_background_tasks(&engine);
        Ok(engine)
    }

    /// Load the three index singletons, tolerating absence and corruption:
    /// a corrupt singleton is logged and rebuilt on the next flush.
    async fn load_singletons(&self) -> Result<()> {
        match self.adapter.get_json::<synapse_index::HnswSnapshot>(keys::INDEX).await {
            Ok(Some(snapshot)) => {
                let mut vectors = HashMap::new();
                for item in &snapshot.items {
                    if let Some(record) = self.adapter.get_noun(item.id).await? {
                        vectors.insert(item.id, record.vector);
                    }
                }
                let report = self.hnsw.restore(snapshot, vectors).await?;
                if !report.skipped.is_empty() {
                    warn!(
                        skipped = report.skipped.len(),
                        "entities skipped at load; logged for migration"
                    );
                    *self.skip_list.write() = report.skipped;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%e, "vector index singleton unreadable; continuing empty"),
        }

        match self
            .adapter
            .get_json::<synapse_index::metadata_index::MetadataSnapshot>(keys::METADATA_INDEX)
            .await
        {
            Ok(Some(snapshot)) => self.metadata.restore(snapshot)?,
            Ok(None) => {}
            Err(e) => {
                warn!(%e, "metadata index singleton unreadable");
                // Small stores rebuild from the metadata stream right away;
                // large ones wait for the next flush to overwrite it
                let count = self.adapter.list_nouns(Page::all()).await?.len();
                if count <= self.config.metadata_index.rebuild_threshold {
                    self.rebuild_metadata_index().await?;
                }
            }
        }

        match self
            .adapter
            .get_json::<synapse_index::graph::GraphSnapshot>(keys::GRAPH_ADJACENCY)
            .await
        {
            Ok(Some(snapshot)) => self.graph.load_snapshot(snapshot)?,
            Ok(None) => {}
            Err(e) => warn!(%e, "graph adjacency singleton unreadable; continuing empty"),
        }
        Ok(())
    }

    /// Re-apply WAL records written after the last flush marker.
    /// Every application is idempotent, so duplicates are safe.
    async fn replay_wal(&self) -> Result<()> {
        let pending = self.wal.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(records = pending.len(), "replaying WAL");

        for record in pending {
            match record {
                WalRecord::AddNoun { id } | WalRecord::UpdateMetadata { id } => {
                    let Some(meta) = self.adapter.get_noun_metadata(id).await? else {
                        continue;
                    };
                    if let Some(noun) = self.adapter.get_noun(id).await? {
                        if noun.vector.len() == self.config.vectors.dimensions {
                            self.hnsw.insert(id, meta.noun_type, noun.vector).await?;
                        } else {
                            warn!(%id, "skipping mis-sized vector during replay");
                            self.skip_list.write().push(id);
                        }
                    }
                    self.metadata.index_document(id, &indexed_doc(&meta));
                }
                WalRecord::AddVerb {
                    id,
                    source,
                    target,
                    verb,
                } => {
                    self.graph.insert(id, source, target, verb);
                }
                WalRecord::DeleteNoun { id } => {
                    self.delete_internal(id, false).await?;
                }
                WalRecord::DeleteVerb {
                    source,
                    target,
                    verb,
                    ..
                } => {
                    let _ = self.graph.remove_edge(source, target, verb);
                }
                WalRecord::FlushMarker => {}
            }
        }
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn apply_migrations(&self, migrations: Vec<Migration>, noun_count: usize) -> Result<()> {
        if migrations.is_empty() {
            return Ok(());
        }
        let runner = MigrationRunner::new(Arc::clone(&self.adapter), migrations);
        let pending = runner.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        if *self.mode.read().await != EngineMode::Normal {
            warn!("pending migrations but engine is not writable; run them explicitly");
            return Ok(());
        }
        if noun_count >= AUTO_MIGRATE_THRESHOLD {
            warn!(
                pending = pending.len(),
                noun_count, "pending migrations on a large store; run them explicitly"
            );
            return Ok(());
        }
        let (reports, rebuild) = runner.run_pending().await?;
        for report in &reports {
            info!(
                id = %report.migration_id,
                modified = report.modified,
                "migration applied at open"
            );
        }
        if rebuild {
            self.rebuild_metadata_index().await?;
        }
        Ok(())
    }

    fn spawn_background_tasks(engine: &Arc<Self>) {
        let mut tasks = engine.tasks.lock();

        if engine.config.cache.auto_tune {
            tasks.push(ResourceSensor::spawn_monitor(
                &engine.sensor,
                PRESSURE_SAMPLE_INTERVAL,
                Arc::clone(&engine.cache),
            ));
        }

        // Tasks hold weak references so dropping the last engine handle
        // actually drops the engine
        if !engine.config.frozen {
            let weak = Arc::downgrade(engine);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(STATS_REFRESH_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let Some(engine) = weak.upgrade() else { break };
                    engine.refresh_statistics();
                }
            }));
        }

        if engine.config.realtime_updates.enabled && !engine.config.frozen {
            let weak = Arc::downgrade(engine);
            let interval =
                Duration::from_secs(engine.config.realtime_updates.interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let Some(engine) = weak.upgrade() else { break };
                    if let Err(e) = engine.reload_indexes().await {
                        warn!(%e, "realtime index reload failed");
                    }
                }
            }));
        }
    }

    /// Reload externally mutated index singletons. Only safe while the
    /// engine itself has no unflushed changes.
    pub async fn reload_indexes(&self) -> Result<()> {
        if self.dirty.load(Ordering::Relaxed) {
            debug!("skipping realtime reload; local changes pending");
            return Ok(());
        }
        self.load_singletons().await
    }

    /// Rebuild the metadata index from the persisted metadata stream.
    pub async fn rebuild_metadata_index(&self) -> Result<()> {
        info!("rebuilding metadata index from storage");
        for id in self.adapter.list_nouns(Page::all()).await? {
            if let Some(meta) = self.adapter.get_noun_metadata(id).await? {
                self.metadata.index_document(id, &indexed_doc(&meta));
            }
        }
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    async fn writable(&self) -> Result<tokio::sync::RwLockReadGuard<'_, EngineMode>> {
        let guard = self.mode.read().await;
        match *guard {
            EngineMode::Normal => Ok(guard),
            EngineMode::ReadOnly => Err(SynapseError::ReadOnly),
            EngineMode::Frozen => Err(SynapseError::Frozen),
        }
    }

    /// Flip read-only mode; blocks until in-flight writes drain.
    pub async fn set_read_only(&self, read_only: bool) {
        let mut mode = self.mode.write().await;
        if *mode != EngineMode::Frozen {
            *mode = if read_only {
                EngineMode::ReadOnly
            } else {
                EngineMode::Normal
            };
        }
    }

    /// Freeze the engine; blocks until in-flight writes drain.
    pub async fn freeze(&self) {
        *self.mode.write().await = EngineMode::Frozen;
    }

    pub async fn is_read_only(&self) -> bool {
        matches!(*self.mode.read().await, EngineMode::ReadOnly | EngineMode::Frozen)
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Add an entity: embed, persist, index. Returns the new id, or the id
    /// of a merged near-duplicate when dedup is active.
    pub async fn add(
        &self,
        data: &str,
        noun_type: NounType,
        metadata: Option<Value>,
        opts: AddOptions,
    ) -> Result<SynapseId> {
        let _mode = self.writable().await?;
        if data.trim().is_empty() {
            return Err(SynapseError::invalid_input("entity payload is empty"));
        }
        if let Some(meta) = &metadata {
            if !meta.is_object() && !meta.is_null() {
                return Err(SynapseError::invalid_input("metadata must be an object"));
            }
        }

        let vector = self.embedder.embed(data).await?;
        if vector.len() != self.config.vectors.dimensions {
            return Err(SynapseError::DimensionMismatch {
                expected: self.config.vectors.dimensions,
                got: vector.len(),
            });
        }

        let dedup_enabled = opts.dedup.unwrap_or(self.config.dedup.enabled);
        if dedup_enabled {
            if let Some(existing) = self.find_duplicate(&vector, noun_type).await? {
                debug!(%existing, "merged near-duplicate add");
                if let Some(patch) = &metadata {
                    self.update_internal(existing, patch).await?;
                }
                return Ok(existing);
            }
        }

        let id = SynapseId::new();
        let now = Utc::now();
        let name = opts
            .name
            .unwrap_or_else(|| data.chars().take(80).collect());
        let service = opts.service.or_else(|| self.config.default_service.clone());

        let mut stored_vector = vector.clone();
        synapse_index::hnsw::normalize(&mut stored_vector);
        self.adapter
            .save_noun(&NounRecord {
                id,
                vector: stored_vector,
                connections: Default::default(),
                level: 0,
            })
            .await?;
        let meta_record = NounMetadataRecord {
            id,
            name,
            noun_type,
            data: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_at: now,
            vfs_path: None,
            service: service.clone(),
        };
        self.adapter.save_noun_metadata(&meta_record).await?;

        self.wal.append(&WalRecord::AddNoun { id }).await?;

        self.hnsw.insert(id, noun_type, vector).await?;
        self.metadata.index_document(id, &indexed_doc(&meta_record));

        self.stats.record_add(service.as_deref().unwrap_or("default"));
        self.dirty.store(true, Ordering::Relaxed);
        debug!(%id, %noun_type, "added entity");
        Ok(id)
    }

    async fn find_duplicate(&self, vector: &[f32], noun_type: NounType) -> Result<Option<SynapseId>> {
        let hits = self
            .hnsw
            .search(vector, 1, None, Some(&[noun_type]), None)
            .await?;
        Ok(hits
            .first()
            .filter(|hit| 1.0 - hit.distance >= self.config.dedup.threshold)
            .map(|hit| hit.id))
    }

    /// Fetch an entity. Never fails on a missing id; the vector stays
    /// empty unless `include_vector` is set.
    pub async fn get(&self, id: SynapseId, include_vector: bool) -> Result<Option<Noun>> {
        let Some(meta) = self.load_metadata_record(id).await? else {
            return Ok(None);
        };
        let vector = if include_vector {
            self.load_noun_record(id)
                .await?
                .map(|r| r.vector.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Some(Noun {
            id: meta.id,
            noun_type: meta.noun_type,
            name: meta.name,
            metadata: meta.data,
            created_at: meta.created_at,
            vector,
        }))
    }

    async fn load_metadata_record(&self, id: SynapseId) -> Result<Option<NounMetadataRecord>> {
        if let Some(CacheValue::Metadata(value)) = self.cache.get(CacheKind::Metadata, id) {
            return Ok(Some(serde_json::from_value((*value).clone())?));
        }
        let Some(record) = self.adapter.get_noun_metadata(id).await? else {
            return Ok(None);
        };
        self.cache.insert(
            id,
            CacheValue::Metadata(Arc::new(serde_json::to_value(&record)?)),
        );
        Ok(Some(record))
    }

    async fn load_noun_record(&self, id: SynapseId) -> Result<Option<Arc<NounRecord>>> {
        if let Some(CacheValue::HnswNode(record)) = self.cache.get(CacheKind::HnswNode, id) {
            return Ok(Some(record));
        }
        let Some(record) = self.adapter.get_noun(id).await? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        self.cache.insert(id, CacheValue::HnswNode(Arc::clone(&record)));
        Ok(Some(record))
    }

    /// Merge a metadata patch. The payload and vector are immutable; only
    /// metadata changes. Last writer wins under concurrent merges.
    pub async fn update(&self, id: SynapseId, patch: &Value) -> Result<()> {
        let _mode = self.writable().await?;
        self.update_internal(id, patch).await
    }

    async fn update_internal(&self, id: SynapseId, patch: &Value) -> Result<()> {
        let Some(mut record) = self.adapter.get_noun_metadata(id).await? else {
            return Err(SynapseError::not_found(id.to_string()));
        };
        md::merge_patch(&mut record.data, patch);

        self.adapter.save_noun_metadata(&record).await?;
        self.wal.append(&WalRecord::UpdateMetadata { id }).await?;

        self.metadata.index_document(id, &indexed_doc(&record));
        self.cache.invalidate(CacheKind::Metadata, id);
        self.stats
            .record_update(record.service.as_deref().unwrap_or("default"));
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Delete an entity and everything attached to it. Double-delete is a
    /// no-op.
    pub async fn delete(&self, id: SynapseId) -> Result<()> {
        let _mode = self.writable().await?;
        let existed = self.adapter.get_noun_metadata(id).await?.is_some();
        if existed {
            self.wal.append(&WalRecord::DeleteNoun { id }).await?;
        }
        self.delete_internal(id, existed).await
    }

    /// Shared by `delete` and WAL replay; every step tolerates the entity
    /// being already gone.
    async fn delete_internal(&self, id: SynapseId, record_stats: bool) -> Result<()> {
        let service = self
            .adapter
            .get_noun_metadata(id)
            .await
            .ok()
            .flatten()
            .and_then(|m| m.service);

        // Incident edges first, both directions
        for (edge, _, _, _) in self.graph.remove_entity(id) {
            self.adapter.delete_verb(edge).await?;
            self.adapter.delete_verb_metadata(edge).await?;
        }

        self.hnsw.remove(id).await?;
        self.metadata.remove_document(id);
        self.adapter.delete_noun(id).await?;
        self.adapter.delete_noun_metadata(id).await?;
        self.cache.invalidate_entity(id);

        if record_stats {
            self.stats
                .record_delete(service.as_deref().unwrap_or("default"));
            self.dirty.store(true, Ordering::Relaxed);
            debug!(%id, "deleted entity");
        }
        Ok(())
    }

    /// Create a relationship. Duplicate (source, target, verb) triples
    /// return the existing edge id.
    pub async fn relate(
        &self,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
        opts: RelateOptions,
    ) -> Result<SynapseId> {
        let _mode = self.writable().await?;

        let Some(source_meta) = self.load_metadata_record(source).await? else {
            return Err(SynapseError::not_found(source.to_string()));
        };
        let Some(target_meta) = self.load_metadata_record(target).await? else {
            return Err(SynapseError::not_found(target.to_string()));
        };

        if let Some(existing) = self.graph.edge_for(source, target, verb) {
            return Ok(existing);
        }

        let (weight, confidence) = match opts.weight {
            Some(weight) => {
                if !(0.0..=1.0).contains(&weight) {
                    return Err(SynapseError::invalid_input("weight must be in [0, 1]"));
                }
                (weight, opts.confidence)
            }
            None if self.scorer.enabled() => {
                let similarity = self.endpoint_similarity(source, target).await?;
                let score = self.scorer.score(
                    (source_meta.noun_type, verb, target_meta.noun_type),
                    similarity,
                    Utc::now(),
                );
                (score.weight, Some(score.confidence))
            }
            None => (1.0, opts.confidence),
        };

        let id = SynapseId::new();
        let now = Utc::now();
        self.adapter
            .save_verb(&VerbRecord {
                id,
                source_id: source,
                target_id: target,
                verb,
                weight,
                confidence,
                created_at: now,
            })
            .await?;
        if let Some(metadata) = &opts.metadata {
            self.adapter
                .save_verb_metadata(&VerbMetadataRecord {
                    id,
                    data: metadata.clone(),
                })
                .await?;
        }

        self.wal
            .append(&WalRecord::AddVerb {
                id,
                source,
                target,
                verb,
            })
            .await?;

        let outcome = self.graph.insert(id, source, target, verb);
        if !outcome.is_new() {
            // Lost a race to an identical triple; drop our record
            self.adapter.delete_verb(id).await?;
            self.adapter.delete_verb_metadata(id).await?;
            return Ok(outcome.edge_id());
        }

        let service = opts
            .service
            .or_else(|| self.config.default_service.clone());
        self.stats
            .record_verb(service.as_deref().unwrap_or("default"));
        self.dirty.store(true, Ordering::Relaxed);
        debug!(%id, %source, %target, %verb, "related entities");
        Ok(id)
    }

    async fn endpoint_similarity(&self, a: SynapseId, b: SynapseId) -> Result<f32> {
        let va = self.load_noun_record(a).await?;
        let vb = self.load_noun_record(b).await?;
        Ok(match (va, vb) {
            (Some(va), Some(vb)) if !va.vector.is_empty() && !vb.vector.is_empty() => {
                let dot: f32 = va.vector.iter().zip(&vb.vector).map(|(x, y)| x * y).sum();
                dot.clamp(-1.0, 1.0)
            }
            _ => 0.0,
        })
    }

    /// Fetch a relationship by id.
    pub async fn get_verb(&self, id: SynapseId) -> Result<Option<Verb>> {
        let Some(record) = self.adapter.get_verb(id).await? else {
            return Ok(None);
        };
        let metadata = self
            .adapter
            .get_verb_metadata(id)
            .await?
            .map(|m| m.data)
            .unwrap_or(Value::Null);
        Ok(Some(Verb {
            id: record.id,
            source: record.source_id,
            target: record.target_id,
            verb: record.verb,
            weight: record.weight,
            confidence: record.confidence,
            metadata,
            created_at: record.created_at,
        }))
    }

    /// Remove a relationship; both forward and reverse postings go.
    pub async fn unrelate(
        &self,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    ) -> Result<()> {
        let _mode = self.writable().await?;
        let Ok(edge) = self.graph.remove_edge(source, target, verb) else {
            return Ok(());
        };
        self.wal
            .append(&WalRecord::DeleteVerb {
                id: edge,
                source,
                target,
                verb,
            })
            .await?;
        self.adapter.delete_verb(edge).await?;
        self.adapter.delete_verb_metadata(edge).await?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Record feedback for intelligent verb scoring.
    pub async fn verb_feedback(&self, edge: SynapseId, outcome: f64) -> Result<()> {
        let Some(verb) = self.get_verb(edge).await? else {
            return Err(SynapseError::not_found(edge.to_string()));
        };
        let (Some(source), Some(target)) = (
            self.load_metadata_record(verb.source).await?,
            self.load_metadata_record(verb.target).await?,
        ) else {
            return Err(SynapseError::not_found(edge.to_string()));
        };
        self.scorer
            .feedback((source.noun_type, verb.verb, target.noun_type), outcome);
        Ok(())
    }

    /// k-nearest search with optional metadata pre-filter and type shards.
    pub async fn search(
        &self,
        query: SearchQuery,
        k: usize,
        opts: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        check_cancel(&opts.cancel)?;
        let vector = self.resolve_query_vector(query).await?;

        let allowed: Option<HashSet<SynapseId>> = match &opts.filter {
            Some(filter) => {
                let ids = self.metadata.query(filter)?;
                if ids.is_empty() {
                    // Nothing matches; skip the ANN entirely
                    return Ok(Vec::new());
                }
                Some(ids.into_iter().collect())
            }
            None => None,
        };
        check_cancel(&opts.cancel)?;

        let hits = self
            .hnsw
            .search(&vector, k, opts.ef, opts.types.as_deref(), allowed.as_ref())
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            check_cancel(&opts.cancel)?;
            // A hit may have been deleted mid-search; missing reads are
            // normal, not errors
            if let Some(noun) = self.get(hit.id, false).await? {
                results.push(SearchResult {
                    noun,
                    distance: hit.distance,
                });
            }
        }
        Ok(results)
    }

    async fn resolve_query_vector(&self, query: SearchQuery) -> Result<Vec<f32>> {
        match query {
            SearchQuery::Text(text) => {
                let vector = self.embedder.embed(&text).await?;
                if vector.len() != self.config.vectors.dimensions {
                    return Err(SynapseError::DimensionMismatch {
                        expected: self.config.vectors.dimensions,
                        got: vector.len(),
                    });
                }
                Ok(vector)
            }
            SearchQuery::Vector(vector) => Ok(vector),
            SearchQuery::Entity(id) => {
                // Resolved from storage, not from a possibly-stripped read
                let record = self
                    .load_noun_record(id)
                    .await?
                    .ok_or_else(|| SynapseError::not_found(id.to_string()))?;
                Ok(record.vector.clone())
            }
        }
    }

    /// Evaluate a find query: metadata, graph, and similarity restrictions
    /// intersected, ranked when `like` is present.
    pub async fn find(
        &self,
        query: FindQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<FindHit>> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(SynapseError::Cancelled);
            }
        }

        // Ordered candidate list from the metadata index; `None` means
        // unrestricted
        let mut candidates: Option<Vec<SynapseId>> = match &query.filter {
            Some(filter) => Some(self.metadata.query(filter)?),
            None => None,
        };

        if let Some(connected) = &query.connected {
            let neighbors = self.connected_ids(connected);
            candidates = Some(match candidates {
                Some(ids) => ids.into_iter().filter(|id| neighbors.contains(id)).collect(),
                None => {
                    let mut ids: Vec<SynapseId> = neighbors.into_iter().collect();
                    ids.sort();
                    ids
                }
            });
        }

        if let Some(ids) = &candidates {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        if let Some(like) = &query.like {
            let limit = if query.limit == 0 {
                crate::find::DEFAULT_LIMIT
            } else {
                query.limit
            };
            let vector = self.embedder.embed(like).await?;
            let allowed: Option<HashSet<SynapseId>> =
                candidates.map(|ids| ids.into_iter().collect());
            let hits = self
                .hnsw
                .search(&vector, limit + query.offset, None, None, allowed.as_ref())
                .await?;
            let mut out = Vec::new();
            for hit in hits.into_iter().skip(query.offset) {
                if let Some(token) = cancel {
                    if token.is_cancelled() {
                        return Err(SynapseError::Cancelled);
                    }
                }
                if let Some(noun) = self.get(hit.id, false).await? {
                    out.push(FindHit {
                        noun,
                        distance: Some(hit.distance),
                    });
                }
            }
            return Ok(out);
        }

        let ids = match candidates {
            Some(ids) => ids,
            None => self.metadata.query(&Filter::And(Vec::new()))?,
        };
        let mut out = Vec::new();
        for id in ids.into_iter().skip(query.offset) {
            if query.limit > 0 && out.len() >= query.limit {
                break;
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(SynapseError::Cancelled);
                }
            }
            if let Some(noun) = self.get(id, false).await? {
                out.push(FindHit {
                    noun,
                    distance: None,
                });
            }
        }
        Ok(out)
    }

    fn connected_ids(&self, connected: &Connected) -> HashSet<SynapseId> {
        let neighbors = match connected.direction {
            Direction::Out => self.graph.out(connected.from, connected.verb),
            Direction::In => self.graph.incoming(connected.from, connected.verb),
            Direction::Any => {
                let mut all = self.graph.out(connected.from, connected.verb);
                all.extend(self.graph.incoming(connected.from, connected.verb));
                all
            }
        };
        neighbors.into_iter().map(|n| n.entity).collect()
    }

    // ------------------------------------------------------------------
    // Durability and maintenance
    // ------------------------------------------------------------------

    /// Persist the index singletons and truncate the WAL. After this
    /// returns, a cold restart recovers without replay. A no-op when
    /// nothing changed; a no-op in frozen mode.
    pub async fn flush(&self) -> Result<()> {
        if *self.mode.read().await == EngineMode::Frozen {
            return Ok(());
        }
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }

        let hnsw = self.hnsw.snapshot().await;
        self.adapter
            .save_index_blob(keys::INDEX, serde_json::to_vec(&hnsw)?)
            .await?;
        self.adapter
            .save_index_blob(
                keys::METADATA_INDEX,
                serde_json::to_vec(&self.metadata.snapshot())?,
            )
            .await?;
        self.adapter
            .save_index_blob(
                keys::GRAPH_ADJACENCY,
                serde_json::to_vec(&self.graph.snapshot())?,
            )
            .await?;
        self.adapter
            .save_index_blob(keys::STATISTICS, serde_json::to_vec(&self.stats_snapshot())?)
            .await?;

        self.wal.checkpoint().await?;
        self.adapter.flush().await?;
        self.stats.mark_flush();
        self.dirty.store(false, Ordering::Relaxed);
        info!("flushed indexes");
        Ok(())
    }

    /// Recompute derived statistics; permitted in read-only mode, a no-op
    /// when frozen.
    pub fn refresh_statistics(&self) {
        if self.config.frozen {
            return;
        }
        // Field statistics are recomputed lazily; touching them here keeps
        // the surfaced numbers warm
        let _ = self.metadata.field_stats();
        self.stats.mark_refresh();
    }

    fn stats_snapshot(&self) -> EngineStats {
        EngineStats {
            noun_count: self.metadata.len(),
            verb_count: self.graph.edge_count(),
            noun_types: self
                .hnsw
                .shard_sizes()
                .into_iter()
                .map(|(t, n)| (t.as_str().to_string(), n))
                .collect(),
            verb_types: self
                .graph
                .verb_counts()
                .into_iter()
                .map(|(v, n)| (v.as_str().to_string(), n))
                .collect(),
            services: self.stats.services(self.config.read_only),
            cache: self.cache.stats(),
            last_flush: self.stats.last_flush(),
            last_refresh: self.stats.last_refresh(),
        }
    }

    /// Engine-wide statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats_snapshot()
    }

    /// Per-service activity breakdown.
    pub fn list_services(&self) -> Vec<ServiceStats> {
        self.stats.services(self.config.read_only)
    }

    /// Entities skipped at load because their stored vector length did not
    /// match the configured dimension.
    pub fn load_skip_list(&self) -> Vec<SynapseId> {
        self.skip_list.read().clone()
    }

    /// Append a completed import to the history singleton.
    pub async fn record_import(&self, record: ImportRecord) -> Result<()> {
        let mut history = self
            .adapter
            .get_json::<ImportHistory>(keys::IMPORT_HISTORY)
            .await?
            .unwrap_or_default();
        history.imports.push(record);
        self.adapter.put_json(keys::IMPORT_HISTORY, &history).await
    }

    /// Run registered migrations explicitly (the large-store path).
    pub async fn run_migrations(
        &self,
        migrations: Vec<Migration>,
    ) -> Result<Vec<MigrationReport>> {
        let _mode = self.writable().await?;
        let runner = MigrationRunner::new(Arc::clone(&self.adapter), migrations);
        let (reports, rebuild) = runner.run_pending().await?;
        if rebuild {
            self.rebuild_metadata_index().await?;
        }
        Ok(reports)
    }

    /// Graph neighbors of an entity; the O(1) adjacency surface.
    pub fn neighbors(
        &self,
        id: SynapseId,
        verb: Option<VerbType>,
        direction: Direction,
    ) -> Vec<SynapseId> {
        let connected = Connected {
            from: id,
            verb,
            direction,
        };
        let mut out: Vec<SynapseId> = self.connected_ids(&connected).into_iter().collect();
        out.sort();
        out
    }

    /// Per-verb edge count.
    pub fn verb_count(&self, verb: VerbType) -> u64 {
        self.graph.verb_count(verb)
    }

    /// The storage adapter backing this engine.
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// The effective configuration.
    pub fn config(&self) -> &SynapseConfig {
        &self.config
    }

    /// The injected embedder.
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Flush and stop background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.flush().await
    }
}

impl Drop for Synapse {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn check_cancel(cancel: &Option<CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(SynapseError::Cancelled),
        _ => Ok(()),
    }
}

/// The document the metadata index sees: user metadata enriched with the
/// entity's name and type so `where` clauses can reach them.
fn indexed_doc(record: &NounMetadataRecord) -> Value {
    let mut doc = match &record.data {
        Value::Object(map) => Value::Object(map.clone()),
        Value::Null => Value::Object(Default::default()),
        other => serde_json::json!({ "_data": other }),
    };
    md::set_path(&mut doc, "name", Value::String(record.name.clone()));
    md::set_path(
        &mut doc,
        "type",
        Value::String(record.noun_type.as_str().to_string()),
    );
    doc
}
