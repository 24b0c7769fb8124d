//! Configuration for the Synapse engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Filesystem,
    S3,
    Gcs,
    R2,
    /// Browser origin-private filesystem; only constructible on wasm targets
    Opfs,
}

impl Default for StorageKind {
    fn default() -> Self {
        Self::Memory
    }
}

/// Deployment environment, used for cache sizing ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Container,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

/// Main configuration for the Synapse engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapseConfig {
    pub storage: StorageConfig,
    pub vectors: VectorConfig,
    pub hnsw: HnswConfig,
    pub cache: CacheConfig,
    pub metadata_index: MetadataIndexConfig,
    pub verb_scoring: VerbScoringConfig,
    pub dedup: DedupConfig,
    pub wal: WalConfig,
    pub realtime_updates: RealtimeUpdatesConfig,
    /// Service tag attached to writes for per-service statistics
    pub default_service: Option<String>,
    /// Reject writes; reads, index optimization and statistics refresh still run
    pub read_only: bool,
    /// Reject writes and suspend all background maintenance
    pub frozen: bool,
}

/// Storage adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Key-space namespace; every key is scoped under this subtree
    pub prefix: String,
    /// Root directory for the filesystem adapter
    pub root_dir: Option<PathBuf>,
    /// Bucket name for S3-family adapters
    pub bucket: Option<String>,
    /// Region for S3-family adapters
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (GCS, R2)
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            prefix: String::new(),
            root_dir: None,
            bucket: None,
            region: None,
            endpoint: None,
        }
    }
}

/// Vector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Embedding dimension D; vectors of any other length are rejected
    pub dimensions: usize,
    /// Embedder selector, informational only
    pub model: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

/// HNSW index parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Max neighbors per node above layer 0
    pub m: usize,
    /// ef parameter during construction
    pub ef_construction: usize,
    /// ef parameter during search, runtime-tunable
    pub ef_search: usize,
    /// Entity count above which node records page through the cache
    /// instead of staying resident
    pub cache_strategy_threshold: usize,
}

impl HnswConfig {
    /// Max neighbors at layer 0 (2M by convention).
    pub fn m_max0(&self) -> usize {
        self.m * 2
    }

    /// Level generation factor 1/ln(M).
    pub fn level_factor(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            cache_strategy_threshold: 10_000,
        }
    }
}

/// Unified cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget; overrides the resource sensor when set
    pub max_size: Option<u64>,
    /// Let the resource sensor size the cache
    pub auto_tune: bool,
    /// Fairness: byte share above which a variant is overrepresented
    pub fairness_byte_share: f64,
    /// Fairness: access share below which eviction is forced
    pub fairness_access_share: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            auto_tune: true,
            fairness_byte_share: 0.90,
            fairness_access_share: 0.10,
        }
    }
}

/// Metadata index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataIndexConfig {
    /// Explicit include list; `None` indexes every field
    pub indexed_fields: Option<Vec<String>>,
    /// Fields never indexed (volatile timestamps and the like)
    pub exclude_fields: Vec<String>,
    /// Maximum postings per (field, value); overflow collapses to a sample
    pub max_index_size: usize,
    /// Document count that triggers a full rebuild instead of patching
    pub rebuild_threshold: usize,
    /// Re-optimize statistics on every write
    pub auto_optimize: bool,
}

impl Default for MetadataIndexConfig {
    fn default() -> Self {
        Self {
            indexed_fields: None,
            exclude_fields: Vec::new(),
            max_index_size: 10_000,
            rebuild_threshold: 100_000,
            auto_optimize: true,
        }
    }
}

/// Intelligent verb scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbScoringConfig {
    pub enabled: bool,
    /// Weight of endpoint-vector similarity
    pub semantic: f64,
    /// Weight of observed (source-type, verb, target-type) frequency
    pub frequency: f64,
    /// Weight of temporal decay
    pub temporal: f64,
    /// Confidence floor for unscored triples
    pub base_confidence: f64,
    /// Online learning rate for per-triple priors
    pub learning_rate: f64,
}

impl Default for VerbScoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            semantic: 0.5,
            frequency: 0.3,
            temporal: 0.2,
            base_confidence: 0.5,
            learning_rate: 0.1,
        }
    }
}

/// Deduplication-on-add configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Cosine similarity at or above which an add merges into the match
    pub threshold: f32,
    /// Batch size above which dedup auto-disables with a warning
    pub max_batch: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.85,
            max_batch: 100,
        }
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Number of duplicate copies written per record for cross-zone durability
    pub redundancy: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self { redundancy: 0 }
    }
}

/// Background reload of externally mutated indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeUpdatesConfig {
    pub enabled: bool,
    /// Reload interval in seconds
    pub interval_secs: u64,
}

impl Default for RealtimeUpdatesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = SynapseConfig::default();
        assert_eq!(config.vectors.dimensions, 384);
        assert_eq!(config.hnsw.m, 16);
        assert_eq!(config.hnsw.m_max0(), 32);
        assert_eq!(config.hnsw.ef_construction, 200);
        assert_eq!(config.hnsw.ef_search, 100);
        assert_eq!(config.hnsw.cache_strategy_threshold, 10_000);
        assert_eq!(config.dedup.threshold, 0.85);
        assert_eq!(config.dedup.max_batch, 100);
        assert!(!config.read_only);
        assert!(!config.frozen);
    }

    #[test]
    fn test_level_factor() {
        let hnsw = HnswConfig::default();
        let expected = 1.0 / (16.0f64).ln();
        assert!((hnsw.level_factor() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: SynapseConfig =
            serde_json::from_str(r#"{"storage": {"type": "filesystem"}, "read_only": true}"#)
                .unwrap();
        assert_eq!(config.storage.kind, StorageKind::Filesystem);
        assert!(config.read_only);
        assert_eq!(config.vectors.dimensions, 384);
    }
}
