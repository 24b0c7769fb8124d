//! In-memory retrieval indexes for the Synapse knowledge store.
//!
//! Three indexes over one entity population: the HNSW vector index with
//! noun-type shards, the metadata inverted index with range support, and the
//! graph adjacency index with verb-typed edges. The unified cache and the
//! resource sensor that sizes it live here too.

pub mod cache;
pub mod graph;
pub mod hnsw;
pub mod mapper;
pub mod metadata_index;
pub mod resources;

pub use cache::{CacheKind, CacheStats, UnifiedCache};
pub use graph::{EdgeInsert, GraphIndex};
pub use hnsw::{HnswIndex, HnswLoadReport, HnswSnapshot, VectorMode};
pub use mapper::EntityIdMapper;
pub use metadata_index::{Filter, MetadataIndex};
pub use resources::ResourceSensor;
