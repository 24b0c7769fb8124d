//! The Synapse entity engine.
//!
//! The `Synapse` facade unifies the vector, metadata, and graph indexes
//! behind one `add/get/update/delete/relate/search/find/flush` contract,
//! with crash-safe WAL semantics, per-service statistics, intelligent verb
//! scoring, and versioned metadata migrations.

pub mod engine;
pub mod find;
pub mod migration;
pub mod scoring;
pub mod stats;

pub use engine::{
    AddOptions, ImportRecord, RelateOptions, SearchOptions, SearchQuery, SearchResult, Synapse,
    SynapseBuilder,
};
pub use find::{Connected, Direction, FindHit, FindQuery};
pub use migration::{Applies, DryRunReport, Migration, MigrationReport, MigrationRunner};
pub use scoring::{VerbScore, VerbScorer};
pub use stats::{EngineStats, ServiceStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::engine::{
        AddOptions, RelateOptions, SearchOptions, SearchQuery, Synapse, SynapseBuilder,
    };
    pub use crate::find::{Connected, Direction, FindQuery};
    pub use synapse_core::prelude::*;
    pub use synapse_index::Filter;
}
