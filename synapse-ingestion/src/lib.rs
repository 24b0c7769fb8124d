//! Import pipeline for the Synapse knowledge store.
//!
//! Sources are normalized to bytes, their format detected (magic bytes
//! first, then extension, then content sniff), parsed into normalized
//! records, classified into entities and relationships, and streamed into
//! the engine with progressive index flushing so partial imports become
//! queryable as they land.

pub mod coordinator;
pub mod detect;
pub mod extract;
pub mod parsers;

pub use coordinator::{
    ImportCoordinator, ImportOptions, ImportProgress, ImportReport, ImportSource, ImportStage,
    SourceFetcher,
};
pub use detect::FormatKind;
pub use extract::RecordExtractor;
pub use parsers::{ParserRegistry, RecordParser};
