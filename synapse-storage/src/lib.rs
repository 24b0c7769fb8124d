//! Storage adapters and write-ahead log for the Synapse knowledge store.
//!
//! Every backend persists the same key layout: four record streams
//! (`nouns/`, `nouns-metadata/`, `verbs/`, `verbs-metadata/`), the index
//! singletons, and the WAL. Adapters differ only in where the bytes live.

pub mod adapter;
pub mod filesystem;
pub mod memory;
pub mod retry;
#[cfg(feature = "s3")]
pub mod s3;
pub mod wal;

pub use adapter::{keys, open_adapter, Page, StorageAdapter, StorageJson};
pub use filesystem::FsAdapter;
pub use memory::MemoryAdapter;
#[cfg(feature = "s3")]
pub use s3::S3Adapter;
pub use wal::{WalRecord, WalWriter};
