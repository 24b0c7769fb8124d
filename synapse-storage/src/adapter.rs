//! The unified storage adapter contract.
//!
//! Backends implement the five raw operations (`put_raw`, `get_raw`,
//! `delete_raw`, `list_raw`, `with_prefix`); the typed record operations are
//! provided on the trait so every backend shares one key layout and one
//! serialization path. Each operation is best-effort atomic at single-key
//! granularity; there are no cross-key transactions.

use crate::retry::RetryPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;
use synapse_core::config::{StorageConfig, StorageKind};
use synapse_core::{
    NounMetadataRecord, NounRecord, Result, SynapseError, SynapseId, VerbMetadataRecord,
    VerbRecord,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key construction for the shared persisted layout.
pub mod keys {
    use synapse_core::SynapseId;

    pub const INDEX: &str = "index.json";
    pub const METADATA_INDEX: &str = "metadata-index.json";
    pub const GRAPH_ADJACENCY: &str = "graph-adjacency.json";
    pub const STATISTICS: &str = "statistics.json";
    pub const IMPORT_HISTORY: &str = "import-history.json";

    pub const NOUNS: &str = "nouns/";
    pub const NOUNS_METADATA: &str = "nouns-metadata/";
    pub const VERBS: &str = "verbs/";
    pub const VERBS_METADATA: &str = "verbs-metadata/";

    pub fn noun(id: SynapseId) -> String {
        format!("{NOUNS}{id}.json")
    }

    pub fn noun_metadata(id: SynapseId) -> String {
        format!("{NOUNS_METADATA}{id}.json")
    }

    pub fn verb(id: SynapseId) -> String {
        format!("{VERBS}{id}.json")
    }

    pub fn verb_metadata(id: SynapseId) -> String {
        format!("{VERBS_METADATA}{id}.json")
    }

    /// Extract the id from a stream key (`nouns/{id}.json` -> `{id}`).
    pub fn id_of(key: &str) -> Option<SynapseId> {
        let name = key.rsplit('/').next()?;
        let stem = name.strip_suffix(".json")?;
        SynapseId::parse(stem).ok()
    }
}

/// Pagination over adapter listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    /// Zero means no limit
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn all() -> Self {
        Self::default()
    }

    fn apply<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if self.offset >= items.len() {
            return Vec::new();
        }
        let mut items = items.split_off(self.offset);
        if self.limit > 0 && items.len() > self.limit {
            items.truncate(self.limit);
        }
        items
    }
}

/// Decode a stored JSON value, reporting the affected key on corruption.
fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| SynapseError::corrupt(key, e.to_string()))
}

/// Unified object-typed persistence over pluggable backends.
///
/// The trait stays object-safe: generic JSON helpers live on
/// [`StorageJson`], which is blanket-implemented for every adapter.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write raw bytes at a key.
    async fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read raw bytes at a key; missing keys are `None`.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key; deleting a missing key is a no-op.
    async fn delete_raw(&self, key: &str) -> Result<()>;

    /// List keys under a prefix, in lexicographic order.
    async fn list_raw(&self, prefix: &str) -> Result<Vec<String>>;

    /// Scope all keys under a subtree.
    fn with_prefix(&self, prefix: &str) -> Arc<dyn StorageAdapter>;

    /// Human-readable backend description for logs.
    fn describe(&self) -> String;

    /// Whether a key holds a value.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get_raw(key).await?.is_some())
    }

    /// Durability barrier; a no-op on backends where every write already
    /// lands durably.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retry wrappers: transient failures get bounded exponential backoff.
    // ------------------------------------------------------------------

    async fn put_with_retry(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let policy = RetryPolicy::default();
        let mut attempt = 0;
        loop {
            match self.put_raw(key, bytes.clone()).await {
                Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn get_with_retry(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let policy = RetryPolicy::default();
        let mut attempt = 0;
        loop {
            match self.get_raw(key).await {
                Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn delete_with_retry(&self, key: &str) -> Result<()> {
        let policy = RetryPolicy::default();
        let mut attempt = 0;
        loop {
            match self.delete_raw(key).await {
                Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                other => return other,
            }
        }
    }

    // ------------------------------------------------------------------
    // Typed record operations over the shared key layout.
    // ------------------------------------------------------------------

    async fn save_noun(&self, record: &NounRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.put_with_retry(&keys::noun(record.id), bytes).await
    }

    async fn get_noun(&self, id: SynapseId) -> Result<Option<NounRecord>> {
        let key = keys::noun(id);
        match self.get_with_retry(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_noun(&self, id: SynapseId) -> Result<()> {
        self.delete_with_retry(&keys::noun(id)).await
    }

    async fn save_noun_metadata(&self, record: &NounMetadataRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.put_with_retry(&keys::noun_metadata(record.id), bytes)
            .await
    }

    /// Metadata-only read; never touches the vector stream.
    async fn get_noun_metadata(&self, id: SynapseId) -> Result<Option<NounMetadataRecord>> {
        let key = keys::noun_metadata(id);
        match self.get_with_retry(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_noun_metadata(&self, id: SynapseId) -> Result<()> {
        self.delete_with_retry(&keys::noun_metadata(id)).await
    }

    /// Assemble a full entity. The vector stream is only read when
    /// `include_vector` is set; default reads return an empty vector.
    async fn get_noun_entity(
        &self,
        id: SynapseId,
        include_vector: bool,
    ) -> Result<Option<synapse_core::Noun>> {
        let Some(meta) = self.get_noun_metadata(id).await? else {
            return Ok(None);
        };
        let vector = if include_vector {
            self.get_noun(id).await?.map(|r| r.vector).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Some(synapse_core::Noun {
            id: meta.id,
            noun_type: meta.noun_type,
            name: meta.name,
            metadata: meta.data,
            created_at: meta.created_at,
            vector,
        }))
    }

    async fn save_verb(&self, record: &VerbRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.put_with_retry(&keys::verb(record.id), bytes).await
    }

    async fn get_verb(&self, id: SynapseId) -> Result<Option<VerbRecord>> {
        let key = keys::verb(id);
        match self.get_with_retry(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_verb(&self, id: SynapseId) -> Result<()> {
        self.delete_with_retry(&keys::verb(id)).await
    }

    async fn save_verb_metadata(&self, record: &VerbMetadataRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.put_with_retry(&keys::verb_metadata(record.id), bytes)
            .await
    }

    async fn get_verb_metadata(&self, id: SynapseId) -> Result<Option<VerbMetadataRecord>> {
        let key = keys::verb_metadata(id);
        match self.get_with_retry(&key).await? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_verb_metadata(&self, id: SynapseId) -> Result<()> {
        self.delete_with_retry(&keys::verb_metadata(id)).await
    }

    /// List noun ids in key order.
    async fn list_nouns(&self, page: Page) -> Result<Vec<SynapseId>> {
        let keys = self.list_raw(keys::NOUNS_METADATA).await?;
        Ok(page.apply(keys.iter().filter_map(|k| keys::id_of(k)).collect()))
    }

    /// List verb ids in key order.
    async fn list_verbs(&self, page: Page) -> Result<Vec<SynapseId>> {
        let keys = self.list_raw(keys::VERBS).await?;
        Ok(page.apply(keys.iter().filter_map(|k| keys::id_of(k)).collect()))
    }

    /// Scan edges by source endpoint. The adjacency index is the fast path;
    /// this is the rebuild path.
    async fn list_verbs_by_source(&self, source: SynapseId) -> Result<Vec<VerbRecord>> {
        let mut out = Vec::new();
        for key in self.list_raw(keys::VERBS).await? {
            if let Some(bytes) = self.get_with_retry(&key).await? {
                let record: VerbRecord = decode(&key, &bytes)?;
                if record.source_id == source {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Scan edges by target endpoint.
    async fn list_verbs_by_target(&self, target: SynapseId) -> Result<Vec<VerbRecord>> {
        let mut out = Vec::new();
        for key in self.list_raw(keys::VERBS).await? {
            if let Some(bytes) = self.get_with_retry(&key).await? {
                let record: VerbRecord = decode(&key, &bytes)?;
                if record.target_id == target {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Persist an index singleton or other named blob.
    async fn save_index_blob(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.put_with_retry(name, bytes).await
    }

    /// Load an index singleton; missing blobs are `None`.
    async fn load_index_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.get_with_retry(name).await
    }
}

/// Generic JSON codec over any adapter. Separate from [`StorageAdapter`]
/// because generic methods would make that trait unusable as an object;
/// the blanket impl covers `dyn StorageAdapter` too.
#[async_trait]
pub trait StorageJson: StorageAdapter {
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put_with_retry(key, bytes).await
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get_with_retry(key).await? {
            Some(bytes) => Ok(Some(decode(key, &bytes)?)),
            None => Ok(None),
        }
    }
}

impl<A: StorageAdapter + ?Sized> StorageJson for A {}

/// Construct the adapter selected by configuration.
pub fn open_adapter(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let adapter: Arc<dyn StorageAdapter> = match config.kind {
        StorageKind::Memory => Arc::new(crate::memory::MemoryAdapter::new()),
        StorageKind::Filesystem => {
            let root = config.root_dir.clone().ok_or_else(|| {
                SynapseError::config("filesystem storage requires storage.root_dir")
            })?;
            Arc::new(crate::filesystem::FsAdapter::new(root))
        }
        #[cfg(feature = "s3")]
        StorageKind::S3 | StorageKind::Gcs | StorageKind::R2 => {
            return Err(SynapseError::config(
                "S3-family adapters are constructed asynchronously; use S3Adapter::connect",
            ));
        }
        #[cfg(not(feature = "s3"))]
        StorageKind::S3 | StorageKind::Gcs | StorageKind::R2 => {
            return Err(SynapseError::config(
                "S3-family storage requires the `s3` feature",
            ));
        }
        StorageKind::Opfs => {
            return Err(SynapseError::config(
                "OPFS storage is only available on wasm targets",
            ));
        }
    };
    if config.prefix.is_empty() {
        Ok(adapter)
    } else {
        Ok(adapter.with_prefix(&config.prefix))
    }
}

/// Join a prefix and key with exactly one separator.
pub(crate) fn join_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }
}

/// Sorted, deterministic listing helper shared by adapters.
pub(crate) fn sorted_keys<I: IntoIterator<Item = String>>(keys: I) -> Vec<String> {
    let set: BTreeMap<String, ()> = keys.into_iter().map(|k| (k, ())).collect();
    set.into_keys().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = SynapseId::new();
        assert_eq!(keys::noun(id), format!("nouns/{id}.json"));
        assert_eq!(keys::noun_metadata(id), format!("nouns-metadata/{id}.json"));
        assert_eq!(keys::id_of(&keys::verb(id)), Some(id));
        assert_eq!(keys::id_of("verbs/not-a-uuid.json"), None);
    }

    #[test]
    fn test_page_apply() {
        let page = Page::new(1, 2);
        assert_eq!(page.apply(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(Page::all().apply(vec![1, 2, 3]), vec![1, 2, 3]);
        assert_eq!(Page::new(10, 0).apply(vec![1]), Vec::<i32>::new());
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix("", "nouns/a.json"), "nouns/a.json");
        assert_eq!(join_prefix("tenant-a/", "index.json"), "tenant-a/index.json");
        assert_eq!(join_prefix("tenant-a", "index.json"), "tenant-a/index.json");
    }
}
