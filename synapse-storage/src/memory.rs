//! In-memory storage adapter.
//!
//! Backs the `memory` storage kind and the test suites. Keys live in a
//! concurrent map; `with_prefix` shares the map so scoped views observe the
//! same data.

use crate::adapter::{join_prefix, sorted_keys, StorageAdapter};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use synapse_core::Result;

/// DashMap-backed adapter; everything is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    objects: Arc<DashMap<String, Vec<u8>>>,
    prefix: String,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all prefixes.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn full_key(&self, key: &str) -> String {
        join_prefix(&self.prefix, key)
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.insert(self.full_key(key), bytes);
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(&self.full_key(key)).map(|v| v.clone()))
    }

    async fn delete_raw(&self, key: &str) -> Result<()> {
        self.objects.remove(&self.full_key(key));
        Ok(())
    }

    async fn list_raw(&self, prefix: &str) -> Result<Vec<String>> {
        let scoped = self.full_key(prefix);
        let strip = if self.prefix.is_empty() {
            0
        } else {
            self.prefix.trim_end_matches('/').len() + 1
        };
        Ok(sorted_keys(self.objects.iter().filter_map(|entry| {
            let key = entry.key();
            key.starts_with(&scoped).then(|| key[strip..].to_string())
        })))
    }

    fn with_prefix(&self, prefix: &str) -> Arc<dyn StorageAdapter> {
        Arc::new(Self {
            objects: Arc::clone(&self.objects),
            prefix: join_prefix(&self.prefix, prefix),
        })
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            "memory".to_string()
        } else {
            format!("memory ({})", self.prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let adapter = MemoryAdapter::new();
        adapter.put_raw("a.json", b"1".to_vec()).await.unwrap();
        assert_eq!(adapter.get_raw("a.json").await.unwrap(), Some(b"1".to_vec()));

        adapter.delete_raw("a.json").await.unwrap();
        assert_eq!(adapter.get_raw("a.json").await.unwrap(), None);
        // Double delete is a no-op
        adapter.delete_raw("a.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let adapter = MemoryAdapter::new();
        adapter.put_raw("nouns/b.json", vec![]).await.unwrap();
        adapter.put_raw("nouns/a.json", vec![]).await.unwrap();
        adapter.put_raw("verbs/c.json", vec![]).await.unwrap();

        let keys = adapter.list_raw("nouns/").await.unwrap();
        assert_eq!(keys, vec!["nouns/a.json", "nouns/b.json"]);
    }

    #[tokio::test]
    async fn test_prefix_scoping() {
        let adapter = MemoryAdapter::new();
        let scoped = adapter.with_prefix("tenant-a");
        scoped.put_raw("index.json", b"x".to_vec()).await.unwrap();

        // Visible at the root under the full key
        assert_eq!(
            adapter.get_raw("tenant-a/index.json").await.unwrap(),
            Some(b"x".to_vec())
        );
        // Scoped listing strips the prefix
        assert_eq!(scoped.list_raw("").await.unwrap(), vec!["index.json"]);
    }
}
