//! Single-directory filesystem adapter.
//!
//! One file per key under a root directory. Writes go through a temp file
//! and rename so readers never observe a torn object.

use crate::adapter::{join_prefix, sorted_keys, StorageAdapter};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synapse_core::{Result, SynapseError};
use tokio::fs;
use tracing::debug;

/// Filesystem adapter rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FsAdapter {
    root: PathBuf,
    prefix: String,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: String::new(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let scoped = join_prefix(&self.prefix, key);
        let mut path = self.root.clone();
        for segment in scoped.split('/') {
            path.push(segment);
        }
        path
    }

    fn map_io(key: &str, err: std::io::Error) -> SynapseError {
        match err.kind() {
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => SynapseError::StorageFull,
            _ => SynapseError::unavailable(key, err.to_string()),
        }
    }

    async fn collect_keys(dir: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(base) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FsAdapter {
    async fn put_raw(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(key, e))?;
        }

        // Temp file + rename keeps single-key writes atomic
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Self::map_io(key, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::map_io(key, e))?;
        debug!(key, bytes = bytes.len(), "wrote object");
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io(key, e)),
        }
    }

    async fn delete_raw(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(key, e)),
        }
    }

    async fn list_raw(&self, prefix: &str) -> Result<Vec<String>> {
        let scoped = join_prefix(&self.prefix, prefix);
        let mut base = self.root.clone();
        if !self.prefix.is_empty() {
            for segment in self.prefix.trim_end_matches('/').split('/') {
                base.push(segment);
            }
        }

        let mut all = Vec::new();
        Self::collect_keys(&base, &base, &mut all)
            .await
            .map_err(|e| Self::map_io(&scoped, e))?;

        let rel_prefix = prefix.to_string();
        Ok(sorted_keys(
            all.into_iter().filter(|k| k.starts_with(&rel_prefix)),
        ))
    }

    fn with_prefix(&self, prefix: &str) -> Arc<dyn StorageAdapter> {
        Arc::new(Self {
            root: self.root.clone(),
            prefix: join_prefix(&self.prefix, prefix),
        })
    }

    fn describe(&self) -> String {
        format!("filesystem ({})", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());

        adapter
            .put_raw("nouns/a.json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            adapter.get_raw("nouns/a.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(adapter.get_raw("nouns/missing.json").await.unwrap(), None);

        adapter.delete_raw("nouns/a.json").await.unwrap();
        assert_eq!(adapter.get_raw("nouns/a.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_recurses_and_sorts() {
        let dir = tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());

        adapter.put_raw("wal/2.json", vec![]).await.unwrap();
        adapter.put_raw("wal/1.json", vec![]).await.unwrap();
        adapter.put_raw("index.json", vec![]).await.unwrap();

        assert_eq!(
            adapter.list_raw("wal/").await.unwrap(),
            vec!["wal/1.json", "wal/2.json"]
        );
    }

    #[tokio::test]
    async fn test_prefix_scoping() {
        let dir = tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        let scoped = adapter.with_prefix("tenant-b");

        scoped.put_raw("index.json", b"1".to_vec()).await.unwrap();
        assert_eq!(
            adapter.get_raw("tenant-b/index.json").await.unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(scoped.list_raw("").await.unwrap(), vec!["index.json"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path().join("not-created"));
        assert!(adapter.list_raw("nouns/").await.unwrap().is_empty());
    }
}
