//! Write-ahead log and checkpointing.
//!
//! Every index-state-changing operation appends a record before the
//! in-memory change becomes visible. A checkpoint appends a `FlushMarker`
//! and truncates older entries; replay re-applies everything after the last
//! marker. Records carry the minimal payload to redo the in-memory index
//! change — the entity data itself is re-read from the record streams,
//! which are written before the WAL entry.

use crate::adapter::StorageAdapter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use synapse_core::{Result, SynapseError, SynapseId, VerbType};
use tracing::{debug, info, warn};

const WAL_PREFIX: &str = "wal/";

/// One replayable index mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WalRecord {
    AddNoun {
        id: SynapseId,
    },
    AddVerb {
        id: SynapseId,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    },
    UpdateMetadata {
        id: SynapseId,
    },
    DeleteNoun {
        id: SynapseId,
    },
    DeleteVerb {
        id: SynapseId,
        source: SynapseId,
        target: SynapseId,
        verb: VerbType,
    },
    FlushMarker,
}

impl WalRecord {
    pub fn is_marker(&self) -> bool {
        matches!(self, WalRecord::FlushMarker)
    }
}

/// Append-ordered WAL over a storage adapter.
///
/// Sequence numbers are zero-padded so lexicographic key order equals
/// append order on every backend.
pub struct WalWriter {
    adapter: Arc<dyn StorageAdapter>,
    next_seq: AtomicU64,
    /// Extra copies written per record for cross-zone durability
    redundancy: usize,
}

impl WalWriter {
    /// Open the WAL, resuming the sequence after any existing entries.
    pub async fn open(adapter: Arc<dyn StorageAdapter>, redundancy: usize) -> Result<Self> {
        let keys = adapter.list_raw(WAL_PREFIX).await?;
        let next = keys
            .iter()
            .filter_map(|k| Self::seq_of(k))
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);
        Ok(Self {
            adapter,
            next_seq: AtomicU64::new(next),
            redundancy,
        })
    }

    fn key_for(seq: u64) -> String {
        format!("{WAL_PREFIX}{seq:020}.json")
    }

    fn copy_key_for(copy: usize, seq: u64) -> String {
        format!("wal-copy{copy}/{seq:020}.json")
    }

    fn seq_of(key: &str) -> Option<u64> {
        key.strip_prefix(WAL_PREFIX)?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    /// Append a record; returns its sequence number.
    pub async fn append(&self, record: &WalRecord) -> Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(record)?;
        self.adapter
            .put_with_retry(&Self::key_for(seq), bytes.clone())
            .await?;
        for copy in 0..self.redundancy {
            self.adapter
                .put_with_retry(&Self::copy_key_for(copy, seq), bytes.clone())
                .await?;
        }
        debug!(seq, ?record, "appended WAL record");
        Ok(seq)
    }

    /// Records after the last `FlushMarker`, in append order.
    ///
    /// An empty result means the log is clean and no replay is needed.
    /// Unreadable entries are skipped with a warning; replay application
    /// must tolerate duplicates.
    pub async fn pending(&self) -> Result<Vec<WalRecord>> {
        let keys = self.adapter.list_raw(WAL_PREFIX).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.adapter.get_with_retry(key).await? {
                Some(bytes) => match serde_json::from_slice::<WalRecord>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(key, error = %e, "skipping unreadable WAL record"),
                },
                None => warn!(key, "WAL entry vanished during replay scan"),
            }
        }

        let cut = records
            .iter()
            .rposition(WalRecord::is_marker)
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(records.split_off(cut))
    }

    /// Append a `FlushMarker` and truncate everything older than it.
    ///
    /// Callers persist the index singletons first; after this returns, a
    /// cold restart recovers without replay.
    pub async fn checkpoint(&self) -> Result<u64> {
        let marker_seq = self.append(&WalRecord::FlushMarker).await?;
        let marker_key = Self::key_for(marker_seq);

        let keys = self.adapter.list_raw(WAL_PREFIX).await?;
        let mut truncated = 0usize;
        for key in keys {
            if key < marker_key {
                self.adapter.delete_with_retry(&key).await?;
                if let Some(seq) = Self::seq_of(&key) {
                    for copy in 0..self.redundancy {
                        self.adapter
                            .delete_with_retry(&Self::copy_key_for(copy, seq))
                            .await?;
                    }
                }
                truncated += 1;
            }
        }

        info!(marker_seq, truncated, "WAL checkpoint");
        Ok(marker_seq)
    }

    /// Whether the log tail indicates a clean shutdown.
    pub async fn is_clean(&self) -> Result<bool> {
        Ok(self.pending().await?.is_empty())
    }
}

/// Recovery error helper: wraps replay failures with context.
pub fn replay_error(detail: impl std::fmt::Display) -> SynapseError {
    SynapseError::internal(format!("WAL replay failed: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;

    fn adapter() -> Arc<dyn StorageAdapter> {
        Arc::new(MemoryAdapter::new())
    }

    #[tokio::test]
    async fn test_append_and_pending() {
        let wal = WalWriter::open(adapter(), 0).await.unwrap();
        let id = SynapseId::new();

        wal.append(&WalRecord::AddNoun { id }).await.unwrap();
        wal.append(&WalRecord::UpdateMetadata { id }).await.unwrap();

        let pending = wal.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0], WalRecord::AddNoun { id });
    }

    #[tokio::test]
    async fn test_checkpoint_truncates() {
        let storage = adapter();
        let wal = WalWriter::open(Arc::clone(&storage), 0).await.unwrap();
        let id = SynapseId::new();

        wal.append(&WalRecord::AddNoun { id }).await.unwrap();
        wal.checkpoint().await.unwrap();

        assert!(wal.is_clean().await.unwrap());
        // Only the marker remains in the log
        assert_eq!(storage.list_raw("wal/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_after_marker() {
        let wal = WalWriter::open(adapter(), 0).await.unwrap();
        let id = SynapseId::new();

        wal.append(&WalRecord::AddNoun { id }).await.unwrap();
        wal.checkpoint().await.unwrap();
        wal.append(&WalRecord::DeleteNoun { id }).await.unwrap();

        let pending = wal.pending().await.unwrap();
        assert_eq!(pending, vec![WalRecord::DeleteNoun { id }]);
    }

    #[tokio::test]
    async fn test_sequence_resumes_after_reopen() {
        let storage = adapter();
        {
            let wal = WalWriter::open(Arc::clone(&storage), 0).await.unwrap();
            wal.append(&WalRecord::FlushMarker).await.unwrap();
        }
        let wal = WalWriter::open(Arc::clone(&storage), 0).await.unwrap();
        let seq = wal.append(&WalRecord::FlushMarker).await.unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn test_redundant_copies() {
        let storage = adapter();
        let wal = WalWriter::open(Arc::clone(&storage), 2).await.unwrap();
        wal.append(&WalRecord::AddNoun { id: SynapseId::new() })
            .await
            .unwrap();

        assert_eq!(storage.list_raw("wal-copy0/").await.unwrap().len(), 1);
        assert_eq!(storage.list_raw("wal-copy1/").await.unwrap().len(), 1);
    }
}
