//! Contract tests run against every adapter variant: same key layout, same
//! missing-key and corrupt-value semantics.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use synapse_core::{NounMetadataRecord, NounRecord, NounType, SynapseError, SynapseId, VerbRecord, VerbType};
use synapse_storage::{keys, FsAdapter, MemoryAdapter, Page, StorageAdapter};

fn noun_record(id: SynapseId) -> NounRecord {
    NounRecord {
        id,
        vector: vec![0.5; 8],
        connections: Default::default(),
        level: 0,
    }
}

fn noun_metadata(id: SynapseId, name: &str) -> NounMetadataRecord {
    NounMetadataRecord {
        id,
        name: name.to_string(),
        noun_type: NounType::Concept,
        data: json!({"name": name}),
        created_at: Utc::now(),
        vfs_path: None,
        service: None,
    }
}

fn verb_record(id: SynapseId, source: SynapseId, target: SynapseId) -> VerbRecord {
    VerbRecord {
        id,
        source_id: source,
        target_id: target,
        verb: VerbType::RelatedTo,
        weight: 1.0,
        confidence: None,
        created_at: Utc::now(),
    }
}

async fn exercise_contract(adapter: Arc<dyn StorageAdapter>) {
    let id = SynapseId::new();

    // Missing keys read as None, never as errors
    assert!(adapter.get_noun(id).await.unwrap().is_none());
    assert!(adapter.get_noun_metadata(id).await.unwrap().is_none());

    // Noun roundtrip across both streams
    adapter.save_noun(&noun_record(id)).await.unwrap();
    adapter
        .save_noun_metadata(&noun_metadata(id, "widget"))
        .await
        .unwrap();

    let record = adapter.get_noun(id).await.unwrap().unwrap();
    assert_eq!(record.vector.len(), 8);

    // Metadata-only read leaves the vector empty; joined read fills it
    let entity = adapter.get_noun_entity(id, false).await.unwrap().unwrap();
    assert!(entity.vector.is_empty());
    let entity = adapter.get_noun_entity(id, true).await.unwrap().unwrap();
    assert_eq!(entity.vector.len(), 8);

    // Verb roundtrip and endpoint scans
    let (a, b) = (SynapseId::new(), SynapseId::new());
    let edge = SynapseId::new();
    adapter.save_verb(&verb_record(edge, a, b)).await.unwrap();

    let by_source = adapter.list_verbs_by_source(a).await.unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].id, edge);
    assert!(adapter.list_verbs_by_source(b).await.unwrap().is_empty());
    assert_eq!(adapter.list_verbs_by_target(b).await.unwrap().len(), 1);

    // Listings paginate deterministically
    let all = adapter.list_nouns(Page::all()).await.unwrap();
    assert_eq!(all, vec![id]);
    assert!(adapter
        .list_nouns(Page::new(1, 10))
        .await
        .unwrap()
        .is_empty());

    // Index blobs
    adapter
        .save_index_blob(keys::STATISTICS, b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(
        adapter.load_index_blob(keys::STATISTICS).await.unwrap(),
        Some(b"{}".to_vec())
    );
    assert!(adapter.load_index_blob("missing.json").await.unwrap().is_none());

    // Deletion is idempotent
    adapter.delete_noun(id).await.unwrap();
    adapter.delete_noun(id).await.unwrap();
    assert!(adapter.get_noun(id).await.unwrap().is_none());

    // Corrupt values surface the affected key
    adapter
        .put_raw(&keys::noun(id), b"not json".to_vec())
        .await
        .unwrap();
    match adapter.get_noun(id).await {
        Err(SynapseError::StorageCorrupt { key, .. }) => {
            assert!(key.contains(&id.to_string()));
        }
        other => panic!("expected StorageCorrupt, got {other:?}"),
    }
}

#[tokio::test]
async fn memory_adapter_contract() {
    exercise_contract(Arc::new(MemoryAdapter::new())).await;
}

#[tokio::test]
async fn filesystem_adapter_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise_contract(Arc::new(FsAdapter::new(dir.path()))).await;
}

#[tokio::test]
async fn prefix_isolation() {
    let root = Arc::new(MemoryAdapter::new());
    let tenant_a = root.with_prefix("tenant-a");
    let tenant_b = root.with_prefix("tenant-b");

    let id = SynapseId::new();
    tenant_a.save_noun(&noun_record(id)).await.unwrap();

    assert!(tenant_a.get_noun(id).await.unwrap().is_some());
    assert!(tenant_b.get_noun(id).await.unwrap().is_none());
}
