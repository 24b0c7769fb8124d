//! End-to-end tests of the engine contract against the in-memory adapter.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use synapse_core::{
    Embedder, MockEmbedder, NounType, Result as SynapseResult, SynapseConfig, SynapseError,
    SynapseId, VerbType,
};
use synapse_engine::{
    AddOptions, Applies, Connected, Direction, FindQuery, Migration, RelateOptions, SearchOptions,
    SearchQuery, Synapse,
};
use synapse_index::Filter;
use synapse_storage::{MemoryAdapter, StorageAdapter};

const DIM: usize = 16;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> SynapseConfig {
    init_tracing();
    let mut config = SynapseConfig::default();
    config.vectors.dimensions = DIM;
    config.cache.max_size = Some(4 << 20);
    config
}

async fn open_engine(config: SynapseConfig, adapter: Arc<dyn StorageAdapter>) -> Arc<Synapse> {
    Synapse::builder(config)
        .embedder(Arc::new(MockEmbedder::new(DIM)))
        .adapter(adapter)
        .open()
        .await
        .unwrap()
}

async fn fresh_engine() -> Arc<Synapse> {
    open_engine(test_config(), Arc::new(MemoryAdapter::new())).await
}

/// Embedder that projects a few known topics onto fixed axes, so that
/// on-topic documents rank above off-topic ones regardless of exact word
/// overlap with the query.
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed(&self, text: &str) -> SynapseResult<Vec<f32>> {
        let mut vector = vec![0.0f32; DIM];
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            let token = raw.to_lowercase();
            let topic = match token.as_str() {
                "javascript" | "typescript" | "programming" | "language" | "languages"
                | "types" | "static" | "code" => Some(0),
                "pizza" | "food" | "italian" | "delicious" => Some(1),
                _ => None,
            };
            if let Some(axis) = topic {
                vector[axis] += 1.0;
            }
            // Small word-specific component keeps distinct texts apart
            let bucket = 2 + (token.len() * 7 + token.bytes().map(usize::from).sum::<usize>()) % (DIM - 2);
            vector[bucket] += 0.2;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "topic-test"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

#[tokio::test]
async fn s1_vector_round_trip() {
    let engine = Synapse::builder(test_config())
        .embedder(Arc::new(TopicEmbedder))
        .adapter(Arc::new(MemoryAdapter::new()))
        .open()
        .await
        .unwrap();

    let js = engine
        .add(
            "JavaScript is a programming language",
            NounType::Concept,
            None,
            AddOptions::default(),
        )
        .await
        .unwrap();
    let ts = engine
        .add(
            "TypeScript adds static types to JavaScript",
            NounType::Concept,
            None,
            AddOptions::default(),
        )
        .await
        .unwrap();
    let pizza = engine
        .add(
            "Pizza is a delicious Italian food",
            NounType::Concept,
            None,
            AddOptions::default(),
        )
        .await
        .unwrap();

    let results = engine
        .search(
            SearchQuery::Text("programming languages".to_string()),
            3,
            SearchOptions::default(),
        )
        .await
        .unwrap();

    let ids: Vec<SynapseId> = results.iter().map(|r| r.noun.id).collect();
    let pizza_rank = ids.iter().position(|id| *id == pizza);
    let js_rank = ids.iter().position(|id| *id == js).unwrap();
    let ts_rank = ids.iter().position(|id| *id == ts).unwrap();
    if let Some(pizza_rank) = pizza_rank {
        assert!(js_rank < pizza_rank, "expected {ids:?} with pizza last");
        assert!(ts_rank < pizza_rank, "expected {ids:?} with pizza last");
    }
}

#[tokio::test]
async fn s2_metadata_filter_through_find() {
    let engine = fresh_engine().await;

    let first = engine
        .add(
            "wireless headphones",
            NounType::Product,
            Some(json!({
                "category": "electronics",
                "price": 299,
                "features": ["bluetooth", "noise_canceling"]
            })),
            AddOptions::default(),
        )
        .await
        .unwrap();
    let second = engine
        .add(
            "waterproof speaker",
            NounType::Product,
            Some(json!({
                "category": "electronics",
                "price": 49,
                "features": ["bluetooth", "waterproof"]
            })),
            AddOptions::default(),
        )
        .await
        .unwrap();

    let query = FindQuery::from_json(&json!({
        "where": {
            "category": "electronics",
            "price": {"lte": 300},
            "features": {"in": ["bluetooth"]}
        }
    }))
    .unwrap();
    let hits = engine.find(query, None).await.unwrap();
    let ids: Vec<SynapseId> = hits.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn s3_relationship_dedup() {
    let engine = fresh_engine().await;
    let a = engine
        .add("author", NounType::Person, None, AddOptions::default())
        .await
        .unwrap();
    let b = engine
        .add("book", NounType::Document, None, AddOptions::default())
        .await
        .unwrap();

    let x = engine
        .relate(a, b, VerbType::CreatedBy, RelateOptions::default())
        .await
        .unwrap();
    let y = engine
        .relate(a, b, VerbType::CreatedBy, RelateOptions::default())
        .await
        .unwrap();

    assert_eq!(x, y);
    assert_eq!(engine.verb_count(VerbType::CreatedBy), 1);
}

#[tokio::test]
async fn s5_read_only_permits_reads_and_statistics_refresh() {
    let mut config = test_config();
    config.read_only = true;
    let engine = open_engine(config, Arc::new(MemoryAdapter::new())).await;

    let err = engine
        .add("nope", NounType::Note, None, AddOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SynapseError::ReadOnly));

    // Reads still work
    assert!(engine
        .search(
            SearchQuery::Text("anything".into()),
            5,
            SearchOptions::default()
        )
        .await
        .unwrap()
        .is_empty());

    // Statistics refresh still runs in read-only mode
    engine.refresh_statistics();
    assert!(engine.stats().last_refresh.is_some());
}

#[tokio::test]
async fn frozen_rejects_writes_and_noops_flush() {
    let mut config = test_config();
    config.frozen = true;
    let engine = open_engine(config, Arc::new(MemoryAdapter::new())).await;

    let err = engine
        .add("nope", NounType::Note, None, AddOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SynapseError::Frozen));

    engine.flush().await.unwrap();
    // Frozen flush persisted nothing
    assert!(engine
        .adapter()
        .load_index_blob("index.json")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn vector_visibility_contract() {
    let engine = fresh_engine().await;
    let id = engine
        .add("an entity", NounType::Thing, None, AddOptions::default())
        .await
        .unwrap();

    let stripped = engine.get(id, false).await.unwrap().unwrap();
    assert!(stripped.vector.is_empty());

    let full = engine.get(id, true).await.unwrap().unwrap();
    assert_eq!(full.vector.len(), DIM);

    // Missing ids read as None, never as errors
    assert!(engine.get(SynapseId::new(), false).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_removes_every_trace() {
    let engine = fresh_engine().await;
    let a = engine
        .add(
            "alpha",
            NounType::Concept,
            Some(json!({"tag": "keep"})),
            AddOptions::default(),
        )
        .await
        .unwrap();
    let b = engine
        .add("beta", NounType::Concept, None, AddOptions::default())
        .await
        .unwrap();
    engine
        .relate(a, b, VerbType::RelatedTo, RelateOptions::default())
        .await
        .unwrap();
    engine
        .relate(b, a, VerbType::References, RelateOptions::default())
        .await
        .unwrap();

    engine.delete(a).await.unwrap();

    assert!(engine.get(a, false).await.unwrap().is_none());
    assert!(engine.neighbors(a, None, Direction::Any).is_empty());
    assert!(engine.neighbors(b, None, Direction::Any).is_empty());
    assert_eq!(engine.verb_count(VerbType::RelatedTo), 0);
    assert_eq!(engine.verb_count(VerbType::References), 0);

    // No metadata posting survives
    let hits = engine
        .find(
            FindQuery::new().filter(Filter::Eq("tag".into(), json!("keep"))),
            None,
        )
        .await
        .unwrap();
    assert!(hits.is_empty());

    // No vector hit survives
    let results = engine
        .search(SearchQuery::Entity(b), 10, SearchOptions::default())
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.noun.id != a));

    // Double delete is a no-op
    engine.delete(a).await.unwrap();
}

#[tokio::test]
async fn update_merges_metadata_and_keeps_payload() {
    let engine = fresh_engine().await;
    let id = engine
        .add(
            "stable payload",
            NounType::Document,
            Some(json!({"state": "open", "nested": {"a": 1}})),
            AddOptions::default(),
        )
        .await
        .unwrap();

    engine
        .update(id, &json!({"state": "closed", "nested": {"b": 2}}))
        .await
        .unwrap();

    let noun = engine.get(id, false).await.unwrap().unwrap();
    assert_eq!(noun.metadata["state"], "closed");
    assert_eq!(noun.metadata["nested"]["a"], 1);
    assert_eq!(noun.metadata["nested"]["b"], 2);
    assert_eq!(noun.name, "stable payload");

    let err = engine
        .update(SynapseId::new(), &json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, SynapseError::EntityNotFound(_)));
}

#[tokio::test]
async fn search_filter_with_no_matches_skips_ann() {
    let engine = fresh_engine().await;
    engine
        .add(
            "something",
            NounType::Thing,
            Some(json!({"category": "a"})),
            AddOptions::default(),
        )
        .await
        .unwrap();

    let results = engine
        .search(
            SearchQuery::Text("something".into()),
            5,
            SearchOptions {
                filter: Some(Filter::Eq("category".into(), json!("nonexistent"))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn k_larger_than_population_returns_all_ranked() {
    let engine = fresh_engine().await;
    for i in 0..4 {
        engine
            .add(
                &format!("entity number {i}"),
                NounType::Thing,
                None,
                AddOptions::default(),
            )
            .await
            .unwrap();
    }
    let results = engine
        .search(
            SearchQuery::Text("entity number 0".into()),
            100,
            SearchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[tokio::test]
async fn relate_validates_endpoints_and_weight() {
    let engine = fresh_engine().await;
    let a = engine
        .add("exists", NounType::Thing, None, AddOptions::default())
        .await
        .unwrap();

    let err = engine
        .relate(a, SynapseId::new(), VerbType::Knows, RelateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SynapseError::EntityNotFound(_)));

    let b = engine
        .add("also exists", NounType::Thing, None, AddOptions::default())
        .await
        .unwrap();
    let err = engine
        .relate(
            a,
            b,
            VerbType::Knows,
            RelateOptions {
                weight: Some(1.5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SynapseError::InvalidInput(_)));
}

#[tokio::test]
async fn find_connected_intersects_with_where() {
    let engine = fresh_engine().await;
    let org = engine
        .add("Acme Corp", NounType::Organization, None, AddOptions::default())
        .await
        .unwrap();
    let alice = engine
        .add(
            "Alice",
            NounType::Person,
            Some(json!({"role": "engineer"})),
            AddOptions::default(),
        )
        .await
        .unwrap();
    let bob = engine
        .add(
            "Bob",
            NounType::Person,
            Some(json!({"role": "designer"})),
            AddOptions::default(),
        )
        .await
        .unwrap();
    engine
        .relate(alice, org, VerbType::WorksAt, RelateOptions::default())
        .await
        .unwrap();
    engine
        .relate(bob, org, VerbType::WorksAt, RelateOptions::default())
        .await
        .unwrap();

    // Everyone working at the org, filtered to engineers
    let query = FindQuery::new()
        .filter(Filter::Eq("role".into(), json!("engineer")))
        .connected(Connected {
            from: org,
            verb: Some(VerbType::WorksAt),
            direction: Direction::In,
        });
    let hits = engine.find(query, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].noun.id, alice);
}

#[tokio::test]
async fn flush_then_reopen_recovers_without_replay() {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
    let a;
    let b;
    {
        let engine = open_engine(test_config(), Arc::clone(&adapter)).await;
        a = engine
            .add(
                "first entity",
                NounType::Concept,
                Some(json!({"k": "v"})),
                AddOptions::default(),
            )
            .await
            .unwrap();
        b = engine
            .add("second entity", NounType::Concept, None, AddOptions::default())
            .await
            .unwrap();
        engine
            .relate(a, b, VerbType::RelatedTo, RelateOptions::default())
            .await
            .unwrap();
        engine.shutdown().await.unwrap();
    }

    let engine = open_engine(test_config(), adapter).await;
    assert_eq!(engine.stats().noun_count, 2);
    assert_eq!(engine.verb_count(VerbType::RelatedTo), 1);
    assert_eq!(engine.neighbors(a, None, Direction::Out), vec![b]);

    let results = engine
        .search(SearchQuery::Entity(a), 2, SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].noun.id, a);
}

#[tokio::test]
async fn unflushed_writes_recover_through_wal_replay() {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
    let a;
    let b;
    {
        let engine = open_engine(test_config(), Arc::clone(&adapter)).await;
        a = engine
            .add(
                "persisted but not flushed",
                NounType::Concept,
                Some(json!({"recovered": true})),
                AddOptions::default(),
            )
            .await
            .unwrap();
        b = engine
            .add("another", NounType::Concept, None, AddOptions::default())
            .await
            .unwrap();
        engine
            .relate(a, b, VerbType::References, RelateOptions::default())
            .await
            .unwrap();
        // Dropped without flush: simulated crash
    }

    let engine = open_engine(test_config(), adapter).await;
    let hits = engine
        .find(
            FindQuery::new().filter(Filter::Eq("recovered".into(), json!(true))),
            None,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].noun.id, a);
    assert_eq!(engine.verb_count(VerbType::References), 1);
}

#[tokio::test]
async fn dedup_merges_near_duplicates() {
    let mut config = test_config();
    config.dedup.enabled = true;
    config.dedup.threshold = 0.99;
    let engine = open_engine(config, Arc::new(MemoryAdapter::new())).await;

    let first = engine
        .add(
            "identical text payload",
            NounType::Note,
            Some(json!({"a": 1})),
            AddOptions::default(),
        )
        .await
        .unwrap();
    let second = engine
        .add(
            "identical text payload",
            NounType::Note,
            Some(json!({"b": 2})),
            AddOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    let noun = engine.get(first, false).await.unwrap().unwrap();
    assert_eq!(noun.metadata["a"], 1);
    assert_eq!(noun.metadata["b"], 2);
    assert_eq!(engine.stats().noun_count, 1);

    // Different type never merges
    let third = engine
        .add(
            "identical text payload",
            NounType::Task,
            None,
            AddOptions::default(),
        )
        .await
        .unwrap();
    assert_ne!(first, third);
}

#[tokio::test]
async fn migrations_run_at_open_and_reindex() {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
    {
        let engine = open_engine(test_config(), Arc::clone(&adapter)).await;
        engine
            .add(
                "migratable",
                NounType::Document,
                Some(json!({"state": "open"})),
                AddOptions::default(),
            )
            .await
            .unwrap();
        engine.shutdown().await.unwrap();
    }

    let rename = Migration::new("rename-state", 1, Applies::Nouns, |data| {
        let state = data.get("state")?.clone();
        let mut updated = data.clone();
        let map = updated.as_object_mut()?;
        map.remove("state");
        map.insert("status".to_string(), state);
        Some(updated)
    });

    let engine = Synapse::builder(test_config())
        .embedder(Arc::new(MockEmbedder::new(DIM)))
        .adapter(adapter)
        .migrations(vec![rename])
        .open()
        .await
        .unwrap();

    let hits = engine
        .find(
            FindQuery::new().filter(Filter::Eq("status".into(), json!("open"))),
            None,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(engine
        .find(
            FindQuery::new().filter(Filter::Eq("state".into(), json!("open"))),
            None
        )
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn service_tagging_shows_up_in_stats() {
    let mut config = test_config();
    config.default_service = Some("default-svc".to_string());
    let engine = open_engine(config, Arc::new(MemoryAdapter::new())).await;

    engine
        .add("tagged", NounType::Thing, None, AddOptions::default())
        .await
        .unwrap();
    engine
        .add(
            "explicit",
            NounType::Thing,
            None,
            AddOptions {
                service: Some("importer".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let services = engine.list_services();
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["default-svc", "importer"]);
    assert_eq!(services[0].operations.adds, 1);

    let stats = engine.stats();
    assert_eq!(stats.noun_count, 2);
    assert_eq!(stats.noun_types.get("Thing"), Some(&2));
}

#[tokio::test]
async fn search_by_entity_resolves_vector_from_storage() {
    let engine = fresh_engine().await;
    let a = engine
        .add("target entity text", NounType::Concept, None, AddOptions::default())
        .await
        .unwrap();
    engine
        .add("unrelated words entirely", NounType::Concept, None, AddOptions::default())
        .await
        .unwrap();

    // The stripped read has no vector, but search({to: id}) works anyway
    let stripped = engine.get(a, false).await.unwrap().unwrap();
    assert!(stripped.vector.is_empty());

    let results = engine
        .search(SearchQuery::Entity(a), 1, SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].noun.id, a);
    assert!(results[0].distance < 1e-5);
}
