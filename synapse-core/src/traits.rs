//! Seam traits for external collaborators.
//!
//! The embedding model runtime and the entity/relationship classifiers are
//! out-of-process concerns; the engine only sees these traits.

use crate::error::Result;
use crate::types::{NounType, SourceRecord, VerbType};
use async_trait::async_trait;

/// Embedding provider interface: `text -> vector of length D`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// One noun proposed by the classifier for a source record.
#[derive(Debug, Clone)]
pub struct ExtractedNoun {
    /// Display name; also the join key for relationships within the record
    pub name: String,
    pub noun_type: NounType,
    /// Text payload to embed
    pub text: String,
    pub metadata: serde_json::Value,
}

/// One relationship proposed by the classifier, endpoints named within the
/// same extraction.
#[derive(Debug, Clone)]
pub struct ExtractedVerb {
    pub source: String,
    pub target: String,
    pub verb: VerbType,
    /// Classifier weight; scored by the engine when absent
    pub weight: Option<f32>,
}

/// Result of running the classifier over a single record.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub nouns: Vec<ExtractedNoun>,
    pub verbs: Vec<ExtractedVerb>,
}

/// Entity and relationship classifier interface.
///
/// Implementations are black-box scoring ensembles; the import pipeline
/// only depends on this contract.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, record: &SourceRecord) -> Result<Extraction>;
}

/// Deterministic bag-of-tokens embedder for tests.
///
/// Each token hashes to a dimension; vectors are unit-normalized so cosine
/// distance behaves. Trailing plural `s` is stripped so "languages" and
/// "language" land on the same dimension.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn token_dim(&self, token: &str) -> usize {
        // FNV-1a, stable across platforms
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let lower = raw.to_lowercase();
            let token = lower.strip_suffix('s').filter(|t| !t.is_empty()).unwrap_or(&lower);
            vector[self.token_dim(token)] += 1.0;
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
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_mock_embedder_overlap_ranks_higher() {
        let embedder = MockEmbedder::default();
        let query = embedder.embed("programming languages").await.unwrap();
        let on_topic = embedder
            .embed("JavaScript is a programming language")
            .await
            .unwrap();
        let off_topic = embedder
            .embed("Pizza is a delicious Italian food")
            .await
            .unwrap();

        assert!(cosine(&query, &on_topic) > cosine(&query, &off_topic));
    }

    #[tokio::test]
    async fn test_mock_embedder_unit_norm() {
        let embedder = MockEmbedder::new(128);
        let v = embedder.embed("some text here").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
