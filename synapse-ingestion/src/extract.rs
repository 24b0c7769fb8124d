//! Default record extractor.
//!
//! The real entity and relationship classifiers are external ensembles
//! behind the `EntityExtractor` trait; this default turns each normalized
//! record into exactly one noun of a fixed type, which is what structured
//! imports (CSV rows, JSON objects) want when no classifier is wired in.

use async_trait::async_trait;
use synapse_core::{
    EntityExtractor, ExtractedNoun, Extraction, NounType, Result, SourceRecord,
};

/// One noun per record, typed up front, named from the record.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    noun_type: NounType,
}

impl RecordExtractor {
    pub fn new(noun_type: NounType) -> Self {
        Self { noun_type }
    }
}

#[async_trait]
impl EntityExtractor for RecordExtractor {
    async fn extract(&self, record: &SourceRecord) -> Result<Extraction> {
        let name = record
            .metadata
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| record.text.chars().take(80).collect());

        Ok(Extraction {
            nouns: vec![ExtractedNoun {
                name,
                noun_type: self.noun_type,
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            }],
            verbs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_one_noun_per_record() {
        let extractor = RecordExtractor::new(NounType::Product);
        let record = SourceRecord::new("a widget for sale")
            .with_metadata(json!({"name": "widget", "price": 10}));

        let extraction = extractor.extract(&record).await.unwrap();
        assert_eq!(extraction.nouns.len(), 1);
        assert_eq!(extraction.nouns[0].name, "widget");
        assert_eq!(extraction.nouns[0].noun_type, NounType::Product);
        assert!(extraction.verbs.is_empty());
    }

    #[tokio::test]
    async fn test_name_falls_back_to_text() {
        let extractor = RecordExtractor::new(NounType::Note);
        let record = SourceRecord::new("short text");
        let extraction = extractor.extract(&record).await.unwrap();
        assert_eq!(extraction.nouns[0].name, "short text");
    }
}
