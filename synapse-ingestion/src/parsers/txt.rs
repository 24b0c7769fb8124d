//! Plain-text parser: one record per blank-line-delimited paragraph.

use super::RecordParser;
use crate::detect::FormatKind;
use async_trait::async_trait;
use serde_json::json;
use synapse_core::{Result, SourceRecord, SynapseError};

pub struct TextParser;

#[async_trait]
impl RecordParser for TextParser {
    fn format(&self) -> FormatKind {
        FormatKind::Text
    }

    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>> {
        let input = std::str::from_utf8(bytes)
            .map_err(|e| SynapseError::invalid_input(format!("text is not UTF-8: {e}")))?;

        let mut records = Vec::new();
        for (index, paragraph) in input.split("\n\n").enumerate() {
            let text = paragraph.trim();
            if text.is_empty() {
                continue;
            }
            records.push(
                SourceRecord::new(text).with_metadata(json!({ "paragraph": index })),
            );
        }
        Ok(records)
    }
}
