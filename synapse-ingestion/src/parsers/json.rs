//! JSON parser: one record per top-level array element, or a single record
//! for a lone object. JSON-lines input falls out of the same path.

use super::RecordParser;
use crate::detect::FormatKind;
use async_trait::async_trait;
use serde_json::Value;
use synapse_core::{Result, SourceRecord, SynapseError};

pub struct JsonParser;

impl JsonParser {
    fn record_for(value: Value) -> SourceRecord {
        let text = Self::text_of(&value);
        SourceRecord::new(text).with_metadata(value)
    }

    /// Human-readable text for embedding: explicit text-ish fields first,
    /// the compact JSON otherwise. Shared with the YAML parser, which
    /// normalizes through JSON values.
    pub(crate) fn text_of(value: &Value) -> String {
        if let Value::Object(map) = value {
            for field in ["text", "content", "description", "name", "title"] {
                if let Some(Value::String(s)) = map.get(field) {
                    if !s.trim().is_empty() {
                        return s.clone();
                    }
                }
            }
        }
        value.to_string()
    }

    fn parse_json_lines(input: &str) -> Option<Vec<Value>> {
        let mut values = Vec::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            values.push(serde_json::from_str(line).ok()?);
        }
        (!values.is_empty()).then_some(values)
    }
}

#[async_trait]
impl RecordParser for JsonParser {
    fn format(&self) -> FormatKind {
        FormatKind::Json
    }

    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>> {
        let input = std::str::from_utf8(bytes)
            .map_err(|e| SynapseError::invalid_input(format!("JSON is not UTF-8: {e}")))?;

        let values = match serde_json::from_str::<Value>(input) {
            Ok(Value::Array(items)) => items,
            Ok(value) => vec![value],
            Err(top_level_error) => Self::parse_json_lines(input).ok_or_else(|| {
                SynapseError::invalid_input(format!("invalid JSON: {top_level_error}"))
            })?,
        };

        Ok(values.into_iter().map(Self::record_for).collect())
    }
}
