//! YAML parser: multi-document streams and top-level sequences both yield
//! one record per item, converted through JSON values so downstream code
//! sees a single metadata shape.

use super::{json::JsonParser, RecordParser};
use crate::detect::FormatKind;
use async_trait::async_trait;
use serde_json::Value;
use synapse_core::{Result, SourceRecord, SynapseError};

pub struct YamlParser;

#[async_trait]
impl RecordParser for YamlParser {
    fn format(&self) -> FormatKind {
        FormatKind::Yaml
    }

    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>> {
        let input = std::str::from_utf8(bytes)
            .map_err(|e| SynapseError::invalid_input(format!("YAML is not UTF-8: {e}")))?;

        let mut values: Vec<Value> = Vec::new();
        for document in serde_yaml::Deserializer::from_str(input) {
            let value: serde_yaml::Value = serde::Deserialize::deserialize(document)
                .map_err(|e| SynapseError::invalid_input(format!("invalid YAML: {e}")))?;
            let json: Value = serde_json::to_value(value)
                .map_err(|e| SynapseError::invalid_input(format!("unrepresentable YAML: {e}")))?;
            match json {
                Value::Array(items) => values.extend(items),
                Value::Null => {}
                other => values.push(other),
            }
        }

        Ok(values
            .into_iter()
            .map(|v| {
                let text = JsonParser::text_of(&v);
                SourceRecord::new(text).with_metadata(v)
            })
            .collect())
    }
}
