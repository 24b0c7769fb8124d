//! CSV parser: one record per data row, header-keyed metadata.

use super::RecordParser;
use crate::detect::FormatKind;
use async_trait::async_trait;
use csv::ReaderBuilder;
use serde_json::{Map, Value};
use synapse_core::{Result, SourceRecord, SynapseError};

pub struct CsvParser {
    has_headers: bool,
}

impl CsvParser {
    pub fn new() -> Self {
        Self { has_headers: true }
    }

    pub fn without_headers() -> Self {
        Self { has_headers: false }
    }

    /// Numbers and booleans keep their type in metadata; everything else
    /// stays a string.
    fn typed(value: &str) -> Value {
        if let Ok(n) = value.parse::<i64>() {
            return Value::from(n);
        }
        if let Ok(f) = value.parse::<f64>() {
            if f.is_finite() {
                return Value::from(f);
            }
        }
        match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(value.to_string()),
        }
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordParser for CsvParser {
    fn format(&self) -> FormatKind {
        FormatKind::Csv
    }

    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(self.has_headers)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = if self.has_headers {
            reader
                .headers()
                .map_err(|e| SynapseError::invalid_input(format!("bad CSV headers: {e}")))?
                .iter()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        let mut records = Vec::new();
        for (row_index, row) in reader.records().enumerate() {
            let row =
                row.map_err(|e| SynapseError::invalid_input(format!("bad CSV row: {e}")))?;

            let mut fields = Map::new();
            let mut text_parts = Vec::with_capacity(row.len());
            for (column, value) in row.iter().enumerate() {
                let key = headers
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| format!("col_{column}"));
                text_parts.push(format!("{key}: {value}"));
                fields.insert(key, Self::typed(value));
            }
            fields.insert("_row".to_string(), Value::from(row_index));

            records.push(
                SourceRecord::new(text_parts.join(", ")).with_metadata(Value::Object(fields)),
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_keyed_rows() {
        let records = CsvParser::new()
            .parse(b"name,price,active\nwidget,9.5,true\ngadget,3,false\n")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata["name"], "widget");
        assert_eq!(records[0].metadata["price"], 9.5);
        assert_eq!(records[0].metadata["active"], true);
        assert_eq!(records[1].metadata["price"], 3);
        assert!(records[0].text.contains("name: widget"));
    }

    #[tokio::test]
    async fn test_headerless_rows() {
        let records = CsvParser::without_headers()
            .parse(b"a,b\nc,d\n")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata["col_0"], "a");
    }

    #[tokio::test]
    async fn test_row_index_recorded() {
        let records = CsvParser::new().parse(b"x\n1\n2\n3\n").await.unwrap();
        assert_eq!(records[2].metadata["_row"], 2);
    }
}
