//! Record parsers for the built-in text formats.
//!
//! A parser turns raw source bytes into a stream of normalized records
//! (rows, sections, objects). Binary formats (PDF, DOCX, Excel) implement
//! the same trait externally and register alongside the built-ins.

use crate::detect::FormatKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use synapse_core::{Result, SourceRecord};

pub mod csv;
pub mod json;
pub mod markdown;
pub mod txt;
pub mod yaml;

pub use csv::CsvParser;
pub use json::JsonParser;
pub use markdown::MarkdownParser;
pub use txt::TextParser;
pub use yaml::YamlParser;

/// Parses one source format into normalized records.
#[async_trait]
pub trait RecordParser: Send + Sync {
    /// The format this parser handles.
    fn format(&self) -> FormatKind;

    /// Parse raw bytes into records.
    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>>;
}

/// Parser lookup by detected format.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<FormatKind, Arc<dyn RecordParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in text-format parsers.
    pub fn builtin() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
        };
        registry.register(Arc::new(JsonParser));
        registry.register(Arc::new(YamlParser));
        registry.register(Arc::new(CsvParser::new()));
        registry.register(Arc::new(MarkdownParser));
        registry.register(Arc::new(TextParser));
        registry
    }

    /// Register or replace the parser for a format. External PDF/OOXML
    /// parsers plug in here.
    pub fn register(&mut self, parser: Arc<dyn RecordParser>) {
        self.parsers.insert(parser.format(), parser);
    }

    pub fn get(&self, format: FormatKind) -> Option<Arc<dyn RecordParser>> {
        self.parsers.get(&format).cloned()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_coverage() {
        let registry = ParserRegistry::builtin();
        for format in [
            FormatKind::Json,
            FormatKind::Yaml,
            FormatKind::Csv,
            FormatKind::Markdown,
            FormatKind::Text,
        ] {
            assert!(registry.get(format).is_some(), "missing parser for {format:?}");
        }
        assert!(registry.get(FormatKind::Pdf).is_none());
    }
}
