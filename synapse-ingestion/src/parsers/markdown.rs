//! Markdown parser: one record per heading-delimited section, with the
//! heading path carried in metadata.

use super::RecordParser;
use crate::detect::FormatKind;
use async_trait::async_trait;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde_json::json;
use synapse_core::{Result, SourceRecord, SynapseError};

pub struct MarkdownParser;

fn level_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[async_trait]
impl RecordParser for MarkdownParser {
    fn format(&self) -> FormatKind {
        FormatKind::Markdown
    }

    async fn parse(&self, bytes: &[u8]) -> Result<Vec<SourceRecord>> {
        let input = std::str::from_utf8(bytes)
            .map_err(|e| SynapseError::invalid_input(format!("Markdown is not UTF-8: {e}")))?;

        let mut records = Vec::new();
        let mut heading_path: Vec<(usize, String)> = Vec::new();
        let mut in_heading = false;
        let mut pending_heading = String::new();
        let mut pending_level = 0usize;
        let mut section = String::new();

        let flush_section =
            |section: &mut String, heading_path: &[(usize, String)], records: &mut Vec<SourceRecord>| {
                let text = section.trim().to_string();
                section.clear();
                if text.is_empty() {
                    return;
                }
                let path: Vec<&str> = heading_path.iter().map(|(_, h)| h.as_str()).collect();
                records.push(SourceRecord::new(text).with_metadata(json!({
                    "headings": path,
                    "section": path.last().copied().unwrap_or(""),
                })));
            };

        for event in Parser::new(input) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    flush_section(&mut section, &heading_path, &mut records);
                    in_heading = true;
                    pending_heading.clear();
                    pending_level = level_depth(level);
                }
                Event::End(TagEnd::Heading(_)) => {
                    in_heading = false;
                    heading_path.retain(|(depth, _)| *depth < pending_level);
                    heading_path.push((pending_level, pending_heading.trim().to_string()));
                }
                Event::Text(text) | Event::Code(text) => {
                    if in_heading {
                        pending_heading.push_str(&text);
                    } else {
                        section.push_str(&text);
                        section.push(' ');
                    }
                }
                Event::SoftBreak | Event::HardBreak => section.push(' '),
                Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => section.push('\n'),
                _ => {}
            }
        }
        flush_section(&mut section, &heading_path, &mut records);

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sections_by_heading() {
        let input = b"# Title\n\nIntro paragraph.\n\n## Details\n\nBody text here.\n";
        let records = MarkdownParser.parse(input).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].text.contains("Intro paragraph"));
        assert_eq!(records[0].metadata["headings"], serde_json::json!(["Title"]));
        assert_eq!(
            records[1].metadata["headings"],
            serde_json::json!(["Title", "Details"])
        );
    }

    #[tokio::test]
    async fn test_sibling_headings_replace() {
        let input = b"## A\n\none\n\n## B\n\ntwo\n";
        let records = MarkdownParser.parse(input).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].metadata["section"], "B");
    }

    #[tokio::test]
    async fn test_body_without_headings() {
        let records = MarkdownParser.parse(b"just some prose\n").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata["section"], "");
    }
}
