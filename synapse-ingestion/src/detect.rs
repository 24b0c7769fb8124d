//! Source format detection.
//!
//! Order of evidence: magic bytes, then the file extension, then a content
//! sniff over the leading bytes. Binary container formats (PDF, OOXML) are
//! detected so they can be routed to external parsers; the text formats
//! have built-in parsers.

use std::path::Path;

/// Detected source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Json,
    Yaml,
    Csv,
    Markdown,
    Text,
    /// PDF container; parsed by an external `RecordParser`
    Pdf,
    /// OOXML container (DOCX/XLSX); parsed by an external `RecordParser`
    Ooxml,
    Unknown,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Json => "json",
            FormatKind::Yaml => "yaml",
            FormatKind::Csv => "csv",
            FormatKind::Markdown => "markdown",
            FormatKind::Text => "text",
            FormatKind::Pdf => "pdf",
            FormatKind::Ooxml => "ooxml",
            FormatKind::Unknown => "unknown",
        }
    }

    /// Detect from extension alone.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "csv" | "tsv" => Self::Csv,
            "md" | "markdown" | "mdown" | "mkd" => Self::Markdown,
            "txt" | "text" | "log" => Self::Text,
            "pdf" => Self::Pdf,
            "docx" | "xlsx" => Self::Ooxml,
            _ => Self::Unknown,
        }
    }
}

/// Detect a source's format from its name and leading bytes.
pub fn detect(name: &str, bytes: &[u8]) -> FormatKind {
    // Magic bytes win over everything
    if bytes.starts_with(b"%PDF") {
        return FormatKind::Pdf;
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return FormatKind::Ooxml;
    }

    if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
        let by_ext = FormatKind::from_extension(ext);
        if by_ext != FormatKind::Unknown {
            return by_ext;
        }
        // mime_guess covers the long tail of text-ish extensions
        if let Some(mime) = mime_guess::from_ext(ext).first() {
            match (mime.type_().as_str(), mime.subtype().as_str()) {
                ("application", "json") => return FormatKind::Json,
                ("text", "csv") => return FormatKind::Csv,
                ("text", "markdown") => return FormatKind::Markdown,
                ("text", _) => return FormatKind::Text,
                _ => {}
            }
        }
    }

    sniff_content(bytes)
}

/// Content sniff over the leading bytes; UTF-8 text formats only.
fn sniff_content(bytes: &[u8]) -> FormatKind {
    let head = &bytes[..bytes.len().min(4096)];
    let Ok(text) = std::str::from_utf8(head) else {
        return FormatKind::Unknown;
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return FormatKind::Json;
    }
    if trimmed.starts_with("---") {
        return FormatKind::Yaml;
    }
    if trimmed.starts_with('#') {
        return FormatKind::Markdown;
    }

    // CSV: at least two lines agreeing on a comma count above zero
    let mut lines = trimmed.lines().filter(|l| !l.trim().is_empty());
    if let (Some(first), Some(second)) = (lines.next(), lines.next()) {
        let commas = first.matches(',').count();
        if commas > 0 && second.matches(',').count() == commas {
            return FormatKind::Csv;
        }
    }

    // YAML: leading "key: value" line
    if let Some(first) = trimmed.lines().next() {
        if let Some((key, _)) = first.split_once(':') {
            if !key.is_empty() && !key.contains(char::is_whitespace) {
                return FormatKind::Yaml;
            }
        }
    }

    if trimmed.is_empty() {
        FormatKind::Unknown
    } else {
        FormatKind::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes_beat_extension() {
        assert_eq!(detect("report.txt", b"%PDF-1.7 ..."), FormatKind::Pdf);
        assert_eq!(detect("archive.csv", b"PK\x03\x04rest"), FormatKind::Ooxml);
    }

    #[test]
    fn test_extension_detection() {
        assert_eq!(detect("data.json", b""), FormatKind::Json);
        assert_eq!(detect("doc.md", b""), FormatKind::Markdown);
        assert_eq!(detect("rows.csv", b""), FormatKind::Csv);
        assert_eq!(detect("config.yml", b""), FormatKind::Yaml);
        assert_eq!(detect("notes.txt", b""), FormatKind::Text);
    }

    #[test]
    fn test_content_sniffing() {
        assert_eq!(detect("blob", b"{\"a\": 1}"), FormatKind::Json);
        assert_eq!(detect("blob", b"[1, 2, 3]"), FormatKind::Json);
        assert_eq!(detect("blob", b"--- \nkey: value\n"), FormatKind::Yaml);
        assert_eq!(detect("blob", b"# Heading\n\nbody"), FormatKind::Markdown);
        assert_eq!(detect("blob", b"a,b,c\n1,2,3\n"), FormatKind::Csv);
        assert_eq!(detect("blob", b"name: value\nother: 2\n"), FormatKind::Yaml);
        assert_eq!(detect("blob", b"plain prose without structure"), FormatKind::Text);
        assert_eq!(detect("blob", b"\xff\xfe\x00\x01"), FormatKind::Unknown);
    }
}
