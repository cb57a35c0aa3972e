//! Source documents and their extraction metadata.

use crate::generator::Attachment;
use crate::utils::{base64_bytes, sha256_hex};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// How the text of a document was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Embedded text layer.
    #[default]
    Text,
    /// Optical character recognition of a scanned document.
    Ocr,
}

/// A table detected on one page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// 1-based page number.
    pub page: usize,
    /// Header row, when one was detected.
    #[serde(default)]
    pub headers: Option<Vec<String>>,
    /// Body rows with empty rows removed.
    pub rows: Vec<Vec<String>>,
}

impl ExtractedTable {
    /// Number of columns (widest of header and rows).
    #[must_use]
    pub fn column_count(&self) -> usize {
        let header = self.headers.as_ref().map_or(0, Vec::len);
        self.rows.iter().map(Vec::len).fold(header, usize::max)
    }

    /// Renders the table as a pipe-delimited block.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if let Some(headers) = &self.headers {
            let _ = writeln!(out, "| {} |", headers.join(" | "));
            let _ = writeln!(out, "|{}", " --- |".repeat(headers.len().max(1)));
        }
        for row in &self.rows {
            let _ = writeln!(out, "| {} |", row.join(" | "));
        }
        out
    }
}

/// Text and tables extracted from a document ahead of generation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentExtraction {
    /// Full text, pages separated by blank lines.
    pub text: String,
    /// Tables in page order.
    #[serde(default)]
    pub tables: Vec<ExtractedTable>,
    /// Number of pages.
    pub page_count: usize,
    /// Whether the document is primarily image based.
    #[serde(default)]
    pub is_scanned: bool,
    /// How the text was obtained.
    #[serde(default)]
    pub method: ExtractionMethod,
}

impl DocumentExtraction {
    /// Renders the extraction for inclusion in a prompt, truncating the text
    /// to at most `max_text_chars` characters.
    #[must_use]
    pub fn render_for_prompt(&self, max_text_chars: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Pages: {} | Method: {} | Scanned: {}",
            self.page_count,
            match self.method {
                ExtractionMethod::Text => "text",
                ExtractionMethod::Ocr => "ocr",
            },
            self.is_scanned
        );
        if !self.tables.is_empty() {
            out.push_str("\nTables:\n");
            for (i, table) in self.tables.iter().enumerate() {
                let _ = writeln!(out, "Table {} (page {}):", i + 1, table.page);
                out.push_str(&table.to_markdown());
            }
        }
        if !self.text.trim().is_empty() {
            out.push_str("\nText:\n");
            if self.text.chars().count() > max_text_chars {
                out.extend(self.text.chars().take(max_text_chars));
                out.push_str("\n[truncated]");
            } else {
                out.push_str(&self.text);
            }
            out.push('\n');
        }
        out
    }
}

/// One uploaded source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Content-derived identifier.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// MIME type (e.g. "application/pdf").
    pub media_type: String,
    /// Raw bytes, base64 encoded when serialized.
    #[serde(with = "base64_bytes", default)]
    pub content: Vec<u8>,
    /// Pre-extracted text and tables.
    #[serde(default)]
    pub extraction: Option<DocumentExtraction>,
}

impl SourceDocument {
    /// Creates a document; its id is derived from the content fingerprint.
    #[must_use]
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, content: Vec<u8>) -> Self {
        let fingerprint = sha256_hex(&content);
        Self {
            id: format!("doc-{}", &fingerprint[..16]),
            name: name.into(),
            media_type: media_type.into(),
            content,
            extraction: None,
        }
    }

    /// Attaches extraction metadata.
    #[must_use]
    pub fn with_extraction(mut self, extraction: DocumentExtraction) -> Self {
        self.extraction = Some(extraction);
        self
    }

    /// SHA-256 of the raw content.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.content)
    }

    /// Returns the document as a generator attachment.
    #[must_use]
    pub fn as_attachment(&self) -> Attachment {
        Attachment::new(self.name.clone(), self.media_type.clone(), self.content.clone())
    }
}
