//! Core data models used throughout Book Distill.
//!
//! These types represent the documents, chunks, and per-chunk map results that
//! flow through the distillation pipeline.

use std::path::Path;

/// Source format of an uploaded document, derived from its filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Epub,
    PlainText,
}

impl DocumentFormat {
    /// Maps a filename to a format by extension (case-insensitive).
    ///
    /// Returns `None` for extensions the extractor does not handle.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "epub" => Some(DocumentFormat::Epub),
            "txt" | "text" | "md" | "markdown" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }

    /// File extension used when staging the document on disk.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Epub => "epub",
            DocumentFormat::PlainText => "txt",
        }
    }
}

/// An uploaded document. Immutable once read.
#[derive(Debug, Clone)]
pub struct Document {
    /// Original filename as supplied by the caller.
    pub filename: String,
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

/// A bounded-size slice of the extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    pub text: String,
}

/// Result of the map phase for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    /// The model returned a dehydrated summary.
    Dehydrated(String),
    /// The remote call failed; the chunk's own text stands in.
    Fallback(String),
}

/// A map-phase output, paired 1:1 with the [`Chunk`] of the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DehydratedChunk {
    pub index: usize,
    pub outcome: MapOutcome,
}

impl DehydratedChunk {
    pub fn text(&self) -> &str {
        match &self.outcome {
            MapOutcome::Dehydrated(text) | MapOutcome::Fallback(text) => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, MapOutcome::Fallback(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            DocumentFormat::from_filename("Thinking Fast.PDF"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_filename("book.epub"),
            Some(DocumentFormat::Epub)
        );
        assert_eq!(
            DocumentFormat::from_filename("notes.md"),
            Some(DocumentFormat::PlainText)
        );
        assert_eq!(DocumentFormat::from_filename("slides.pptx"), None);
        assert_eq!(DocumentFormat::from_filename("README"), None);
    }

    #[test]
    fn dehydrated_chunk_text_for_both_outcomes() {
        let ok = DehydratedChunk {
            index: 0,
            outcome: MapOutcome::Dehydrated("summary".to_string()),
        };
        let fallback = DehydratedChunk {
            index: 1,
            outcome: MapOutcome::Fallback("raw".to_string()),
        };
        assert_eq!(ok.text(), "summary");
        assert!(!ok.is_fallback());
        assert_eq!(fallback.text(), "raw");
        assert!(fallback.is_fallback());
    }
}
