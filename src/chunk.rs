//! Paragraph-boundary text chunker.
//!
//! Splits extracted book text into [`Chunk`]s no longer than `max_chars`
//! characters. Splitting occurs on paragraph boundaries (blank lines) so
//! each chunk stays semantically coherent. A paragraph that alone exceeds
//! the limit is cut into fixed-size slices.
//!
//! Lengths are counted in `char`s, not bytes, so multi-byte scripts get
//! the same budget as ASCII and slices never land inside a UTF-8 sequence.

use crate::models::Chunk;

/// Separator placed between paragraphs that share a chunk.
const PARAGRAPH_JOIN: &str = "\n\n";

/// Split text into chunks on paragraph boundaries, respecting `max_chars`.
///
/// Returns chunks with contiguous indices starting at 0. Empty or
/// whitespace-only input yields an empty vector.
pub fn split(text: &str, max_chars: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let join_chars = PARAGRAPH_JOIN.chars().count();

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in paragraphs(text) {
        let para_chars = para.chars().count();

        // Oversized paragraph: flush what we have, then hard-cut.
        if para_chars > max_chars {
            if !buf.is_empty() {
                push_chunk(&mut chunks, std::mem::take(&mut buf));
                buf_chars = 0;
            }
            for slice in fixed_slices(&para, max_chars) {
                push_chunk(&mut chunks, slice);
            }
            continue;
        }

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + join_chars + para_chars
        };

        if would_be > max_chars && !buf.is_empty() {
            push_chunk(&mut chunks, std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if !buf.is_empty() {
            buf.push_str(PARAGRAPH_JOIN);
            buf_chars += join_chars;
        }
        buf.push_str(&para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        push_chunk(&mut chunks, buf);
    }

    chunks
}

/// Groups consecutive non-blank lines into paragraphs.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Cuts `text` into consecutive pieces of exactly `size` chars (last may be shorter).
fn fixed_slices(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: String) {
    let index = chunks.len();
    chunks.push(Chunk { index, text });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split("Hello, world!", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(split("", 100).is_empty());
        assert!(split("  \n\n \n", 100).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split(text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_flush_before_exceeding_limit() {
        // 22 + 2 + 22 = 46 > 30, so every paragraph gets its own chunk.
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph 3.";
        let chunks = split(text, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "This is paragraph two.");
        for c in &chunks {
            assert!(c.text.chars().count() <= 30);
        }
    }

    #[test]
    fn test_oversized_paragraph_force_split() {
        let long = "x".repeat(25);
        let text = format!("short\n\n{}\n\ntail", long);
        let chunks = split(&text, 10);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["short", "xxxxxxxxxx", "xxxxxxxxxx", "xxxxx", "tail"]
        );
    }

    #[test]
    fn test_force_split_counts_chars_not_bytes() {
        let text = "书".repeat(7);
        let chunks = split(&text, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "书书书");
        assert_eq!(chunks[2].text, "书");
    }

    #[test]
    fn test_reconstructs_source() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} talks about chapter {}.", i, i / 4))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split(&text, 120);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&text));
        for c in &chunks {
            assert!(c.text.chars().count() <= 120);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split(&text, 40);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_book_sized_input_yields_three_chunks() {
        // 25 paragraphs of 998 chars, joined: 10 fit in 10,000 chars.
        let para = "a".repeat(998);
        let text = vec![para; 25].join("\n\n");
        assert_eq!(text.chars().count(), 24_998);
        let chunks = split(&text, 10_000);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = split(text, 12);
        let c2 = split(text, 12);
        assert_eq!(c1, c2);
    }
}
