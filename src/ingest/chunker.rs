use super::{Document, Passage};
use std::cmp::min;

/// Find the nearest valid char boundary at or before the given byte index
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Find the nearest valid char boundary at or after the given byte index
fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Character chunker with overlap. Keeps chunks <= `max_chars` and overlaps
/// consecutive chunks by `overlap_chars` to preserve context across cuts.
/// Returns (byte offset into `text`, chunk) pairs; each chunk is trimmed and
/// the offset points at its first retained byte.
pub fn chunk_with_offsets(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(usize, String)> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut i = 0;
    let len = text.len();

    while i < len {
        // Calculate end position, ensuring it's a valid char boundary
        let raw_end = min(len, i + max_chars);
        let end = floor_char_boundary(text, raw_end);

        // Try to cut at last newline or space before end to avoid breaking words
        let mut cut = end;
        if cut < len && cut > i {
            let slice = &text[i..cut];
            if let Some(idx) = slice.rfind('\n') {
                cut = i + idx + 1;
            } else if let Some(idx) = slice.rfind(' ') {
                cut = i + idx + 1;
            }
        }

        cut = ceil_char_boundary(text, cut);

        // Ensure we always make progress
        if cut <= i {
            cut = ceil_char_boundary(text, min(i + 1, len));
        }
        cut = min(cut, len);

        if cut > i {
            let raw = &text[i..cut];
            let leading = raw.len() - raw.trim_start().len();
            let chunk = raw.trim().to_string();
            if !chunk.is_empty() {
                chunks.push((i + leading, chunk));
            }
        }

        let next_i = if overlap_chars < (cut.saturating_sub(i)) {
            cut.saturating_sub(overlap_chars)
        } else {
            cut
        };
        let next_i = floor_char_boundary(text, next_i);

        // Safety: always advance at least by 1 char to prevent infinite loop
        if next_i <= i {
            i = ceil_char_boundary(text, cut.max(i + 1));
        } else {
            i = next_i;
        }

        if cut >= len || i >= len {
            break;
        }
    }

    chunks
}

/// Chunk a text without offset bookkeeping.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    chunk_with_offsets(text, max_chars, overlap_chars)
        .into_iter()
        .map(|(_, chunk)| chunk)
        .collect()
}

/// Split one document into passages carrying its id and chunk offsets.
pub fn passages_from_document(doc: &Document, max_chars: usize, overlap_chars: usize) -> Vec<Passage> {
    chunk_with_offsets(&doc.text, max_chars, overlap_chars)
        .into_iter()
        .map(|(offset, text)| Passage {
            text,
            source_id: doc.id.clone(),
            offset,
        })
        .collect()
}

/// Split a document set into passages, preserving document order.
pub fn passages_from_documents(
    docs: &[Document],
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();
    for doc in docs {
        passages.extend(passages_from_document(doc, max_chars, overlap_chars));
    }
    passages
}
