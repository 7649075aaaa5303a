//! Overlapping fixed-size text windows with content-addressed IDs.
//!
//! Splits decoded document text into [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive windows share exactly `chunk_overlap` characters,
//! so no text is ever dropped between two chunks.
//!
//! # Algorithm
//!
//! Greedy forward scan. For a window starting at `start`:
//!
//! 1. If the rest of the text fits in `chunk_size`, emit it and stop.
//! 2. Otherwise look for the last paragraph break (`\n\n`) inside the window,
//!    then the last sentence break (`. `, `? `, `\n`, ...). A break only
//!    counts if it leaves at least half a window (and more than the overlap)
//!    before it.
//! 3. Without a usable break, cut at exactly `chunk_size` characters.
//! 4. The next window starts `chunk_overlap` characters before the cut.
//!
//! Each chunk gets an ID from [`chunk_id`], a pure function of the source
//! key and the chunk index, so re-ingesting an unchanged object overwrites
//! the same index entries instead of adding new ones.
//!
//! # Example
//!
//! ```rust
//! use rca_ingest::chunk::chunk_text;
//! use rca_ingest::config::ChunkingConfig;
//!
//! let text = "a".repeat(1000);
//! let chunks = chunk_text("rcas/incident-42.log", &text, &ChunkingConfig::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!((chunks[0].start, chunks[0].end), (0, 800));
//! assert_eq!((chunks[1].start, chunks[1].end), (700, 1000));
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkId};

/// Joins the source key and chunk index before hashing.
pub const ID_SEPARATOR: &str = "::";

const PARAGRAPH_BREAKS: &[&str] = &["\n\n"];
const SENTENCE_BREAKS: &[&str] = &[". ", "! ", "? ", ".\n", "!\n", "?\n", "\n"];

/// Deterministic identifier for chunk `index` of `source_key`.
///
/// SHA-256 over `"{source_key}::{index}"`, truncated to 128 bits and
/// rendered as a UUID. Depends on nothing but its arguments.
pub fn chunk_id(source_key: &str, index: usize) -> ChunkId {
    let mut hasher = Sha256::new();
    hasher.update(source_key.as_bytes());
    hasher.update(ID_SEPARATOR.as_bytes());
    hasher.update(index.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    ChunkId(Uuid::from_bytes(bytes))
}

/// Split `text` into overlapping windows and assign IDs.
///
/// Returns an empty vector for empty or whitespace-only text. Any other
/// text no longer than `chunk_size` yields exactly one chunk with index 0.
pub fn chunk_text(source_key: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let offsets = char_offsets(text);
    split_windows(text, &offsets, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            id: chunk_id(source_key, index),
            chunk_index: index,
            text: text[offsets[start]..offsets[end]].to_string(),
            start,
            end,
        })
        .collect()
}

/// Byte offset of every char, plus `text.len()` as a final sentinel.
fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Window boundaries as `(start, end)` char positions.
fn split_windows(text: &str, offsets: &[usize], size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let total = offsets.len() - 1;
    let size = size.max(1);
    let overlap = overlap.min(size - 1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let limit = (start + size).min(total);
        if limit == total {
            windows.push((start, total));
            break;
        }

        let min_end = start + (overlap + 1).max(size / 2);
        let end = find_break(text, offsets, start, min_end, limit).unwrap_or(limit);
        windows.push((start, end));
        start = end - overlap;
    }
    windows
}

/// Best natural break in `[min_end, limit]`, paragraph before sentence.
///
/// The returned position is just after the separator, so separators stay
/// with the preceding chunk.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    limit: usize,
) -> Option<usize> {
    if min_end > limit {
        return None;
    }
    let base = offsets[start];
    let window = &text[base..offsets[limit]];

    [PARAGRAPH_BREAKS, SENTENCE_BREAKS].iter().find_map(|level| {
        level
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|pos| base + pos + sep.len()))
            .filter_map(|byte| offsets.binary_search(&byte).ok())
            .filter(|&pos| pos >= min_end)
            .max()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn incident_log_of_1000_chars() {
        let text = "x".repeat(1000);
        let chunks = chunk_text("rcas/incident-42.log", &text, &config(800, 100));
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 800));
        assert_eq!((chunks[1].start, chunks[1].end), (700, 1000));
        assert_eq!(chunks[0].text.len(), 800);
        assert_eq!(chunks[1].text.len(), 300);
        assert_eq!(chunks[0].id, chunk_id("rcas/incident-42.log", 0));
        assert_eq!(chunks[1].id, chunk_id("rcas/incident-42.log", 1));
    }

    #[test]
    fn chunk_id_is_sha256_of_key_and_index() {
        assert_eq!(
            chunk_id("rcas/incident-42.log", 0).to_string(),
            "a982461d-1805-dd77-945b-ed9244d8b2ca"
        );
        assert_eq!(
            chunk_id("rcas/incident-42.log", 1).to_string(),
            "61f7a6c4-8ff0-9c4a-0c01-5931614fa0a5"
        );
    }

    #[test]
    fn chunk_id_deterministic_and_distinct() {
        assert_eq!(chunk_id("a/b.txt", 3), chunk_id("a/b.txt", 3));
        assert_ne!(chunk_id("a/b.txt", 3), chunk_id("a/b.txt", 4));
        assert_ne!(chunk_id("a/b.txt", 3), chunk_id("a/c.txt", 3));
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("k", "Hello, world!", &config(800, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn exactly_chunk_size_single_chunk() {
        let text = "y".repeat(800);
        let chunks = chunk_text("k", &text, &config(800, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn empty_and_blank_text_no_chunks() {
        assert!(chunk_text("k", "", &config(800, 100)).is_empty());
        assert!(chunk_text("k", "  \n\n\t ", &config(800, 100)).is_empty());
    }

    #[test]
    fn prefers_paragraph_break() {
        let first = "a".repeat(60);
        let second = "b".repeat(60);
        let text = format!("{}\n\n{}", first, second);
        let chunks = chunk_text("k", &text, &config(100, 10));
        assert_eq!(chunks[0].text, format!("{}\n\n", first));
        assert_eq!(chunks[0].end, 62);
        assert_eq!(chunks[1].start, 52);
    }

    #[test]
    fn falls_back_to_sentence_break() {
        let text = format!("{}. {}", "a".repeat(70), "b".repeat(70));
        let chunks = chunk_text("k", &text, &config(100, 10));
        assert_eq!(chunks[0].end, 72);
        assert!(chunks[0].text.ends_with(". "));
    }

    #[test]
    fn ignores_break_too_close_to_start() {
        // A break after 5 chars would produce a tiny window; cut hard instead.
        let text = format!("abcd\n\n{}", "z".repeat(200));
        let chunks = chunk_text("k", &text, &config(100, 10));
        assert_eq!((chunks[0].start, chunks[0].end), (0, 100));
    }

    #[test]
    fn coverage_no_text_dropped() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} about the outage.", i))
            .collect::<Vec<_>>()
            .join(" ")
            .replace("number 50 ", "number 50\n\n");
        let cfg = config(300, 40);
        let chunks = chunk_text("k", &text, &cfg);
        assert!(chunks.len() > 1);

        let total = text.chars().count();
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, total);

        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - cfg.chunk_overlap);
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(c.text.chars().count() <= cfg.chunk_size);
        }

        let concatenated: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert_eq!(concatenated - total, (chunks.len() - 1) * cfg.chunk_overlap);
    }

    #[test]
    fn multibyte_text_counts_chars() {
        let text = "é".repeat(250);
        let chunks = chunk_text("k", &text, &config(100, 20));
        assert_eq!(chunks[0].text.chars().count(), 100);
        assert_eq!(chunks[1].start, 80);
        assert_eq!(chunks.last().unwrap().end, 250);
    }

    #[test]
    fn deterministic() {
        let text = "Alpha. Beta.\n\nGamma. Delta. ".repeat(40);
        let c1 = chunk_text("doc", &text, &config(120, 20));
        let c2 = chunk_text("doc", &text, &config(120, 20));
        assert_eq!(c1, c2);
    }
}
