//! Boundary-aware, overlapping text chunker.
//!
//! Splits parsed text into [`Chunk`]s of at most `max_chars` characters.
//! Each chunk after the first begins with the last `overlap_chars`
//! characters of its predecessor, so dropping that prefix from every
//! chunk but the first and concatenating reproduces the input exactly.
//! Text is never trimmed or rewritten.
//!
//! When a chunk has to end before the text does, the cut is placed after
//! the latest paragraph break in the second half of the window, failing
//! that after a sentence end, then after whitespace, and only as a last
//! resort mid-word. Each chunk carries a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into overlapping chunks. Empty text yields no chunks.
///
/// `config.overlap_chars` must be smaller than `config.max_chars`
/// (enforced by config validation); a larger value is clamped.
pub fn chunk_text(document_id: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.is_empty() || config.max_chars == 0 {
        return Vec::new();
    }
    let max = config.max_chars;
    let overlap = config.overlap_chars.min(max - 1);

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + max).min(n);
        let end = if hard_end == n {
            n
        } else {
            // Every chunk must extend past its overlap prefix.
            let floor = start + overlap + 1;
            let preferred = floor.max(start + max / 2);
            find_break(text, &bounds, preferred, hard_end)
                .or_else(|| find_break(text, &bounds, floor, hard_end))
                .unwrap_or(hard_end)
        };

        chunks.push(make_chunk(
            document_id,
            chunks.len(),
            &text[bounds[start]..bounds[end]],
            start,
            end,
        ));

        if end == n {
            break;
        }
        start = end - overlap;
    }
    chunks
}

/// Latest cut position in `lo..=hi` (char indices), preferring paragraph
/// breaks over sentence ends over whitespace.
fn find_break(text: &str, bounds: &[usize], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    let ends_with = |pos: usize, pat: &str| text[..bounds[pos]].ends_with(pat);
    let sentence_end = |pos: usize| {
        let before = &text[..bounds[pos]];
        let mut tail = before.chars().rev();
        matches!(
            (tail.next(), tail.next()),
            (Some(w), Some('.' | '!' | '?')) if w.is_whitespace()
        )
    };
    let whitespace = |pos: usize| {
        text[..bounds[pos]]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
    };

    (lo..=hi)
        .rev()
        .find(|&p| ends_with(p, "\n\n"))
        .or_else(|| (lo..=hi).rev().find(|&p| sentence_end(p) || ends_with(p, "\n")))
        .or_else(|| (lo..=hi).rev().find(|&p| whitespace(p)))
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        char_start: start,
        char_end: end,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
        }
    }

    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.text);
            } else {
                out.extend(c.text.chars().skip(overlap));
            }
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Section {} covers the warranty terms. Claims must be filed within {} days!\n\nRefunds are processed weekly?",
                    i,
                    i * 3
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("doc", "", &cfg(100, 10)).is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &cfg(1000, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 13));
    }

    #[test]
    fn reassembly_reproduces_text_for_many_configs() {
        let text = sample_text();
        for (max, overlap) in [(50, 0), (50, 10), (80, 79), (200, 40), (7, 3), (1, 0), (2, 1)] {
            let chunks = chunk_text("doc", &text, &cfg(max, overlap));
            assert_eq!(
                reassemble(&chunks, overlap),
                text,
                "max={} overlap={}",
                max,
                overlap
            );
        }
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let text = sample_text();
        let chunks = chunk_text("doc", &text, &cfg(120, 20));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].text.chars().count() <= 120);
            assert_eq!(pair[1].char_start, pair[0].char_end - 20);
            let tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - 20).collect();
            assert!(pair[1].text.starts_with(&tail));
        }
    }

    #[test]
    fn indices_are_contiguous_and_offsets_match_text() {
        let text = sample_text();
        let chunks = chunk_text("doc", &text, &cfg(90, 15));
        let chars: Vec<char> = text.chars().collect();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            let span: String = chars[c.char_start..c.char_end].iter().collect();
            assert_eq!(span, c.text);
        }
        assert_eq!(chunks.last().unwrap().char_end, chars.len());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "First paragraph is here.\n\nSecond paragraph follows it.";
        let chunks = chunk_text("doc", text, &cfg(40, 0));
        assert_eq!(chunks[0].text, "First paragraph is here.\n\n");
        assert_eq!(chunks[1].text, "Second paragraph follows it.");
    }

    #[test]
    fn prefers_sentence_end_over_word_break() {
        let text = "One short sentence. Then a much longer sentence without end";
        let chunks = chunk_text("doc", text, &cfg(30, 0));
        assert_eq!(chunks[0].text, "One short sentence. ");
    }

    #[test]
    fn avoids_mid_word_splits() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_text("doc", text, &cfg(12, 0));
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.ends_with(' '), "chunk {:?} split mid-word", c.text);
        }
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "Garantie: 24 Monate für Gerät X. Ersatzteile sind enthalten. ".repeat(10);
        let chunks = chunk_text("doc", &text, &cfg(25, 5));
        assert_eq!(reassemble(&chunks, 5), text);
    }

    /// Arbitrary Unicode with boundary characters mixed in often enough to
    /// exercise every cut preference.
    fn text_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                4 => any::<char>(),
                1 => Just(' '),
                1 => Just('\n'),
                1 => Just('.'),
            ],
            0..400,
        )
        .prop_map(|chars: Vec<char>| chars.into_iter().collect::<String>())
    }

    proptest! {
        #[test]
        fn chunking_invariants_hold(
            text in text_strategy(),
            max in 1usize..120,
            overlap_seed in 0usize..120,
        ) {
            let overlap = overlap_seed % max;
            let chunks = chunk_text("doc", &text, &cfg(max, overlap));
            let chars: Vec<char> = text.chars().collect();

            prop_assert_eq!(chunks.is_empty(), text.is_empty());
            prop_assert_eq!(reassemble(&chunks, overlap), text.clone());

            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.chunk_index, i);
                prop_assert!(c.text.chars().count() <= max);
                let carried = if i == 0 { 0 } else { overlap };
                prop_assert!(c.char_end - c.char_start > carried);
                let span: String = chars[c.char_start..c.char_end].iter().collect();
                prop_assert_eq!(&span, &c.text);
            }
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[1].char_start, pair[0].char_end - overlap);
            }
            if let (Some(first), Some(last)) = (chunks.first(), chunks.last()) {
                prop_assert_eq!(first.char_start, 0);
                prop_assert_eq!(last.char_end, chars.len());
            }
        }
    }

    #[test]
    fn deterministic() {
        let text = sample_text();
        let c1 = chunk_text("doc1", &text, &cfg(64, 8));
        let c2 = chunk_text("doc1", &text, &cfg(64, 8));
        assert_eq!(c1, c2);
    }
}
