//! Overlapping token-window chunker.
//!
//! Splits a file's token sequence into windows of `window_size` tokens that
//! overlap by `overlap` tokens. The cursor starts at 0 and advances by
//! `window_size - overlap` while tokens remain after the current window; the
//! final window ends exactly at the document end and may be shorter.
//!
//! Chunk ids are `"{file_path}_{chunk_index}"`, so the same text and
//! configuration always produce the same ids and boundaries.

use crate::models::Chunk;
use crate::tokenizer::Tokenizer;

/// Compute `[start, end)` windows over `total` tokens.
///
/// `overlap` must be smaller than `window_size` (enforced by config
/// validation); a zero-length document has no windows.
pub fn token_windows(total: usize, window_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    debug_assert!(window_size > 0 && overlap < window_size);
    let stride = window_size - overlap;

    let mut windows = Vec::new();
    let mut cursor = 0usize;
    while cursor < total {
        let end = (cursor + window_size).min(total);
        windows.push((cursor, end));
        if end >= total {
            break;
        }
        cursor += stride;
    }
    windows
}

/// Chunk one file's text. Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(
    tokenizer: &dyn Tokenizer,
    file_path: &str,
    text: &str,
    window_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    let tokens = tokenizer.encode(text);

    token_windows(tokens.len(), window_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            id: Chunk::make_id(file_path, index),
            file_path: file_path.to_string(),
            chunk_index: index,
            text: tokenizer.decode(&tokens[start..end]),
            start_token: start,
            end_token: end,
            token_count: end - start,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    #[test]
    fn test_reference_example_1418_tokens() {
        assert_eq!(token_windows(1418, 1000, 200), vec![(0, 1000), (800, 1418)]);
    }

    #[test]
    fn test_short_document_single_chunk() {
        assert_eq!(token_windows(42, 1000, 200), vec![(0, 42)]);
        assert_eq!(token_windows(1000, 1000, 200), vec![(0, 1000)]);
    }

    #[test]
    fn test_empty_document_no_chunks() {
        assert!(token_windows(0, 1000, 200).is_empty());
        let chunks = chunk_text(&CharTokenizer, "empty.txt", "", 10, 2);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_remainder_exactly_stride_is_covered() {
        // 1000 + 800 = 1800: second window ends at the document end.
        assert_eq!(token_windows(1800, 1000, 200), vec![(0, 1000), (800, 1800)]);
        assert_eq!(
            token_windows(1801, 1000, 200),
            vec![(0, 1000), (800, 1800), (1600, 1801)]
        );
    }

    #[test]
    fn test_windows_cover_without_gaps() {
        for total in [1usize, 7, 99, 100, 101, 250, 1000, 4321] {
            for (window, overlap) in [(10usize, 0usize), (10, 3), (64, 63), (100, 20)] {
                let windows = token_windows(total, window, overlap);
                assert_eq!(windows.first().unwrap().0, 0);
                assert_eq!(windows.last().unwrap().1, total);
                for pair in windows.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    assert!(b.0 <= a.1, "gap between {:?} and {:?}", a, b);
                    assert!(b.0 > a.0, "start must advance");
                }
                for (s, e) in &windows {
                    assert!(e - s <= window);
                }
            }
        }
    }

    #[test]
    fn test_chunk_fields_and_ids() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_text(&CharTokenizer, "src/alpha.rs", text, 10, 4);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].id, "src/alpha.rs_0");
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].start_token, 6);
        assert_eq!(chunks[1].text, "ghijklmnop");
        assert_eq!(chunks[3].end_token, 26);
        assert_eq!(chunks[3].token_count, chunks[3].end_token - chunks[3].start_token);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa".repeat(20);
        let c1 = chunk_text(&CharTokenizer, "doc.md", &text, 50, 10);
        let c2 = chunk_text(&CharTokenizer, "doc.md", &text, 50, 10);
        assert_eq!(c1, c2);
    }
}
