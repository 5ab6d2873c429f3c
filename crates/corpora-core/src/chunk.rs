//! Token-window text segmenter with overlap.
//!
//! Splits extracted text into overlapping chunks suitable for embedding.
//! Tokens are whitespace-delimited words; each chunk holds at most
//! `max_tokens` of them and consecutive chunks share `overlap` tokens when
//! the text is long enough. Chunk boundaries prefer paragraph breaks
//! (`\n\n`), then sentence ends, and fall back to a hard token cut.
//!
//! Chunking is pure and deterministic for identical input and parameters,
//! which the embedding pipeline relies on for cache keys. The returned
//! [`Chunker`] is a finite, restartable iterator: clone it to re-walk the
//! same chunks.
//!
//! # Example
//!
//! ```rust
//! use corpora_core::chunk::chunk;
//!
//! let spans: Vec<_> = chunk("The quick brown fox jumps. Over the lazy dog.", 5, 2)
//!     .unwrap()
//!     .collect();
//! assert!(spans.len() >= 2);
//! assert_eq!(spans[0].chunk_index, 0);
//! ```

use crate::error::{EngineError, Result};

/// One chunk of input text with its position metadata.
///
/// `char_start`/`char_end` are character offsets into the original input;
/// the union of all spans covers every token of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    pub chunk_index: i64,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
    /// Token text ends a sentence (`.`, `!`, `?`, allowing a trailing
    /// closing quote or bracket).
    ends_sentence: bool,
    /// The whitespace gap after this token contains a paragraph break.
    ends_paragraph: bool,
}

/// Restartable iterator over the chunks of one input text.
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    max_tokens: usize,
    overlap: usize,
    start: usize,
    chunk_index: i64,
}

/// Split `text` into overlapping token-window chunks.
///
/// # Errors
///
/// `Configuration` if `max_tokens` is zero or `overlap >= max_tokens`
/// (the window could never advance).
///
/// # Guarantees
///
/// - Every chunk is non-empty and holds at most `max_tokens` tokens.
/// - Consecutive chunks share exactly `overlap` tokens unless a boundary
///   snap shortened the previous chunk, in which case they share at least
///   `overlap` tokens' worth of coverage (no token is ever skipped).
/// - Whitespace-only input yields an empty sequence.
pub fn chunk(text: &str, max_tokens: usize, overlap: usize) -> Result<Chunker<'_>> {
    if max_tokens == 0 {
        return Err(EngineError::Configuration(
            "chunking max_tokens must be > 0".into(),
        ));
    }
    if overlap >= max_tokens {
        return Err(EngineError::Configuration(format!(
            "chunking overlap ({overlap}) must be smaller than max_tokens ({max_tokens})"
        )));
    }

    Ok(Chunker {
        text,
        tokens: tokenize(text),
        max_tokens,
        overlap,
        start: 0,
        chunk_index: 0,
    })
}

impl Iterator for Chunker<'_> {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let n = self.tokens.len();
        if self.start >= n {
            return None;
        }

        let hard_end = (self.start + self.max_tokens).min(n);
        let end = if hard_end < n {
            self.snap_boundary(hard_end)
        } else {
            hard_end
        };

        let first = self.tokens[self.start];
        let last = self.tokens[end - 1];
        let span = ChunkSpan {
            content: self.text[first.byte_start..last.byte_end].to_string(),
            chunk_index: self.chunk_index,
            char_start: first.char_start,
            char_end: last.char_end,
        };

        self.chunk_index += 1;
        self.start = if end >= n { n } else { end - self.overlap };
        Some(span)
    }
}

impl Chunker<'_> {
    /// Pull the cut point back to the strongest boundary inside the
    /// window, provided the window still advances past the overlap.
    /// Paragraph breaks beat sentence ends; ties go to the latest
    /// position.
    fn snap_boundary(&self, hard_end: usize) -> usize {
        let min_end = self.start + self.overlap + 1;
        let mut best_strength = 0u8;
        let mut best_j = hard_end;
        for j in min_end..=hard_end {
            let tok = self.tokens[j - 1];
            let strength = if tok.ends_paragraph {
                2
            } else if tok.ends_sentence {
                1
            } else {
                0
            };
            if strength > 0 && strength >= best_strength {
                best_strength = strength;
                best_j = j;
            }
        }
        best_j
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut current: Option<(usize, usize)> = None; // (byte_start, char_start)
    let mut char_pos = 0usize;

    for (byte_pos, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some((bs, cs)) = current.take() {
                tokens.push(make_token(text, bs, byte_pos, cs, char_pos));
            }
        } else if current.is_none() {
            current = Some((byte_pos, char_pos));
        }
        char_pos += 1;
    }
    if let Some((bs, cs)) = current {
        tokens.push(make_token(text, bs, text.len(), cs, char_pos));
    }

    // Mark paragraph breaks by inspecting the gap after each token.
    for i in 0..tokens.len() {
        let gap_end = if i + 1 < tokens.len() {
            tokens[i + 1].byte_start
        } else {
            text.len()
        };
        let gap = &text[tokens[i].byte_end..gap_end];
        if gap.matches('\n').count() >= 2 {
            tokens[i].ends_paragraph = true;
        }
    }

    tokens
}

fn make_token(
    text: &str,
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
) -> Token {
    let word = &text[byte_start..byte_end];
    let trimmed = word.trim_end_matches(['"', '\'', ')', ']', '}', '»']);
    let ends_sentence = trimmed.ends_with(['.', '!', '?']);
    Token {
        byte_start,
        byte_end,
        char_start,
        char_end,
        ends_sentence,
        ends_paragraph: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(text: &str, max_tokens: usize, overlap: usize) -> Vec<ChunkSpan> {
        chunk(text, max_tokens, overlap).unwrap().collect()
    }

    fn token_count(s: &str) -> usize {
        s.split_whitespace().count()
    }

    #[test]
    fn test_short_text_single_chunk() {
        let out = spans("Hello, world!", 700, 80);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk_index, 0);
        assert_eq!(out[0].content, "Hello, world!");
        assert_eq!(out[0].char_start, 0);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(spans("", 10, 2).is_empty());
        assert!(spans("   \n\n  ", 10, 2).is_empty());
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            chunk("x", 0, 0),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(
            chunk("x", 5, 5),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(
            chunk("x", 5, 9),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_overlap_scenario() {
        // Two sentences, max 5 tokens, overlap 2.
        let text = "The quick brown fox jumps. Over the lazy dog.";
        let out = spans(text, 5, 2);
        assert!(out.len() >= 2);
        for s in &out {
            assert!(token_count(&s.content) <= 5, "oversized: {:?}", s.content);
            assert!(!s.content.is_empty());
        }
        for pair in out.windows(2) {
            let prev: Vec<&str> = pair[0].content.split_whitespace().collect();
            let next: Vec<&str> = pair[1].content.split_whitespace().collect();
            assert_eq!(&prev[prev.len() - 2..], &next[..2]);
        }
    }

    #[test]
    fn test_coverage_no_token_skipped() {
        let text = (0..40)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let out = spans(&text, 7, 3);
        // Walking chunks and dropping each successor's overlap prefix
        // reconstructs the full token sequence.
        let mut rebuilt: Vec<String> = Vec::new();
        for (i, s) in out.iter().enumerate() {
            let toks: Vec<String> = s.content.split_whitespace().map(String::from).collect();
            let skip = if i == 0 { 0 } else { 3 };
            rebuilt.extend(toks.into_iter().skip(skip));
        }
        let original: Vec<String> = text.split_whitespace().map(String::from).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = "One two three end. Four five six seven eight nine ten.";
        let out = spans(text, 8, 1);
        // First chunk should cut at the sentence end rather than mid-way
        // through the second sentence.
        assert!(out[0].content.ends_with("end."), "got {:?}", out[0].content);
    }

    #[test]
    fn test_prefers_paragraph_over_sentence() {
        let text = "Alpha beta. Gamma delta\n\nEpsilon zeta eta theta iota kappa.";
        let out = spans(text, 6, 1);
        assert!(
            out[0].content.ends_with("delta"),
            "got {:?}",
            out[0].content
        );
    }

    #[test]
    fn test_char_spans_match_content() {
        let text = "aa bb cc dd ee ff gg hh";
        for s in spans(text, 3, 1) {
            let slice: String = text
                .chars()
                .skip(s.char_start)
                .take(s.char_end - s.char_start)
                .collect();
            assert_eq!(slice, s.content);
        }
    }

    #[test]
    fn test_multibyte_input() {
        let text = "héllo wörld ☃ snowman détente encore très bien oui non";
        let out = spans(text, 4, 1);
        assert!(!out.is_empty());
        for s in &out {
            assert!(token_count(&s.content) <= 4);
        }
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunker = chunk(text, 4, 1).unwrap();
        let a: Vec<_> = chunker.clone().collect();
        let b: Vec<_> = chunker.collect();
        assert_eq!(a, b);
        let c: Vec<_> = chunk(text, 4, 1).unwrap().collect();
        assert_eq!(a, c);
    }

    #[test]
    fn test_contiguous_indices() {
        let text = (0..50)
            .map(|i| format!("tok{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        for (i, s) in spans(&text, 6, 2).iter().enumerate() {
            assert_eq!(s.chunk_index, i as i64);
        }
    }
}
