//! Token counting and token-window chunking.
//!
//! Counts use the `cl100k_base` BPE shared by the `text-embedding-3-*`
//! models. When the encoding cannot be loaded, or a token window fails to
//! decode, everything degrades to a character estimate of four characters
//! per token instead of failing.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::ChunkingError;

/// Approximate characters per token used by the fallback path.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Clone)]
pub struct Tokenizer {
    bpe: Option<Arc<CoreBPE>>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("exact", &self.is_exact())
            .finish()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    /// Load the `cl100k_base` encoding, falling back to the estimate.
    pub fn new() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self {
                bpe: Some(Arc::new(bpe)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer unavailable, using character estimate");
                Self::approximate()
            }
        }
    }

    /// A tokenizer that only uses the character estimate.
    pub fn approximate() -> Self {
        Self { bpe: None }
    }

    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match self.bpe {
            Some(ref bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_tokens(text),
        }
    }

    /// Split `text` into windows of at most `max_tokens` tokens, each
    /// starting `max_tokens - overlap` tokens after the previous one.
    ///
    /// Text within the limit comes back as a single chunk and empty text as
    /// no chunks. The last window always reaches the end of the text.
    pub fn chunk_text(
        &self,
        text: &str,
        max_tokens: usize,
        overlap: usize,
    ) -> Result<Vec<String>, ChunkingError> {
        if max_tokens == 0 || overlap >= max_tokens {
            return Err(ChunkingError::InvalidWindow {
                max_tokens,
                overlap,
            });
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(ref bpe) = self.bpe {
            let tokens = bpe.encode_with_special_tokens(text);
            if tokens.len() <= max_tokens {
                return Ok(vec![text.to_string()]);
            }

            let decoded: Result<Vec<String>, _> = windows(tokens.len(), max_tokens, overlap)
                .map(|(start, end)| bpe.decode(tokens[start..end].to_vec()))
                .collect();

            match decoded {
                Ok(chunks) => return Ok(chunks),
                Err(e) => {
                    tracing::debug!(error = %e, "token window did not decode, chunking by characters");
                }
            }
        }

        Ok(chunk_chars(
            text,
            max_tokens * CHARS_PER_TOKEN,
            overlap * CHARS_PER_TOKEN,
        ))
    }
}

/// Character-based token estimate.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Window bounds `[start, end)` over a sequence of `len` units.
fn windows(len: usize, size: usize, overlap: usize) -> impl Iterator<Item = (usize, usize)> {
    let step = size - overlap;
    let mut start = 0;
    let mut done = len == 0;

    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = (start + size).min(len);
        let window = (start, end);
        if end >= len {
            done = true;
        } else {
            start += step;
        }
        Some(window)
    })
}

fn chunk_chars(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }

    windows(chars.len(), size, overlap)
        .map(|(start, end)| chars[start..end].iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_chunks(total: usize, max: usize, overlap: usize) -> usize {
        (total - overlap).div_ceil(max - overlap)
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("ñññññññ"), 1);
        assert_eq!(estimate_tokens(&"abcd".repeat(8000)), 8000);
        assert_eq!(estimate_tokens(&"abcd".repeat(8001)), 8001);
    }

    #[test]
    fn test_exact_count() {
        let tokenizer = Tokenizer::new();
        assert!(tokenizer.is_exact());
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert_eq!(tokenizer.count_tokens("hello world"), 2);
    }

    #[test]
    fn test_rejects_bad_window() {
        let tokenizer = Tokenizer::approximate();
        assert!(tokenizer.chunk_text("text", 10, 10).is_err());
        assert!(tokenizer.chunk_text("text", 0, 0).is_err());

        let err = tokenizer.chunk_text("text", 5, 8).unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Validation);
    }

    #[test]
    fn test_empty_and_short_text() {
        let tokenizer = Tokenizer::new();
        assert!(tokenizer.chunk_text("", 10, 2).unwrap().is_empty());
        assert_eq!(
            tokenizer.chunk_text("short text", 10, 2).unwrap(),
            vec!["short text".to_string()]
        );
    }

    #[test]
    fn test_token_windows() {
        let tokenizer = Tokenizer::new();
        // "word" followed by " word" encodes to one token per word.
        let total = 100;
        let text = format!("word{}", " word".repeat(total - 1));
        assert_eq!(tokenizer.count_tokens(&text), total);

        let chunks = tokenizer.chunk_text(&text, 30, 5).unwrap();
        assert_eq!(chunks.len(), expected_chunks(total, 30, 5));

        assert!(chunks[0].starts_with("word word"));
        assert!(chunks.last().unwrap().ends_with(" word"));
        for chunk in &chunks {
            assert!(tokenizer.count_tokens(chunk) <= 30);
        }

        // Dropping each window's overlap prefix rebuilds the full token range.
        let covered: usize = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let n = tokenizer.count_tokens(c);
                if i == 0 { n } else { n - 5 }
            })
            .sum();
        assert_eq!(covered, total);
    }

    #[test]
    fn test_char_fallback_windows() {
        let tokenizer = Tokenizer::approximate();
        let text: String = ('a'..='z').cycle().take(100).collect();

        // 10 tokens -> 40 chars, overlap 2 tokens -> 8 chars, step 32
        let chunks = tokenizer.chunk_text(&text, 10, 2).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], text[0..40]);
        assert_eq!(chunks[1], text[32..72]);
        assert_eq!(chunks[2], text[64..100]);
    }

    #[test]
    fn test_char_fallback_no_trailing_duplicate() {
        let tokenizer = Tokenizer::approximate();
        // Exactly two windows: 0..40 and 32..72.
        let text = "x".repeat(72);
        let chunks = tokenizer.chunk_text(&text, 10, 2).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 40);
    }

    #[test]
    fn test_char_fallback_multibyte() {
        let tokenizer = Tokenizer::approximate();
        let text = "é".repeat(50);
        let chunks = tokenizer.chunk_text(&text, 5, 1).unwrap();
        assert_eq!(chunks.len(), expected_chunks(50, 20, 4));
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn test_windows_iterator() {
        let bounds: Vec<_> = windows(10, 4, 1).collect();
        assert_eq!(bounds, vec![(0, 4), (3, 7), (6, 10)]);
        assert_eq!(windows(0, 4, 1).count(), 0);
    }
}
