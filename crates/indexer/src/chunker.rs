//! Word chunking
//!
//! Splits long texts into fixed-size word windows before embedding.

use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Default maximum words per chunk
pub const DEFAULT_MAX_WORDS: usize = 256;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Maximum whitespace-separated words per chunk
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
        }
    }
}

/// A chunk of a source text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Position of this chunk within its source text
    pub index: usize,
}

/// Split `text` into chunks of at most `max_words` words.
///
/// Texts at or under the limit are returned whole and untouched. Longer
/// texts are re-joined with single spaces. Blank texts produce no chunks.
pub fn chunk_words(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let max_words = config.max_words.max(1);
    if words.len() <= max_words {
        return vec![TextChunk {
            content: text.to_string(),
            index: 0,
        }];
    }

    let chunks: Vec<TextChunk> = words
        .chunks(max_words)
        .enumerate()
        .map(|(index, window)| TextChunk {
            content: window.join(" "),
            index,
        })
        .collect();

    debug!(
        words = words.len(),
        chunk_count = chunks.len(),
        max_words = max_words,
        "Text chunked"
    );

    chunks
}

/// NFKD-decompose and drop everything outside ASCII
pub fn normalize_ascii(text: &str) -> String {
    text.nfkd().filter(char::is_ascii).collect()
}
