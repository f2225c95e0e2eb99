//! Paragraph-boundary text chunker.
//!
//! Splits source text into chunks bounded by a configurable character
//! limit. Splitting occurs on blank-line paragraph boundaries so each chunk
//! stays semantically coherent.
//!
//! # Algorithm
//!
//! 1. Split text on blank lines; trim each paragraph and drop empty ones.
//! 2. Accumulate paragraphs into a buffer, joined by `"\n\n"`.
//! 3. When appending the next paragraph would push the buffer past
//!    `max_chars` and the buffer is non-empty, flush the buffer as a chunk
//!    and start a new one with that paragraph.
//! 4. Flush whatever remains at the end.
//! 5. Drop chunks shorter than `min_chars`.
//!
//! A single paragraph longer than `max_chars` is kept whole. Lengths are
//! counted in characters, not bytes.
//!
//! # Example
//!
//! ```rust
//! use knowdesk_core::chunk::{split_into_chunks, ChunkOptions};
//!
//! let text = "The deploy pipeline runs on every merge to main and tags images.\n\n\
//!             Rollbacks are done by re-tagging the previous image as latest.";
//! let chunks = split_into_chunks(text, &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! ```

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_MAX_CHARS: usize = 1500;

/// Chunks shorter than this are discarded as noise.
pub const DEFAULT_MIN_CHARS: usize = 50;

/// Bounds applied by [`split_into_chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            min_chars: DEFAULT_MIN_CHARS,
        }
    }
}

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Split text into paragraph-preserving chunks.
///
/// Pure function of its inputs: calling it twice on the same text yields
/// the same chunks in the same order.
pub fn split_into_chunks(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in paragraphs(text) {
        let para_chars = para.chars().count();

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + PARAGRAPH_SEPARATOR.len() + para_chars
        };

        if would_be > opts.max_chars && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if !buf.is_empty() {
            buf.push_str(PARAGRAPH_SEPARATOR);
            buf_chars += PARAGRAPH_SEPARATOR.len();
        }
        buf.push_str(para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks.retain(|c| c.chars().count() >= opts.min_chars);
    chunks
}

/// Non-empty, trimmed paragraphs in document order.
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}
