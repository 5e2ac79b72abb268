//! Splits document text into overlapping chunks for embedding.
//!
//! Sizes and offsets are counted in characters, not bytes, so multibyte
//! text never splits inside a code point.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap}) must be less than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// A piece of the source text, `start..end` in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// blake3 of `text`, hex encoded.
    pub hash: String,
}

/// Strategy used by [`TextStructurizer`]. Any
/// `Fn(&str, usize, usize) -> Result<Vec<Span>, ChunkError>` qualifies.
pub trait Splitter: Send + Sync {
    fn split(
        &self,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<Span>, ChunkError>;
}

impl<F> Splitter for F
where
    F: Fn(&str, usize, usize) -> Result<Vec<Span>, ChunkError> + Send + Sync,
{
    fn split(
        &self,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<Span>, ChunkError> {
        self(text, chunk_size, chunk_overlap)
    }
}

fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<(), ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkError::OverlapTooLarge {
            size: chunk_size,
            overlap: chunk_overlap,
        });
    }
    Ok(())
}

/// Byte offset of every char boundary, including `text.len()`.
fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Fixed windows of `chunk_size` characters, each starting
/// `chunk_size - chunk_overlap` after the previous one. Stops as soon as a
/// window reaches the end of the text, so the last chunk may be short.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSizeSplitter;

impl Splitter for FixedSizeSplitter {
    fn split(
        &self,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<Span>, ChunkError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        validate(chunk_size, chunk_overlap)?;

        let bounds = char_boundaries(text);
        let len = bounds.len() - 1;
        let step = chunk_size - chunk_overlap;
        let mut spans = Vec::with_capacity(len / step + 1);
        let mut start = 0;
        while start < len {
            let end = (start + chunk_size).min(len);
            spans.push(Span {
                start,
                end,
                text: text[bounds[start]..bounds[end]].to_string(),
            });
            if end == len {
                break;
            }
            start += step;
        }
        Ok(spans)
    }
}

/// Like [`FixedSizeSplitter`] but ends each window at the last paragraph,
/// sentence, line or word boundary found in its final two thirds.
/// Whitespace-only windows are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceSplitter;

impl Splitter for SentenceSplitter {
    fn split(
        &self,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Vec<Span>, ChunkError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        validate(chunk_size, chunk_overlap)?;

        let bounds = char_boundaries(text);
        let len = bounds.len() - 1;
        let mut spans = Vec::new();
        let mut start = 0;
        while start < len {
            let window_end = (start + chunk_size).min(len);
            let end = if window_end < len {
                let window = &text[bounds[start]..bounds[window_end]];
                find_break_point(window)
                    .map(|byte_pos| start + window[..byte_pos].chars().count())
                    .filter(|&e| e > start)
                    .unwrap_or(window_end)
            } else {
                window_end
            };

            let slice = &text[bounds[start]..bounds[end]];
            if !slice.trim().is_empty() {
                spans.push(Span {
                    start,
                    end,
                    text: slice.to_string(),
                });
            }
            if end == len {
                break;
            }
            let taken = end - start;
            start = if taken <= chunk_overlap {
                end
            } else {
                end - chunk_overlap
            };
        }
        Ok(spans)
    }
}

/// Byte position just past the preferred break in `window`, if any.
fn find_break_point(window: &str) -> Option<usize> {
    let third = window.len() / 3;

    if let Some(pos) = window.rfind("\n\n") {
        if pos > third {
            return Some(pos + 2);
        }
    }

    for pattern in [". ", "! ", "? ", ".\n", "!\n", "?\n", "。", "！", "？"] {
        if let Some(pos) = window.rfind(pattern) {
            if pos > third {
                return Some(pos + pattern.len());
            }
        }
    }

    if let Some(pos) = window.rfind('\n') {
        if pos > third {
            return Some(pos + 1);
        }
    }

    for pattern in [", ", "; "] {
        if let Some(pos) = window.rfind(pattern) {
            if pos > window.len() / 2 {
                return Some(pos + pattern.len());
            }
        }
    }

    window.rfind(' ').map(|pos| pos + 1)
}

/// Splits `text` into fixed-size character windows.
///
/// Empty text yields no chunks without validating the parameters.
pub fn split_text_by_fixed_size(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, ChunkError> {
    Ok(FixedSizeSplitter
        .split(text, chunk_size, chunk_overlap)?
        .into_iter()
        .map(|s| s.text)
        .collect())
}

#[derive(Clone)]
pub struct TextStructurizer {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    splitter: Arc<dyn Splitter>,
}

impl fmt::Debug for TextStructurizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStructurizer")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish_non_exhaustive()
    }
}

impl Default for TextStructurizer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextStructurizer {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            splitter: Arc::new(FixedSizeSplitter),
        }
    }

    pub fn with_splitter(mut self, splitter: impl Splitter + 'static) -> Self {
        self.splitter = Arc::new(splitter);
        self
    }

    pub fn structure_text(&self, text: &str) -> Result<Vec<String>, ChunkError> {
        Ok(self
            .spans(text)?
            .into_iter()
            .map(|s| s.text)
            .collect())
    }

    /// Chunks with offsets and content hashes, ready for indexing.
    pub fn structure_chunks(&self, text: &str) -> Result<Vec<Chunk>, ChunkError> {
        Ok(self
            .spans(text)?
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                index,
                start: span.start,
                end: span.end,
                hash: blake3::hash(span.text.as_bytes()).to_hex().to_string(),
                text: span.text,
            })
            .collect())
    }

    fn spans(&self, text: &str) -> Result<Vec<Span>, ChunkError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        self.splitter
            .split(text, self.chunk_size, self.chunk_overlap)
    }
}
