//! Splitting extracted text into bounded, overlapping chunks.
//!
//! Lengths are counted in Unicode scalar values, so a chunk never splits a
//! character and `chunk_size` means the same thing for any script.
//!
//! Each cut is placed at the coarsest boundary available inside the window:
//! paragraph (`\n\n`), then sentence end (`.`/`!`/`?` followed by
//! whitespace), then any whitespace, and only then a hard cut. The next
//! chunk starts exactly `overlap` characters before the cut.

use crate::config::CorpusConfig;
use crate::error::CorpusError;
use std::sync::Arc;

/// One segment of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the chunk sequence.
    pub index: usize,
    pub text: String,
    /// Document the chunk came from (path or URL as given).
    pub source: Arc<str>,
}

impl Chunk {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_size: usize, overlap: usize) -> Result<Self, CorpusError> {
        if max_size == 0 || overlap >= max_size {
            return Err(CorpusError::InvalidConfig(format!(
                "invalid chunking: size {max_size}, overlap {overlap}"
            )));
        }
        Ok(Self { max_size, overlap })
    }

    pub fn from_config(config: &CorpusConfig) -> Result<Self, CorpusError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily split `text`. The returned iterator can be cloned to restart
    /// from its current position.
    pub fn split(&self, text: &str, source: &str) -> Chunks {
        Chunks {
            chars: text.chars().collect::<Vec<_>>().into(),
            source: Arc::from(source),
            max_size: self.max_size,
            overlap: self.overlap,
            start: 0,
            index: 0,
            finished: text.is_empty(),
        }
    }
}

/// Iterator over the chunks of one text.
#[derive(Debug, Clone)]
pub struct Chunks {
    chars: Arc<[char]>,
    source: Arc<str>,
    max_size: usize,
    overlap: usize,
    start: usize,
    index: usize,
    finished: bool,
}

impl Chunks {
    /// End (exclusive) of the chunk starting at `self.start`, for text that
    /// does not fit in one window. Always in `(start + overlap, start + max_size]`
    /// so that the next chunk begins strictly later.
    fn cut_point(&self) -> usize {
        let lo = self.start + self.overlap + 1;
        let hi = self.start + self.max_size;
        let c = &self.chars;

        // Candidate `end` values, scanned from the right.
        let paragraph = (lo..=hi).rev().find(|&end| end >= 2 && c[end - 2] == '\n' && c[end - 1] == '\n');
        if let Some(end) = paragraph {
            return end;
        }

        let sentence = (lo..=hi).rev().find(|&end| {
            end >= 2 && c[end - 1].is_whitespace() && matches!(c[end - 2], '.' | '!' | '?')
        });
        if let Some(end) = sentence {
            return end;
        }

        let word = (lo..=hi).rev().find(|&end| c[end - 1].is_whitespace());
        word.unwrap_or(hi)
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }

        let len = self.chars.len();
        let end = if len - self.start <= self.max_size {
            self.finished = true;
            len
        } else {
            self.cut_point()
        };

        let chunk = Chunk {
            index: self.index,
            text: self.chars[self.start..end].iter().collect(),
            source: Arc::clone(&self.source),
        };

        self.index += 1;
        if !self.finished {
            self.start = end - self.overlap;
        }
        Some(chunk)
    }
}
