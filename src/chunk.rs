//! Separator-aware text chunker.
//!
//! Splits guideline text into bounded, overlapping segments. Separators are
//! tried in priority order (markdown headers, blank lines, sentence breaks,
//! whitespace); the first one present in the text wins. Pieces are greedily
//! accumulated up to `chunk_size`, and each flush re-starts the buffer
//! `overlap` characters before the flush point so context survives the cut.
//!
//! All sizes count `char`s, not bytes — guideline corpora are largely
//! Chinese, and byte slicing would split codepoints.

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
    min_chunk_size: usize,
    separators: Vec<String>,
}

impl TextChunker {
    /// Rejects `overlap >= chunk_size`, which would make the fixed-width
    /// windower stand still.
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        min_chunk_size: usize,
        separators: Vec<String>,
    ) -> Result<TextChunker> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(TextChunker {
            chunk_size,
            overlap,
            min_chunk_size,
            separators,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<TextChunker> {
        TextChunker::new(
            config.chunk_size,
            config.overlap,
            config.min_chunk_size,
            config.separators.clone(),
        )
    }

    /// Split `text` into ordered chunks. Empty (or whitespace-only) input
    /// yields no chunks; text shorter than `chunk_size` yields one.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let separator = self
            .separators
            .iter()
            .find(|sep| text.contains(sep.as_str()));

        let separator = match separator {
            Some(sep) => sep,
            // No configured separator occurs anywhere: window the whole text.
            None => return self.merge_small(self.window(text)),
        };

        let mut chunks: Vec<String> = Vec::new();
        let mut buf = String::new();
        let mut buf_len = 0usize;

        for piece in split_keeping_separator(text, separator) {
            let piece_len = piece.chars().count();

            // A single oversized piece is windowed on its own; the buffer
            // restarts empty afterwards.
            if piece_len > self.chunk_size {
                flush(&mut chunks, &mut buf);
                buf_len = 0;
                chunks.extend(self.window(&piece));
                continue;
            }

            if !buf.is_empty() && buf_len + piece_len > self.chunk_size {
                let tail = overlap_tail(&buf, self.overlap);
                flush(&mut chunks, &mut buf);
                buf_len = tail.chars().count();
                buf = tail;
            }

            buf.push_str(&piece);
            buf_len += piece_len;
        }

        flush(&mut chunks, &mut buf);
        self.merge_small(chunks)
    }

    /// Fixed-width windower for text without usable separators. Windows are
    /// `chunk_size` chars and advance by `chunk_size - overlap`.
    fn window(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.overlap;
        let mut out = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }

        out
    }

    /// Fold chunks shorter than `min_chunk_size` into their successor so no
    /// degenerate fragment survives. A trailing short chunk joins its
    /// predecessor instead.
    fn merge_small(&self, chunks: Vec<String>) -> Vec<String> {
        if chunks.is_empty() {
            return chunks;
        }

        let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
        let mut carry: Option<String> = None;

        for chunk in chunks {
            let combined = match carry.take() {
                Some(prev) => format!("{}\n{}", prev, chunk),
                None => chunk,
            };
            if combined.chars().count() < self.min_chunk_size {
                carry = Some(combined);
            } else {
                merged.push(combined);
            }
        }

        if let Some(rest) = carry {
            match merged.last_mut() {
                Some(last) => {
                    last.push('\n');
                    last.push_str(&rest);
                }
                None => merged.push(rest),
            }
        }

        merged
    }
}

/// Split on `separator`, re-attaching it as a prefix of the following piece
/// so nothing is lost between chunks.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        if i == 0 {
            pieces.push(part.to_string());
        } else {
            pieces.push(format!("{}{}", separator, part));
        }
    }
    pieces
}

/// Last `overlap` chars of the buffer, seeding the next chunk.
fn overlap_tail(buf: &str, overlap: usize) -> String {
    let len = buf.chars().count();
    let start = len.saturating_sub(overlap);
    buf.chars().skip(start).collect()
}

fn flush(chunks: &mut Vec<String>, buf: &mut String) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    buf.clear();
}
