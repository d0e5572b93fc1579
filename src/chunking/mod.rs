//! Passage chunking for extracted document text.
//!
//! Text is cut into overlapping passages of at most `chunk_size` bytes. Cuts
//! prefer paragraph breaks, then sentence ends, then line breaks, then spaces,
//! searched in the back half of each window. Passages are never trimmed, so
//! the original text can be rebuilt from them by dropping the overlap.

use crate::config::ChunkingSettings;
use serde::{Deserialize, Serialize};

/// Page separator emitted by PDF text extraction.
pub const PAGE_BREAK: char = '\u{000C}';

/// One slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Zero-based position in the document.
    pub ordinal: u32,
    pub text: String,
    /// Byte offset of the first byte in the source text.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// 1-based page, when the text carries page breaks.
    pub page: Option<u32>,
}

/// Deterministic, pure text splitter.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(8);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2 - 1),
        }
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Self {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into passages.
    ///
    /// Empty or whitespace-only input yields no passages. Whitespace after the
    /// last passage is not carried into a passage of its own.
    pub fn split(&self, text: &str) -> Vec<Passage> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let page_breaks: Vec<usize> = text
            .char_indices()
            .filter(|(_, c)| *c == PAGE_BREAK)
            .map(|(i, _)| i)
            .collect();

        let mut passages = Vec::new();
        let mut start = 0;

        loop {
            if start > 0 && text[start..].trim().is_empty() {
                break;
            }

            let end = if text.len() - start <= self.chunk_size {
                text.len()
            } else {
                self.find_break(text, start)
            };

            let slice = &text[start..end];
            let page = if page_breaks.is_empty() {
                None
            } else {
                let anchor = start + slice.find(|c: char| !c.is_whitespace()).unwrap_or(0);
                Some(page_breaks.iter().filter(|&&b| b < anchor).count() as u32 + 1)
            };

            passages.push(Passage {
                ordinal: passages.len() as u32,
                text: slice.to_string(),
                start,
                end,
                page,
            });

            if end >= text.len() {
                break;
            }

            let back = end.saturating_sub(self.overlap).max(start + 1);
            let next = ceil_char_boundary(text, back);
            start = align_to_word(text, next, end);
        }

        passages
    }

    /// Pick the cut point for the window starting at `start`.
    fn find_break(&self, text: &str, start: usize) -> usize {
        let mut hi = floor_char_boundary(text, start + self.chunk_size);
        if hi <= start {
            hi = ceil_char_boundary(text, start + 1);
        }
        let lo = ceil_char_boundary(text, start + self.chunk_size / 2).min(hi);
        let window = &text[lo..hi];

        if let Some(pos) = window.rfind("\n\n") {
            return lo + pos + 2;
        }
        if let Some(cut) = last_sentence_end(window) {
            return lo + cut;
        }
        if let Some(pos) = window.rfind('\n') {
            return lo + pos + 1;
        }
        if let Some((pos, c)) = window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
        {
            return lo + pos + c.len_utf8();
        }
        hi
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::from_settings(&ChunkingSettings::default())
    }
}

/// Byte offset just past the last `.`, `!` or `?` that is followed by whitespace.
fn last_sentence_end(window: &str) -> Option<usize> {
    let mut found = None;
    let mut chars = window.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(i, next)) = chars.peek() {
                if next.is_whitespace() {
                    found = Some(i + next.len_utf8());
                }
            }
        }
    }
    found
}

/// Move `pos` forward to the start of the next word, staying below `limit`.
fn align_to_word(text: &str, pos: usize, limit: usize) -> usize {
    let at_word_start = text[..pos]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    if at_word_start || pos >= limit {
        return pos;
    }
    let tail = &text[pos..limit];
    let Some(ws) = tail.find(char::is_whitespace) else {
        return pos;
    };
    match tail[ws..].find(|c: char| !c.is_whitespace()) {
        Some(word) => pos + ws + word,
        None => pos,
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
