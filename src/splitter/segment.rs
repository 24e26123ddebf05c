//! Sentence-segmented text splitting.

use std::collections::VecDeque;

use unicode_segmentation::UnicodeSegmentation;

use super::{SplitLimits, enqueue_capped};

/// Lazy splitter that walks paragraphs and groups their sentences into
/// pieces of at least the minimum size.
pub(crate) struct SentencePieces {
    text: String,
    pos: usize,
    minimum: usize,
    cap: usize,
    pending: VecDeque<String>,
}

impl SentencePieces {
    pub(crate) fn new(text: String, limits: SplitLimits) -> Self {
        Self {
            text,
            pos: 0,
            minimum: limits.minimum.max(1),
            cap: limits.piece_size,
            pending: VecDeque::new(),
        }
    }

    /// End of the paragraph starting at `self.pos`, including the run of
    /// newlines that separates it from the next one.
    fn paragraph_end(&self) -> usize {
        let rest = &self.text[self.pos..];
        match rest.find("\n\n") {
            Some(i) => {
                let tail = &rest[i..];
                let newlines = tail.len() - tail.trim_start_matches('\n').len();
                self.pos + i + newlines
            }
            None => self.text.len(),
        }
    }
}

impl Iterator for SentencePieces {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(piece) = self.pending.pop_front() {
                return Some(piece);
            }
            if self.pos >= self.text.len() {
                return None;
            }

            let end = self.paragraph_end();
            let paragraph = &self.text[self.pos..end];
            let mut start = 0;
            let mut cursor = 0;
            for sentence in paragraph.split_sentence_bounds() {
                cursor += sentence.len();
                if cursor - start >= self.minimum {
                    enqueue_capped(&mut self.pending, &paragraph[start..cursor], self.cap);
                    start = cursor;
                }
            }
            if start < paragraph.len() {
                enqueue_capped(&mut self.pending, &paragraph[start..], self.cap);
            }
            self.pos = end;
        }
    }
}
