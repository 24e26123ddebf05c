//! Line and code-block aware text splitting.
//!
//! Lines accumulate into a block until it reaches the minimum size, a blank
//! line ends it, or a heading starts a new one. Fenced code blocks are kept
//! whole, then cut after punctuation when short and not an encoded blob.

use std::collections::VecDeque;

use super::{SplitLimits, enqueue_capped};

const FENCE: &str = "```";

/// Code blocks longer than this are never subdivided.
const SHORT_BLOCK: usize = 2048;

/// Characters after which a short code block may be cut.
const PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', '}'];

/// Lazy line-aware splitter over an owned string.
pub(crate) struct LinePieces {
    text: String,
    pos: usize,
    minimum: usize,
    cap: usize,
    pending: VecDeque<String>,
}

impl LinePieces {
    pub(crate) fn new(text: String, limits: SplitLimits) -> Self {
        Self {
            text,
            pos: 0,
            minimum: limits.minimum.max(1),
            cap: limits.piece_size,
            pending: VecDeque::new(),
        }
    }

    fn line_end(&self, from: usize) -> usize {
        match self.text[from..].find('\n') {
            Some(i) => from + i + 1,
            None => self.text.len(),
        }
    }

    /// Returns the end of the block starting at `self.pos`, and whether the
    /// block is a fenced code block.
    fn next_block(&self) -> (usize, bool) {
        let start = self.pos;
        let mut end = start;
        while end < self.text.len() {
            let line_end = self.line_end(end);
            let line = &self.text[end..line_end];
            if line.starts_with(FENCE) {
                if end > start {
                    return (end, false);
                }
                return (self.fence_end(line_end), true);
            }
            if line.starts_with('#') && end > start {
                return (end, false);
            }
            end = line_end;
            if end - start >= self.minimum || line.trim().is_empty() {
                return (end, false);
            }
        }
        (end, false)
    }

    /// Returns the end of the line closing a fence opened before `from`.
    fn fence_end(&self, mut from: usize) -> usize {
        while from < self.text.len() {
            let line_end = self.line_end(from);
            if self.text[from..line_end].starts_with(FENCE) {
                return line_end;
            }
            from = line_end;
        }
        self.text.len()
    }
}

impl Iterator for LinePieces {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(piece) = self.pending.pop_front() {
                return Some(piece);
            }
            if self.pos >= self.text.len() {
                return None;
            }

            let (end, fenced) = self.next_block();
            let block = &self.text[self.pos..end];
            if fenced && block.len() <= SHORT_BLOCK && !looks_like_base64(block) {
                for part in punctuation_parts(block, self.minimum) {
                    enqueue_capped(&mut self.pending, part, self.cap);
                }
            } else {
                enqueue_capped(&mut self.pending, block, self.cap);
            }
            self.pos = end;
        }
    }
}

/// Cuts `block` after punctuation once each part reaches `minimum` bytes.
fn punctuation_parts(block: &str, minimum: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in block.char_indices() {
        if PUNCTUATION.contains(&c) {
            let end = i + c.len_utf8();
            if end - start >= minimum {
                parts.push(&block[start..end]);
                start = end;
            }
        }
    }
    if start < block.len() {
        parts.push(&block[start..]);
    }
    parts
}

/// Returns true when the body of a fenced block is a single base64 run.
fn looks_like_base64(block: &str) -> bool {
    let mut count = 0usize;
    for line in block.lines().filter(|l| !l.starts_with(FENCE)) {
        for c in line.chars().filter(|c| !c.is_whitespace()) {
            if !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')) {
                return false;
            }
            count += 1;
        }
    }
    count >= 32
}
