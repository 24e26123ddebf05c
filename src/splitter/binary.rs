//! Fixed-window splitting for binary blobs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use super::SplitLimits;

/// Picks the delimiter byte windows snap to, from the file extension.
pub(crate) fn delimiter_for(path: &str) -> u8 {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => b'/',
        "json" | "canvas" => b',',
        _ => b'\0',
    }
}

/// Lazy fixed-window splitter yielding base64-encoded pieces.
///
/// With a delimiter, a window ends right after the first delimiter found at
/// or beyond `minimum` bytes into it; the final window is never snapped.
pub(crate) struct WindowPieces {
    data: Bytes,
    pos: usize,
    window: usize,
    minimum: usize,
    delimiter: Option<u8>,
}

impl WindowPieces {
    pub(crate) fn new(data: Bytes, limits: SplitLimits, delimiter: Option<u8>) -> Self {
        let window = limits.raw_binary_cap();
        Self {
            data,
            pos: 0,
            window,
            minimum: limits.minimum.min(window),
            delimiter,
        }
    }

    fn next_end(&self) -> usize {
        let limit = (self.pos + self.window).min(self.data.len());
        if limit == self.data.len() {
            return limit;
        }
        let Some(delimiter) = self.delimiter else {
            return limit;
        };
        let from = self.pos + self.minimum;
        if from >= limit {
            return limit;
        }
        self.data[from..limit]
            .iter()
            .position(|&b| b == delimiter)
            .map_or(limit, |i| from + i + 1)
    }
}

impl Iterator for WindowPieces {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pos >= self.data.len() {
            return None;
        }
        let end = self.next_end();
        let piece = STANDARD.encode(&self.data[self.pos..end]);
        self.pos = end;
        Some(piece)
    }
}
