//! Content-defined splitting driven by the Rabin-Karp rolling hash.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::cdc::RabinKarp;

enum Source {
    Text(String),
    Binary(Bytes),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    fn is_cut_point(&self, index: usize) -> bool {
        match self {
            Self::Text(text) => text.is_char_boundary(index),
            Self::Binary(_) => true,
        }
    }
}

/// Lazy rolling-hash splitter.
///
/// Text cuts found inside a multi-byte character are deferred to the end of
/// that character; binary pieces are base64 encoded.
pub(crate) struct RollingPieces {
    source: Source,
    pos: usize,
    cdc: RabinKarp,
}

impl RollingPieces {
    pub(crate) fn text(text: String, cdc: RabinKarp) -> Self {
        Self {
            source: Source::Text(text),
            pos: 0,
            cdc,
        }
    }

    pub(crate) fn binary(data: Bytes, cdc: RabinKarp) -> Self {
        Self {
            source: Source::Binary(data),
            pos: 0,
            cdc,
        }
    }
}

impl Iterator for RollingPieces {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let bytes = self.source.bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        let start = self.pos;
        let mut end = bytes.len();
        let mut cut_due = false;
        for (i, &byte) in bytes.iter().enumerate().skip(start) {
            cut_due |= self.cdc.update(byte);
            if cut_due && self.source.is_cut_point(i + 1) {
                self.cdc.mark_boundary();
                end = i + 1;
                break;
            }
        }
        self.pos = end;

        let piece = match &self.source {
            Source::Text(text) => text[start..end].to_owned(),
            Source::Binary(data) => STANDARD.encode(&data[start..end]),
        };
        Some(piece)
    }
}
