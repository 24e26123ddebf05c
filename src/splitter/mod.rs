//! Content splitting strategies.
//!
//! A [`ContentSplitter`] turns a [`FileBlob`] into a lazy sequence of string
//! pieces whose concatenation (after decoding, for binary blobs) reproduces
//! the blob exactly.
//!
//! - [`ChunkAlgorithm`] - Splitter version selected by configuration
//! - [`ContentSplitter`] - Picks a strategy once and splits blobs with it
//! - [`Pieces`] - Async stream of pieces, fed inline or by a background worker
//!
//! # Example
//!
//! ```
//! use leafstore::{ContentSplitter, FileBlob, StoreConfig};
//!
//! let splitter = ContentSplitter::new(&StoreConfig::default())?;
//! let blob = FileBlob::text("note.md", "# Title\n\nSome text.\n");
//!
//! let pieces: Vec<String> = splitter.pieces(&blob)?.collect();
//! assert_eq!(pieces.concat(), "# Title\n\nSome text.\n");
//! # Ok::<(), leafstore::StoreError>(())
//! ```

mod binary;
mod line;
mod rolling;
#[cfg(feature = "segmenter")]
mod segment;
mod stream;

pub use stream::Pieces;

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cdc::RabinKarp;
use crate::chunk::{DocumentId, FileBlob};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::util::cap_pieces;

use binary::WindowPieces;
use line::LinePieces;
use rolling::RollingPieces;

/// Base document size limit of the backing store, in bytes.
pub const MAX_DOC_SIZE_BIN: usize = 102_400;

/// A boxed, owned piece iterator.
pub type PieceIter = Box<dyn Iterator<Item = String> + Send>;

/// Splitter version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChunkAlgorithm {
    /// Line and code-block aware splitting.
    #[serde(rename = "v1")]
    V1,
    /// Sentence segmentation for text, delimiter-snapped windows for binary.
    #[default]
    #[serde(rename = "v2")]
    V2,
    /// Rolling-hash content-defined splitting.
    #[serde(rename = "v3-rabin-karp")]
    RabinKarp,
}

impl ChunkAlgorithm {
    /// Returns the configuration name of the version.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::RabinKarp => "v3-rabin-karp",
        }
    }
}

impl fmt::Display for ChunkAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of splitting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    LineAware,
    Segmented,
    Rolling,
}

impl Strategy {
    const ALL: [Strategy; 3] = [Self::LineAware, Self::Segmented, Self::Rolling];

    fn matches(self, config: &StoreConfig) -> bool {
        match self {
            Self::LineAware => config.chunk_splitter_version() == ChunkAlgorithm::V1,
            Self::Segmented => {
                config.chunk_splitter_version() == ChunkAlgorithm::V2
                    && (!config.use_segmenter() || cfg!(feature = "segmenter"))
            }
            Self::Rolling => config.chunk_splitter_version() == ChunkAlgorithm::RabinKarp,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::LineAware => "line-aware",
            Self::Segmented => "segmented",
            Self::Rolling => "rabin-karp",
        }
    }
}

/// Size limits derived from the configuration and one blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitLimits {
    /// Hard cap on every emitted piece, in bytes.
    pub(crate) piece_size: usize,
    /// Effective lower bound on piece size.
    pub(crate) minimum: usize,
}

impl SplitLimits {
    pub(crate) fn new(config: &StoreConfig, blob_len: usize) -> Self {
        let piece_size = MAX_DOC_SIZE_BIN * (config.custom_chunk_size() + 1);
        let minimum = config
            .minimum_chunk_size()
            .max(blob_len / 100)
            .min(piece_size);
        Self {
            piece_size,
            minimum,
        }
    }

    /// Largest raw binary window whose base64 encoding fits in `piece_size`.
    pub(crate) fn raw_binary_cap(&self) -> usize {
        (self.piece_size / 4 * 3).max(3)
    }
}

/// Splits blobs with the strategy selected by a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct ContentSplitter {
    config: StoreConfig,
    strategy: Strategy,
}

impl ContentSplitter {
    /// Selects the strategy matching `config`.
    ///
    /// Fails with [`StoreError::NoSplitterAvailable`] when none matches, for
    /// example when the segmenter is requested but the `segmenter` feature
    /// is disabled.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let strategy = Strategy::ALL
            .into_iter()
            .find(|s| s.matches(config))
            .ok_or_else(|| StoreError::NoSplitterAvailable {
                algorithm: config.chunk_splitter_version().to_string(),
                use_segmenter: config.use_segmenter(),
            })?;
        debug!(strategy = strategy.name(), "content splitter selected");
        Ok(Self {
            config: config.clone(),
            strategy,
        })
    }

    /// Returns the name of the selected strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Splits `blob` synchronously.
    ///
    /// The iterator owns its input and can be moved to another thread.
    pub fn pieces(&self, blob: &FileBlob) -> Result<PieceIter> {
        let limits = SplitLimits::new(&self.config, blob.len());
        if !blob.is_plain() {
            let iter: PieceIter = match self.strategy {
                Strategy::LineAware => {
                    Box::new(WindowPieces::new(blob.data().clone(), limits, None))
                }
                Strategy::Segmented => Box::new(WindowPieces::new(
                    blob.data().clone(),
                    limits,
                    Some(binary::delimiter_for(blob.path())),
                )),
                Strategy::Rolling => Box::new(RollingPieces::binary(
                    blob.data().clone(),
                    rolling_cdc(limits, limits.raw_binary_cap()),
                )),
            };
            return Ok(iter);
        }

        let text = String::from_utf8(blob.data().to_vec()).map_err(|_| StoreError::Corrupted {
            id: DocumentId::for_path(blob.path()),
            reason: "plain-text blob is not valid UTF-8".to_string(),
        })?;
        let iter: PieceIter = match self.strategy {
            Strategy::LineAware => Box::new(LinePieces::new(text, limits)),
            #[cfg(feature = "segmenter")]
            Strategy::Segmented if self.config.use_segmenter() => {
                Box::new(segment::SentencePieces::new(text, limits))
            }
            Strategy::Segmented => Box::new(LinePieces::new(text, limits)),
            Strategy::Rolling => Box::new(RollingPieces::text(
                text,
                rolling_cdc(limits, limits.piece_size.saturating_sub(3)),
            )),
        };
        Ok(iter)
    }

    /// Splits `blob` into an async stream of pieces.
    ///
    /// Blobs larger than the worker threshold are split on a blocking worker
    /// thread unless workers are disabled; the output is identical either way.
    pub fn split(&self, blob: &FileBlob) -> Result<Pieces> {
        let iter = self.pieces(blob)?;
        let offload =
            !self.config.worker_disabled() && blob.len() > self.config.worker_threshold();
        if offload {
            Ok(Pieces::spawn(iter))
        } else {
            Ok(Pieces::inline(iter))
        }
    }
}

fn rolling_cdc(limits: SplitLimits, max: usize) -> RabinKarp {
    let max = max.max(1);
    let avg = (limits.piece_size / 8).max(2);
    let min = limits.minimum.max(avg / 4).min(max);
    RabinKarp::new(min, avg, max)
}

/// Queues `block` as one or more pieces no longer than `cap`.
pub(crate) fn enqueue_capped(pending: &mut VecDeque<String>, block: &str, cap: usize) {
    pending.extend(cap_pieces(block, cap).map(str::to_owned));
}
