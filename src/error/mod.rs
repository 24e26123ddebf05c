//! Error types for leafstore.
//!
//! Recoverable conditions (cache miss, chunk not yet arrived, arrival timeout)
//! never show up here: the pipeline resolves them to `None` slots. Everything
//! in [`StoreError`] is either a configuration mistake or a sign that the
//! local store can no longer be trusted.

use thiserror::Error;

use crate::chunk::DocumentId;

/// Errors raised by the chunk subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No registered splitting strategy accepts the configuration.
    #[error("no available splitter for {algorithm} (segmenter: {use_segmenter})")]
    NoSplitterAvailable {
        /// The configured splitter version.
        algorithm: String,
        /// Whether the natural-language segmenter was requested.
        use_segmenter: bool,
    },

    /// Invalid configuration parameter.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Description of what was invalid.
        message: &'static str,
    },

    /// A document exists where a chunk was expected, but has the wrong shape.
    #[error("corrupted document {id}: {reason}")]
    Corrupted {
        /// The offending document.
        id: DocumentId,
        /// What was wrong with it.
        reason: String,
    },

    /// The store rejected one or more chunks for a reason other than "already exists".
    #[error("failed to write {} chunk(s): {}", .failures.len(), describe_failures(.failures))]
    WriteFailure {
        /// Every failing id with the reason the store gave.
        failures: Vec<(DocumentId, String)>,
    },

    /// Two different payloads were addressed to the same id.
    #[error("hash collision on {id}: stored content differs from the new piece")]
    HashCollision {
        /// The id both payloads map to.
        id: DocumentId,
    },

    /// The whole store call failed (transport, backend unavailable, ...).
    #[error("document store error: {0}")]
    Store(String),

    /// A metadata entry was modified between reading its revision and writing it.
    #[error("entry {path} was modified concurrently")]
    EntryConflict {
        /// The file path of the entry.
        path: String,
    },

    /// A file could not be reassembled because some children never resolved.
    #[error("missing {} chunk(s) for {path}", .ids.len())]
    MissingChunks {
        /// The file path being loaded.
        path: String,
        /// Children that were neither local nor delivered in time.
        ids: Vec<DocumentId>,
    },

    /// A non-empty file produced no chunks at all.
    #[error("no chunks were produced for non-empty file {path}")]
    NoChunksProduced {
        /// The file path being saved.
        path: String,
    },

    /// The chunk manager was destroyed.
    #[error("chunk manager has been destroyed")]
    Destroyed,

    /// A background splitting task failed.
    #[error("background worker failed: {0}")]
    Worker(String),

    /// A document body failed to (de)serialize.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A binary piece was not valid base64.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

fn describe_failures(failures: &[(DocumentId, String)]) -> String {
    failures
        .iter()
        .map(|(id, reason)| format!("{id} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failure_lists_every_id() {
        let err = StoreError::WriteFailure {
            failures: vec![
                (DocumentId::new("h:a"), "disk full".to_string()),
                (DocumentId::new("h:b"), "forbidden".to_string()),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("2 chunk(s)"));
        assert!(message.contains("h:a (disk full)"));
        assert!(message.contains("h:b (forbidden)"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn test_display() {
        let err = StoreError::HashCollision {
            id: DocumentId::new("h:xyz"),
        };
        assert!(err.to_string().contains("hash collision on h:xyz"));
    }
}
