//! Configuration for the chunk subsystem.
//!
//! [`StoreConfig`] gathers every knob the splitters, the addresser and the
//! chunk manager read. It deserializes from any serde format with missing
//! fields falling back to their defaults.
//!
//! # Example
//!
//! ```
//! use leafstore::{ChunkAlgorithm, HashAlgorithm, StoreConfig};
//!
//! let config = StoreConfig::default()
//!     .with_hash_algorithm(HashAlgorithm::XxHash32)
//!     .with_chunk_splitter_version(ChunkAlgorithm::RabinKarp)
//!     .with_max_cache_size(1000);
//!
//! config.validate()?;
//! # Ok::<(), leafstore::StoreError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::hash::HashAlgorithm;
use crate::splitter::ChunkAlgorithm;

/// Default lower bound on piece size in bytes.
pub const DEFAULT_MINIMUM_CHUNK_SIZE: usize = 20;

/// Default number of chunks held by the cache.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 300;

/// Default size above which splitting moves to a background worker (1 MiB).
pub const DEFAULT_WORKER_THRESHOLD: usize = 1024 * 1024;

/// Default number of ids per background fetch batch.
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 100;

/// Default number of fetch batches in flight.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Default time a load waits for chunks to arrive from a remote peer.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;

/// Configuration consumed by the splitters, the addresser and the chunk manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    hash_algorithm: HashAlgorithm,
    chunk_splitter_version: ChunkAlgorithm,
    use_segmenter: bool,
    custom_chunk_size: usize,
    minimum_chunk_size: usize,
    max_cache_size: usize,
    disable_worker_for_chunks: bool,
    worker_threshold: usize,
    encrypt: bool,
    passphrase: Option<String>,
    fetch_batch_size: usize,
    fetch_concurrency: usize,
    read_timeout_ms: u64,
}

impl StoreConfig {
    /// Sets the content-address hash algorithm.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets the splitter version.
    pub fn with_chunk_splitter_version(mut self, version: ChunkAlgorithm) -> Self {
        self.chunk_splitter_version = version;
        self
    }

    /// Enables or disables natural-language segmentation of plain text.
    pub fn with_segmenter(mut self, enabled: bool) -> Self {
        self.use_segmenter = enabled;
        self
    }

    /// Sets the piece size multiplier (`0` keeps the store's base document size).
    pub fn with_custom_chunk_size(mut self, multiplier: usize) -> Self {
        self.custom_chunk_size = multiplier;
        self
    }

    /// Sets the lower bound on piece size.
    pub fn with_minimum_chunk_size(mut self, size: usize) -> Self {
        self.minimum_chunk_size = size;
        self
    }

    /// Sets the number of chunks the cache may hold.
    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    /// Keeps splitting on the calling task regardless of file size.
    pub fn with_worker_disabled(mut self, disabled: bool) -> Self {
        self.disable_worker_for_chunks = disabled;
        self
    }

    /// Sets the size above which splitting moves to a background worker.
    pub fn with_worker_threshold(mut self, bytes: usize) -> Self {
        self.worker_threshold = bytes;
        self
    }

    /// Enables salted addressing with the given passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.encrypt = true;
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Sets the bounded batch size and concurrency used for batched reads.
    pub fn with_fetch_limits(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.fetch_batch_size = batch_size;
        self.fetch_concurrency = concurrency;
        self
    }

    /// Sets how long loads wait for chunks to arrive.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Returns the hash algorithm.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Returns the splitter version.
    pub fn chunk_splitter_version(&self) -> ChunkAlgorithm {
        self.chunk_splitter_version
    }

    /// Returns whether the segmenter is requested.
    pub fn use_segmenter(&self) -> bool {
        self.use_segmenter
    }

    /// Returns the piece size multiplier.
    pub fn custom_chunk_size(&self) -> usize {
        self.custom_chunk_size
    }

    /// Returns the lower bound on piece size.
    pub fn minimum_chunk_size(&self) -> usize {
        self.minimum_chunk_size
    }

    /// Returns the cache bound.
    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    /// Returns whether background splitting is disabled.
    pub fn worker_disabled(&self) -> bool {
        self.disable_worker_for_chunks
    }

    /// Returns the background splitting threshold.
    pub fn worker_threshold(&self) -> usize {
        self.worker_threshold
    }

    /// Returns the passphrase when salted addressing is enabled.
    pub fn salt_passphrase(&self) -> Option<&str> {
        if self.encrypt {
            self.passphrase.as_deref()
        } else {
            None
        }
    }

    /// Returns the batch size for batched reads.
    pub fn fetch_batch_size(&self) -> usize {
        self.fetch_batch_size
    }

    /// Returns the number of concurrent batches for batched reads.
    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency
    }

    /// Returns how long loads wait for chunks to arrive.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Validates the current configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use leafstore::StoreConfig;
    ///
    /// let config = StoreConfig::default().with_max_cache_size(0);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(StoreError::InvalidConfig {
                message: "max_cache_size must be non-zero",
            });
        }
        if self.minimum_chunk_size == 0 {
            return Err(StoreError::InvalidConfig {
                message: "minimum_chunk_size must be non-zero",
            });
        }
        if self.fetch_batch_size == 0 || self.fetch_concurrency == 0 {
            return Err(StoreError::InvalidConfig {
                message: "fetch batch size and concurrency must be non-zero",
            });
        }
        if self.encrypt && self.passphrase.as_deref().is_none_or(str::is_empty) {
            return Err(StoreError::InvalidConfig {
                message: "encrypt requires a passphrase",
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            chunk_splitter_version: ChunkAlgorithm::default(),
            use_segmenter: false,
            custom_chunk_size: 0,
            minimum_chunk_size: DEFAULT_MINIMUM_CHUNK_SIZE,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            disable_worker_for_chunks: false,
            worker_threshold: DEFAULT_WORKER_THRESHOLD,
            encrypt: false,
            passphrase: None,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.hash_algorithm(), HashAlgorithm::XxHash64);
        assert_eq!(config.chunk_splitter_version(), ChunkAlgorithm::V2);
        assert_eq!(config.minimum_chunk_size(), 20);
        assert_eq!(config.max_cache_size(), 300);
        assert!(config.salt_passphrase().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::default()
            .with_custom_chunk_size(2)
            .with_minimum_chunk_size(64)
            .with_worker_disabled(true)
            .with_fetch_limits(10, 2)
            .with_read_timeout(Duration::from_millis(250));
        assert_eq!(config.custom_chunk_size(), 2);
        assert_eq!(config.minimum_chunk_size(), 64);
        assert!(config.worker_disabled());
        assert_eq!(config.fetch_batch_size(), 10);
        assert_eq!(config.fetch_concurrency(), 2);
        assert_eq!(config.read_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_passphrase_enables_salting() {
        let config = StoreConfig::default().with_passphrase("secret");
        assert_eq!(config.salt_passphrase(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(StoreConfig::default().with_max_cache_size(0).validate().is_err());
        assert!(StoreConfig::default().with_minimum_chunk_size(0).validate().is_err());
        assert!(StoreConfig::default().with_fetch_limits(0, 1).validate().is_err());
        assert!(StoreConfig::default().with_fetch_limits(1, 0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_encrypt_without_passphrase() {
        let config: StoreConfig = serde_json::from_value(serde_json::json!({
            "encrypt": true
        }))
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StoreConfig = serde_json::from_value(serde_json::json!({
            "hash_algorithm": "sha1",
            "chunk_splitter_version": "v3-rabin-karp",
            "max_cache_size": 12
        }))
        .unwrap();
        assert_eq!(config.hash_algorithm(), HashAlgorithm::Sha1);
        assert_eq!(config.chunk_splitter_version(), ChunkAlgorithm::RabinKarp);
        assert_eq!(config.max_cache_size(), 12);
        assert_eq!(config.minimum_chunk_size(), DEFAULT_MINIMUM_CHUNK_SIZE);
    }
}
