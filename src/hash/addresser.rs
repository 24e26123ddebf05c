//! Piece addressing with cache-backed deduplication.

use std::sync::Arc;

use tracing::error;

use super::HashAlgorithm;
use crate::chunk::{Chunk, DocumentId};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::layer::ChunkCache;

/// A piece together with its content address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedPiece {
    /// False when the id came from the cache's reverse index.
    pub is_new: bool,
    /// The content address.
    pub id: DocumentId,
    /// The piece payload.
    pub piece: Arc<str>,
}

impl AddressedPiece {
    /// Converts the addressed piece into a chunk document.
    pub fn into_chunk(self) -> Chunk {
        Chunk::new(self.id, self.piece)
    }
}

/// Maps pieces to stable chunk ids.
///
/// Content already resident in the cache reuses its id without hashing.
/// Everything else is hashed with the configured [`HashAlgorithm`], salted
/// when the configuration carries a passphrase.
#[derive(Debug, Clone)]
pub struct ContentAddresser {
    algorithm: HashAlgorithm,
    salt: Option<String>,
    cache: Arc<ChunkCache>,
}

impl ContentAddresser {
    /// Creates an addresser sharing `cache` with the chunk manager.
    pub fn new(config: &StoreConfig, cache: Arc<ChunkCache>) -> Self {
        let salt = config
            .salt_passphrase()
            .map(|passphrase| HashAlgorithm::Sha1.digest(&[passphrase.as_bytes()]));
        Self {
            algorithm: config.hash_algorithm(),
            salt,
            cache,
        }
    }

    /// Computes the id of `piece` without consulting the cache.
    pub fn compute_id(&self, piece: &str) -> DocumentId {
        match &self.salt {
            Some(salt) => {
                let suffix = format!("-{salt}-{}", piece.len());
                let digest = self.algorithm.digest(&[piece.as_bytes(), suffix.as_bytes()]);
                DocumentId::chunk(&digest, true)
            }
            None => DocumentId::chunk(&self.algorithm.digest(&[piece.as_bytes()]), false),
        }
    }

    /// Resolves `piece` to its content address.
    ///
    /// Returns [`StoreError::HashCollision`] when the cache already holds a
    /// different payload under the computed id.
    pub fn address(&self, piece: impl Into<Arc<str>>) -> Result<AddressedPiece> {
        let piece: Arc<str> = piece.into();
        if let Some(id) = self.cache.id_for(&piece) {
            return Ok(AddressedPiece {
                is_new: false,
                id,
                piece,
            });
        }

        let id = self.compute_id(&piece);
        if let Some(resident) = self.cache.peek(&id).filter(|c| c.data() != &*piece) {
            error!(
                id = %id,
                resident_len = resident.len(),
                piece_len = piece.len(),
                "hash collision detected while addressing piece"
            );
            return Err(StoreError::HashCollision { id });
        }

        Ok(AddressedPiece {
            is_new: true,
            id,
            piece,
        })
    }

    /// Returns the configured algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresser(config: StoreConfig) -> (ContentAddresser, Arc<ChunkCache>) {
        let cache = Arc::new(ChunkCache::new(16));
        (ContentAddresser::new(&config, cache.clone()), cache)
    }

    #[test]
    fn test_same_piece_same_id() {
        let (addresser, _) = addresser(StoreConfig::default());
        let a = addresser.address("some text").unwrap();
        let b = addresser.address("some text").unwrap();
        assert!(a.is_new);
        assert_eq!(a.id, b.id);
        assert!(a.id.is_chunk());
        assert!(!a.id.is_encrypted_chunk());
        assert_ne!(a.id, addresser.address("other text").unwrap().id);
    }

    #[test]
    fn test_cached_piece_is_not_new() {
        let (addresser, cache) = addresser(StoreConfig::default());
        let first = addresser.address("cached").unwrap();
        cache.insert(first.clone().into_chunk());

        let second = addresser.address("cached").unwrap();
        assert!(!second.is_new);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_salted_ids() {
        let (plain, _) = addresser(StoreConfig::default());
        let (salted, _) = addresser(StoreConfig::default().with_passphrase("pw"));
        let (other, _) = addresser(StoreConfig::default().with_passphrase("pw2"));

        let id = salted.compute_id("payload");
        assert!(id.is_encrypted_chunk());
        assert!(id.as_str().starts_with("h:+"));
        assert_ne!(id, other.compute_id("payload"));
        assert_ne!(
            id.as_str().trim_start_matches("h:+"),
            plain.compute_id("payload").as_str().trim_start_matches("h:")
        );
    }

    #[test]
    fn test_collision_against_cache_is_an_error() {
        let (addresser, cache) = addresser(StoreConfig::default());
        let id = addresser.compute_id("real content");
        cache.insert(Chunk::new(id.clone(), "impostor"));

        let err = addresser.address("real content").unwrap_err();
        assert!(matches!(err, StoreError::HashCollision { id: ref got } if *got == id));
    }
}
