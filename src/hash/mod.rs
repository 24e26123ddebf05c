//! Content-address hashing.
//!
//! This module turns piece payloads into stable chunk ids.
//!
//! - [`HashAlgorithm`] - Selectable digest behind every chunk id
//! - [`ContentAddresser`] - Maps pieces to ids, short-circuiting through the cache
//! - [`AddressedPiece`] - Result of addressing one piece

mod addresser;
#[cfg(feature = "hash-blake3")]
mod blake3;

pub use addresser::{AddressedPiece, ContentAddresser};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use xxhash_rust::xxh32::Xxh32;
use xxhash_rust::xxh64::Xxh64;

use crate::util::to_base36;

/// Digest used to derive chunk ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// 64-bit xxHash.
    #[default]
    #[serde(rename = "xxhash64")]
    XxHash64,
    /// 32-bit xxHash, for constrained environments.
    #[serde(rename = "xxhash32")]
    XxHash32,
    /// SHA-1, kept for stores written by older versions.
    #[serde(rename = "sha1")]
    Sha1,
    /// BLAKE3.
    #[cfg(feature = "hash-blake3")]
    #[serde(rename = "blake3")]
    Blake3,
}

impl HashAlgorithm {
    /// Hashes the concatenation of `parts` and renders the digest in base 36.
    pub fn digest(&self, parts: &[&[u8]]) -> String {
        let mut hasher = PieceHasher::new(*self);
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize()
    }

    /// Returns the configuration name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XxHash64 => "xxhash64",
            Self::XxHash32 => "xxhash32",
            Self::Sha1 => "sha1",
            #[cfg(feature = "hash-blake3")]
            Self::Blake3 => "blake3",
        }
    }
}

/// Streaming state for one [`HashAlgorithm`].
enum PieceHasher {
    XxHash64(Xxh64),
    XxHash32(Xxh32),
    Sha1(Sha1),
    #[cfg(feature = "hash-blake3")]
    Blake3(Box<blake3::Blake3Hasher>),
}

impl PieceHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::XxHash64 => Self::XxHash64(Xxh64::new(0)),
            HashAlgorithm::XxHash32 => Self::XxHash32(Xxh32::new(0)),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            #[cfg(feature = "hash-blake3")]
            HashAlgorithm::Blake3 => Self::Blake3(Box::default()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::XxHash64(state) => state.update(data),
            Self::XxHash32(state) => state.update(data),
            Self::Sha1(state) => state.update(data),
            #[cfg(feature = "hash-blake3")]
            Self::Blake3(state) => state.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Self::XxHash64(state) => to_base36(&state.digest().to_be_bytes()),
            Self::XxHash32(state) => to_base36(&state.digest().to_be_bytes()),
            Self::Sha1(state) => to_base36(&state.finalize()),
            #[cfg(feature = "hash-blake3")]
            Self::Blake3(state) => to_base36(&state.finalize()),
        }
    }
}
