//! BLAKE3 digest state for chunk addressing.

/// A streaming BLAKE3 hasher producing 32-byte digests.
#[derive(Debug, Clone, Default)]
pub(crate) struct Blake3Hasher {
    state: blake3::Hasher,
}

impl Blake3Hasher {
    /// Updates the hasher with more data.
    pub(crate) fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalizes and returns the digest bytes.
    pub(crate) fn finalize(&self) -> [u8; 32] {
        self.state.finalize().into()
    }
}
