//! SHA-256 fingerprints for documents and request payloads.

use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Incremental fingerprint over several labelled parts.
///
/// Each part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// produce different digests.
#[derive(Clone, Default)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

impl Fingerprinter {
    /// Creates an empty fingerprinter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one part.
    #[must_use]
    pub fn part(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_are_length_prefixed() {
        let a = Fingerprinter::new().part("ab").part("c").finish();
        let b = Fingerprinter::new().part("a").part("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_parts_same_digest() {
        let a = Fingerprinter::new().part("x").part([1u8, 2, 3]).finish();
        let b = Fingerprinter::new().part("x").part([1u8, 2, 3]).finish();
        assert_eq!(a, b);
    }
}
