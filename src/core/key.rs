//! Content addresses for stored blocks
//!
//! A [`Key`] is the digest of a block under a [`HashAlgorithm`]. Only SHA-256
//! is accepted; any other algorithm tag read from disk or parsed from text is
//! a format error.

use crate::core::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Upper bound on the length of any digest carried by a key
pub const MAX_HASH_LENGTH: usize = 64;

/// Digest algorithm used for content addressing
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HashAlgorithm {
    /// SHA-256 (32-byte digest)
    Sha2_256 = 0,
}

impl HashAlgorithm {
    /// Length of a digest produced by this algorithm
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha2_256 => 32,
        }
    }

    /// Textual name used by `Display`/`FromStr` on [`Key`]
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha2_256 => "sha2-256",
        }
    }

    /// Digest a byte slice
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(HashAlgorithm::Sha2_256),
            other => Err(StoreError::UnsupportedHashAlgorithm(other)),
        }
    }
}

impl From<HashAlgorithm> for u8 {
    fn from(algorithm: HashAlgorithm) -> u8 {
        algorithm as u8
    }
}

impl FromStr for HashAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha2-256" => Ok(HashAlgorithm::Sha2_256),
            other => Err(StoreError::Format(format!(
                "unknown hash algorithm '{}'",
                other
            ))),
        }
    }
}

/// Content address of a block
///
/// Equality and ordering cover `(hash, algorithm)`. The `Hash` impl only
/// feeds the first four digest bytes to the hasher, which is enough to spread
/// uniformly distributed digests.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct Key {
    hash: Vec<u8>,
    algorithm: HashAlgorithm,
}

/// Unvalidated wire form of a key
#[derive(Deserialize)]
struct RawKey {
    hash: Vec<u8>,
    algorithm: HashAlgorithm,
}

impl TryFrom<RawKey> for Key {
    type Error = StoreError;

    fn try_from(raw: RawKey) -> Result<Self> {
        Key::new(raw.hash, raw.algorithm)
    }
}

impl Key {
    /// Build a key from an existing digest
    ///
    /// # Errors
    ///
    /// Returns `Format` if the digest length does not match the algorithm.
    pub fn new(hash: impl Into<Vec<u8>>, algorithm: HashAlgorithm) -> Result<Self> {
        let hash = hash.into();
        if hash.len() > MAX_HASH_LENGTH || hash.len() != algorithm.digest_len() {
            return Err(StoreError::Format(format!(
                "{} digest must be {} bytes, got {}",
                algorithm.name(),
                algorithm.digest_len(),
                hash.len()
            )));
        }
        Ok(Key { hash, algorithm })
    }

    /// Address `data` with the mandatory algorithm
    pub fn from_content(data: &[u8]) -> Self {
        let algorithm = HashAlgorithm::Sha2_256;
        Key {
            hash: algorithm.digest(data),
            algorithm,
        }
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Check that `data` digests to this key
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm.digest(data) == self.hash
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut prefix = [0u8; 4];
        let n = self.hash.len().min(prefix.len());
        prefix[..n].copy_from_slice(&self.hash[..n]);
        state.write_u32(u32::from_le_bytes(prefix));
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), hex::encode(&self.hash))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for Key {
    type Err = StoreError;

    /// Parse `<algorithm>:<hex digest>`
    fn from_str(s: &str) -> Result<Self> {
        let (name, digest) = s
            .split_once(':')
            .ok_or_else(|| StoreError::Format(format!("missing algorithm prefix in '{}'", s)))?;
        let algorithm = name.parse::<HashAlgorithm>()?;
        let hash = hex::decode(digest)
            .map_err(|e| StoreError::Format(format!("invalid hex digest: {}", e)))?;
        Key::new(hash, algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_content_matches() {
        let key = Key::from_content(b"hello world");
        assert_eq!(key.algorithm(), HashAlgorithm::Sha2_256);
        assert_eq!(key.hash().len(), 32);
        assert!(key.matches(b"hello world"));
        assert!(!key.matches(b"hello world!"));
    }

    #[test]
    fn test_known_digest() {
        let key = Key::from_content(b"abc");
        assert_eq!(
            hex::encode(key.hash()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_wrong_length_rejected() {
        let result = Key::new(vec![0u8; 16], HashAlgorithm::Sha2_256);
        assert!(matches!(result, Err(StoreError::Format(_))));
    }

    #[test]
    fn test_unknown_algorithm_tag() {
        assert!(matches!(
            HashAlgorithm::try_from(7),
            Err(StoreError::UnsupportedHashAlgorithm(7))
        ));
    }

    #[test]
    fn test_display_parse() {
        let key = Key::from_content(b"display");
        let text = key.to_string();
        assert!(text.starts_with("sha2-256:"));
        assert_eq!(text.parse::<Key>().unwrap(), key);

        assert!("md5:00".parse::<Key>().is_err());
        assert!("nocolon".parse::<Key>().is_err());
        assert!("sha2-256:zz".parse::<Key>().is_err());
    }

    #[test]
    fn test_hash_set_membership() {
        let keys: HashSet<Key> = (0..100u32)
            .map(|i| Key::from_content(&i.to_le_bytes()))
            .collect();
        assert_eq!(keys.len(), 100);
        assert!(keys.contains(&Key::from_content(&5u32.to_le_bytes())));
    }

    #[test]
    fn test_bincode_rejects_bad_algorithm() {
        let key = Key::from_content(b"x");
        let mut bytes = bincode::serialize(&key).unwrap();
        // Algorithm tag is the final byte
        let last = bytes.len() - 1;
        bytes[last] = 9;
        assert!(bincode::deserialize::<Key>(&bytes).is_err());

        let bytes = bincode::serialize(&key).unwrap();
        let decoded: Key = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, key);
    }
}
