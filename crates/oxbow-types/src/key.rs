//! 256-bit identifiers and the XOR distance metric.
//!
//! Every node and every stored value is identified by a [`Key`]: four 64-bit
//! words, word 0 most significant. Content keys are derived with
//! [`Key::compute`] (SHA-256); node keys are generated with [`Key::random`].
//!
//! The distance between two keys is their bitwise XOR interpreted as a
//! 256-bit unsigned integer. [`Distance`] derives its ordering from the word
//! array, which compares element-wise from the most significant word.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::KeyError;

/// Number of 64-bit words in a key.
pub const KEY_WORDS: usize = 4;

/// Key width in bytes.
pub const KEY_BYTES: usize = 32;

/// Key width in bits.
pub const KEY_BITS: usize = 256;

/// A 256-bit node or content identifier.
///
/// Immutable once created. Word 0 is the most significant for ordering,
/// hex rendering, and bit indexing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key([u64; KEY_WORDS]);

impl Key {
    /// The all-zero key, the identity element of XOR.
    pub const ZERO: Key = Key([0; KEY_WORDS]);

    /// Create a key from its word representation (word 0 most significant).
    pub const fn from_words(words: [u64; KEY_WORDS]) -> Self {
        Key(words)
    }

    /// Derive the content key for a byte sequence: SHA-256 of the bytes,
    /// each digest octet group read as a little-endian word.
    pub fn compute(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut words = [0u64; KEY_WORDS];
        for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw);
        }
        Key(words)
    }

    /// Generate a uniformly random key.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut words = [0u64; KEY_WORDS];
        for word in &mut words {
            *word = rng.gen();
        }
        Key(words)
    }

    /// Parse a key from its 64-character hex form (word 0 first).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != KEY_BYTES * 2 {
            return Err(KeyError::InvalidLength { len: s.len() });
        }
        let raw = hex::decode(s).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        let mut words = [0u64; KEY_WORDS];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_be_bytes(buf);
        }
        Ok(Key(words))
    }

    /// The underlying words, word 0 most significant.
    pub fn as_words(&self) -> &[u64; KEY_WORDS] {
        &self.0
    }

    /// Word `i` of the key.
    pub fn word(&self, i: usize) -> u64 {
        self.0[i]
    }

    /// Byte `i` of the key in the big-endian view (byte 0 is the most
    /// significant byte of word 0).
    pub fn byte(&self, i: usize) -> u8 {
        self.0[i / 8].to_be_bytes()[i % 8]
    }

    /// Bit `i` of the key, bit 0 being the most significant.
    ///
    /// The routing tree indexes split bits this way: bit d decides the
    /// branch taken at depth d.
    pub fn bit(&self, i: usize) -> bool {
        (self.0[i / 64] >> (63 - (i % 64))) & 1 == 1
    }

    /// XOR distance to another key.
    pub fn distance(&self, other: &Key) -> Distance {
        let mut words = [0u64; KEY_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.0[i] ^ other.0[i];
        }
        Distance(words)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in &self.0 {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:08x}..)", self.0[0] >> 32)
    }
}

/// The XOR distance between two keys.
///
/// Ordering is derived from the word array and therefore compares
/// element-wise from the most significant word, matching the interpretation
/// of the XOR as a 256-bit unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Distance([u64; KEY_WORDS]);

impl Distance {
    /// The zero distance (`distance(a, a)`).
    pub const ZERO: Distance = Distance([0; KEY_WORDS]);

    /// Whether this is the zero distance.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; KEY_WORDS]
    }

    /// The underlying words, word 0 most significant.
    pub fn as_words(&self) -> &[u64; KEY_WORDS] {
        &self.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in &self.0 {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({self})")
    }
}
