//! MD5 content digests.
//!
//! MD5 is the digest the upload protocol runs on: clients declare it at
//! initiate time and the server recomputes it over the reassembled file.
//! It is a wire-compatibility requirement, not a security property.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An MD5 content digest represented as 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Md5Digest([u8; 16]);

impl Md5Digest {
    /// Create a new digest from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Compute the MD5 digest of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> Md5Hasher {
        Md5Hasher(Md5::new())
    }

    /// Parse from a 32-character hex string (case-insensitive).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 32 {
            return Err(crate::Error::InvalidDigest(format!(
                "expected 32 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidDigest(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidDigest(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental MD5 hasher.
pub struct Md5Hasher(Md5);

impl Md5Hasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Md5Digest {
        Md5Digest(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_roundtrip() {
        let digest = Md5Digest::compute(b"hello world!");
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 32);
        let parsed = Md5Digest::from_hex(&hex).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_known_vector() {
        // RFC 1321 test suite: MD5("abc")
        let digest = Md5Digest::compute(b"abc");
        assert_eq!(digest.to_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_from_hex_case_insensitive() {
        let lower = Md5Digest::from_hex("900150983cd24fb0d6963f7d28e17f72").unwrap();
        let upper = Md5Digest::from_hex("900150983CD24FB0D6963F7D28E17F72").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Md5Digest::from_hex("abc").is_err());
        assert!(Md5Digest::from_hex(&"g".repeat(32)).is_err());
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Md5Digest::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world!");
        assert_eq!(hasher.finalize(), Md5Digest::compute(b"hello world!"));
    }
}
