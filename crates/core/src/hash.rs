//! Content digests and upload fingerprints.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm clients use to fingerprint file content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the lowercase hex encoding.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Create an incremental hasher.
    pub fn hasher(&self) -> ContentHasher {
        match self {
            Self::Md5 => ContentHasher(HasherInner::Md5(Md5::new())),
            Self::Sha256 => ContentHasher(HasherInner::Sha256(Sha256::new())),
        }
    }

    /// Digest `data` in one shot, returning lowercase hex.
    pub fn compute(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(crate::Error::UnknownDigest(other.to_string())),
        }
    }
}

enum HasherInner {
    Md5(Md5),
    Sha256(Sha256),
}

/// Incremental hasher over the configured digest.
pub struct ContentHasher(HasherInner);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.0 {
            HasherInner::Md5(h) => h.update(data),
            HasherInner::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self.0 {
            HasherInner::Md5(h) => hex::encode(h.finalize()),
            HasherInner::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Identity of an upload session: the hex digest of the whole file.
///
/// Always stored lowercase so that staging keys do not depend on the case a
/// client happened to send.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse and normalize a client-supplied fingerprint.
    pub fn parse(s: &str, algorithm: DigestAlgorithm) -> crate::Result<Self> {
        let s = s.trim();
        if s.len() != algorithm.hex_len() {
            return Err(crate::Error::InvalidFingerprint(format!(
                "expected {} hex chars for {algorithm}, got {}",
                algorithm.hex_len(),
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidFingerprint(format!(
                "not a hex string: {s}"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a computed digest, ignoring case.
    pub fn matches(&self, digest: &str) -> bool {
        self.0.eq_ignore_ascii_case(digest)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        assert_eq!(
            DigestAlgorithm::Md5.compute(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = DigestAlgorithm::Sha256.hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize(),
            DigestAlgorithm::Sha256.compute(b"hello world")
        );
    }

    #[test]
    fn test_fingerprint_normalizes_case() {
        let fp = Fingerprint::parse("5EB63BBBE01EEED093CB22BB8F5ACDC3", DigestAlgorithm::Md5)
            .unwrap();
        assert_eq!(fp.as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(fp.matches("5EB63bbbe01eeed093cb22bb8f5acdc3"));
    }

    #[test]
    fn test_fingerprint_rejects_wrong_length_and_non_hex() {
        assert!(Fingerprint::parse("abc", DigestAlgorithm::Md5).is_err());
        assert!(Fingerprint::parse(&"z".repeat(32), DigestAlgorithm::Md5).is_err());
        // md5-length value under sha256 config
        assert!(
            Fingerprint::parse("5eb63bbbe01eeed093cb22bb8f5acdc3", DigestAlgorithm::Sha256)
                .is_err()
        );
    }

    #[test]
    fn test_digest_from_str() {
        assert_eq!("MD5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert_eq!(
            "sha256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }
}
