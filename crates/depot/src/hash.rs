//! ContentHash: the hex digest that identifies a file's bytes.
//!
//! BLAKE3 is the default and is truncated to 128 bits (32 hex chars), the
//! same footprint as the MD5 digests upload systems traditionally store.
//! SHA-256 is available when a full-width digest is needed. MD5 and SHA-1
//! exist to stay comparable with hashes recorded by older upload stores.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{FilesystemError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// A content hash as lowercase hex.
///
/// Deserialization is transparent and does not validate, so entities loaded
/// from storage keep whatever hash string they were saved with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash data in one shot with the given algorithm.
    pub fn from_data(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash everything a reader yields, in fixed-size chunks.
    pub fn from_reader(algorithm: HashAlgorithm, reader: &mut dyn Read) -> Result<Self> {
        let mut hasher = ContentHasher::new(algorithm);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Digest algorithms the normalizer can hash uploads with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = FilesystemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "md5" => Ok(HashAlgorithm::Md5),
            _ => Err(FilesystemError::UnknownHashAlgorithm(s.to_string())),
        }
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum ContentHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
    Sha1(Sha1),
    Md5(Md5),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => ContentHasher::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => ContentHasher::Md5(Md5::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Blake3(hasher) => {
                hasher.update(data);
            }
            ContentHasher::Sha256(hasher) => hasher.update(data),
            ContentHasher::Sha1(hasher) => hasher.update(data),
            ContentHasher::Md5(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> ContentHash {
        match self {
            // Truncate to 16 bytes (128 bits)
            ContentHasher::Blake3(hasher) => {
                ContentHash(hex::encode(&hasher.finalize().as_bytes()[..16]))
            }
            ContentHasher::Sha256(hasher) => ContentHash(hex::encode(hasher.finalize())),
            ContentHasher::Sha1(hasher) => ContentHash(hex::encode(hasher.finalize())),
            ContentHasher::Md5(hasher) => ContentHash(hex::encode(hasher.finalize())),
        }
    }
}
