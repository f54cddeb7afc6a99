//! Checksum utilities used by the replica manager and the single-file KVS
//! backend's integrity validation.

use serde_derive::{Deserialize, Serialize};

/// Selects which digest the replica manager and metadata use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumType {
    Crc32,
    Sha256,
}

impl ChecksumType {
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Crc32 => 8,
            ChecksumType::Sha256 => 64,
        }
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumType::Crc32 => write!(f, "CRC32"),
            ChecksumType::Sha256 => write!(f, "SHA256"),
        }
    }
}

impl std::str::FromStr for ChecksumType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(ChecksumType::Crc32),
            "SHA256" => Ok(ChecksumType::Sha256),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown checksum type: {}",
                other
            ))),
        }
    }
}

/// Computes the hex-encoded checksum of `data` using `kind`. Deterministic:
/// the same bytes always produce the same string.
pub fn checksum(kind: ChecksumType, data: &[u8]) -> String {
    match kind {
        ChecksumType::Crc32 => crc32_hex(data),
        ChecksumType::Sha256 => sha256_hex(data),
    }
}

/// CRC32 (IEEE) over `data`, hex-encoded as 8 lowercase characters.
pub fn crc32_hex(data: &[u8]) -> String {
    let value = crc32fast::hash(data);
    hex::encode(value.to_be_bytes())
}

/// SHA-256 over `data`, hex-encoded as 64 lowercase characters.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
