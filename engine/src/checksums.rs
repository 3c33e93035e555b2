//! Checksum computation.
//!
//! This module provides:
//! - Multiple checksum algorithms (CRC32, MD5, SHA-256, BLAKE3)
//! - Streaming checksum computation over any reader
//! - Algorithm negotiation between two backends

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC32 (fast, 32-bit)
    Crc32,
    /// MD5 (deprecated, but widely available on remote hosts)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc32 => write!(f, "crc32"),
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Every algorithm this crate can compute.
    pub const ALL: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::Blake3,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Crc32,
    ];

    /// Parse algorithm from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "crc32" => Some(Self::Crc32),
            "md5" => Some(Self::Md5),
            "sha256" | "sha-256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }

    /// Parse a comma-separated preference list such as `"md5,crc32"`.
    ///
    /// Duplicates are dropped, keeping the first occurrence. Returns `None`
    /// if any entry is unknown or the list is empty.
    pub fn parse_list(s: &str) -> Option<Vec<Self>> {
        let mut algorithms = Vec::new();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let algo = Self::from_str(part)?;
            if !algorithms.contains(&algo) {
                algorithms.push(algo);
            }
        }
        if algorithms.is_empty() {
            None
        } else {
            Some(algorithms)
        }
    }
}

/// Pick the first algorithm in `preferred` that both sides can compute.
pub fn negotiate(
    preferred: &[ChecksumAlgorithm],
    source: &[ChecksumAlgorithm],
    target: &[ChecksumAlgorithm],
) -> Option<ChecksumAlgorithm> {
    preferred
        .iter()
        .copied()
        .find(|algo| source.contains(algo) && target.contains(algo))
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    /// Get the algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

const CRC32_POLY: u32 = 0xedb8_8320;

fn crc32_feed(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (CRC32_POLY & mask);
        }
    }
    crc
}

/// Incremental digest state for one algorithm.
///
/// Implements `io::Write`, so a whole stream can be hashed with `io::copy`.
pub enum StreamHasher {
    Crc32(u32),
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Crc32 => StreamHasher::Crc32(!0),
            ChecksumAlgorithm::Md5 => StreamHasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => StreamHasher::Sha256(sha2::Sha256::default()),
            ChecksumAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            StreamHasher::Crc32(_) => ChecksumAlgorithm::Crc32,
            StreamHasher::Md5(_) => ChecksumAlgorithm::Md5,
            StreamHasher::Sha256(_) => ChecksumAlgorithm::Sha256,
            StreamHasher::Blake3(_) => ChecksumAlgorithm::Blake3,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Crc32(crc) => *crc = crc32_feed(*crc, data),
            StreamHasher::Md5(ctx) => ctx.consume(data),
            StreamHasher::Sha256(state) => sha2::Digest::update(state, data),
            StreamHasher::Blake3(state) => {
                state.update(data);
            }
        }
    }

    /// Consume the state and produce the lowercase hex digest.
    pub fn finish(self) -> ChecksumValue {
        let algorithm = self.algorithm();
        let hex = match self {
            StreamHasher::Crc32(crc) => format!("{:08x}", !crc),
            StreamHasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            StreamHasher::Sha256(state) => format!("{:x}", sha2::Digest::finalize(state)),
            StreamHasher::Blake3(state) => state.finalize().to_hex().to_string(),
        };
        ChecksumValue::new(algorithm, hex)
    }
}

impl io::Write for StreamHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.feed(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compute a checksum over everything `reader` yields.
pub fn compute_checksum<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: ChecksumAlgorithm,
) -> io::Result<ChecksumValue> {
    let mut hasher = StreamHasher::new(algorithm);
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finish())
}

/// Compute checksum for a file on the host filesystem
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let mut file = std::fs::File::open(path).map_err(|e| EngineError::ChecksumFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    compute_checksum(&mut file, algorithm).map_err(|e| EngineError::ChecksumFailed {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
        let mut hasher = StreamHasher::new(algorithm);
        hasher.feed(data);
        hasher.finish()
    }

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Crc32.to_string(), "crc32");
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(ChecksumAlgorithm::from_str("crc32"), Some(ChecksumAlgorithm::Crc32));
        assert_eq!(ChecksumAlgorithm::from_str("MD5"), Some(ChecksumAlgorithm::Md5));
        assert_eq!(ChecksumAlgorithm::from_str("sha256"), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_str("blake3"), Some(ChecksumAlgorithm::Blake3));
        assert_eq!(ChecksumAlgorithm::from_str("invalid"), None);
    }

    #[test]
    fn test_parse_list_keeps_order_and_drops_duplicates() {
        assert_eq!(
            ChecksumAlgorithm::parse_list("md5, crc32,md5"),
            Some(vec![ChecksumAlgorithm::Md5, ChecksumAlgorithm::Crc32])
        );
        assert_eq!(ChecksumAlgorithm::parse_list("md5,sha1"), None);
        assert_eq!(ChecksumAlgorithm::parse_list(""), None);
    }

    #[test]
    fn test_negotiate_picks_first_shared() {
        let preferred = [ChecksumAlgorithm::Blake3, ChecksumAlgorithm::Md5];
        let source = [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Blake3];
        let target = [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Crc32];
        assert_eq!(
            negotiate(&preferred, &source, &target),
            Some(ChecksumAlgorithm::Md5)
        );
        assert_eq!(negotiate(&[ChecksumAlgorithm::Sha256], &source, &target), None);
    }

    #[test]
    fn test_crc32_known_value() {
        let checksum = digest(ChecksumAlgorithm::Crc32, b"hello");
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Crc32);
        assert_eq!(checksum.hex(), "3610a686");
    }

    #[test]
    fn test_crc32_incremental_matches_single_update() {
        let mut hasher = StreamHasher::new(ChecksumAlgorithm::Crc32);
        hasher.feed(b"hel");
        hasher.feed(b"lo");
        assert_eq!(hasher.algorithm(), ChecksumAlgorithm::Crc32);
        assert_eq!(hasher.finish(), digest(ChecksumAlgorithm::Crc32, b"hello"));
    }

    #[test]
    fn test_md5_hasher() {
        let checksum = digest(ChecksumAlgorithm::Md5, b"hello");
        assert_eq!(checksum.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_sha256_hasher() {
        let checksum = digest(ChecksumAlgorithm::Sha256, b"hello");
        assert_eq!(
            checksum.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_blake3_hasher() {
        let checksum = digest(ChecksumAlgorithm::Blake3, b"hello");
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Blake3);
        assert_eq!(checksum.hex(), blake3::hash(b"hello").to_hex().to_string());
    }

    #[test]
    fn test_compute_checksum_over_reader() {
        let mut reader: &[u8] = b"hello";
        let checksum = compute_checksum(&mut reader, ChecksumAlgorithm::Md5)
            .expect("Failed to checksum reader");
        assert_eq!(checksum.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_compute_file_checksum() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file.txt");
        std::fs::write(&path, b"hello").expect("Failed to write file");

        let checksum =
            compute_file_checksum(&path, ChecksumAlgorithm::Sha256).expect("Failed to checksum");
        assert_eq!(checksum, digest(ChecksumAlgorithm::Sha256, b"hello"));

        let missing = compute_file_checksum(&temp_dir.path().join("nope"), ChecksumAlgorithm::Md5);
        assert!(matches!(missing, Err(EngineError::ChecksumFailed { .. })));
    }

    #[test]
    fn test_checksum_value_display() {
        let cs = ChecksumValue::new(ChecksumAlgorithm::Sha256, "abc123".to_string());
        assert_eq!(cs.to_string(), "abc123");
        assert_eq!(cs.to_string_with_algo(), "sha256:abc123");
    }
}
