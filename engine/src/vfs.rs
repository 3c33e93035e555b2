//! The `VirtualFileSystem` trait.
//!
//! The engine only ever talks to storage through this trait, so the same
//! algorithm runs against local disk, an in-memory tree, or a remote
//! transport supplied by the caller.

use chrono::{DateTime, Utc};
use std::io::Read;

use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;
use crate::model::VirtualPath;

/// Storage backend consumed by the sync engine.
///
/// Implementations decide their own path syntax; the engine builds child
/// paths with `/` separators via `VirtualPath::resolve`.
pub trait VirtualFileSystem: Send + Sync {
    /// Current working directory, used to resolve relative roots.
    fn pwd(&self) -> Result<VirtualPath, EngineError>;

    /// Query existence, type and stats of an absolute path.
    ///
    /// Must fail with `EngineError::NotFound` if the path does not exist.
    /// Must not compute a checksum.
    fn stat(&self, path: &str) -> Result<VirtualPath, EngineError>;

    /// List the immediate children of `dir` with type, size and mtime.
    ///
    /// Order is unspecified; checksums must not be computed here. Symbolic
    /// links are reported as non-directory entries with `Stats::symlink`
    /// set and are never followed.
    fn ls(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, EngineError>;

    /// Create a single directory. The parent must exist.
    fn mkdir(&self, path: &VirtualPath) -> Result<(), EngineError>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &VirtualPath) -> Result<(), EngineError>;

    /// Remove a file or a symbolic link (never what it points to).
    fn rm(&self, path: &VirtualPath) -> Result<(), EngineError>;

    /// Open a file for reading its whole content.
    fn read_file<'a>(&'a self, path: &VirtualPath) -> Result<Box<dyn Read + 'a>, EngineError>;

    /// Replace the content of `path` with everything `reader` yields.
    ///
    /// Returns the number of bytes written. The parent must exist.
    fn write_file(&self, reader: &mut dyn Read, path: &VirtualPath) -> Result<u64, EngineError>;

    /// Set the modification time of `path`.
    fn set_modified(&self, path: &VirtualPath, modified: DateTime<Utc>) -> Result<(), EngineError>;

    /// Algorithms this backend can compute, in no particular order.
    fn supported_checksums(&self) -> Vec<ChecksumAlgorithm>;

    /// Compute `algorithm` for every path, returning one value per input in
    /// the same order.
    fn cksums(
        &self,
        paths: &[VirtualPath],
        algorithm: ChecksumAlgorithm,
    ) -> Result<Vec<ChecksumValue>, EngineError>;
}
