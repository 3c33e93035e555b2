//! Error types for the sync engine.
//!
//! The primary error type is `EngineError`. Every backend failure is fatal for
//! the sync call that hit it; the engine never skips a failed entry and
//! carries on. Type mismatches found inside the tree are not errors, they are
//! recorded as conflicts in the `SyncResult`.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;

/// Errors raised by the engine and by `VirtualFileSystem` backends.
///
/// Paths are virtual paths (as understood by the backend that produced the
/// error), not host `PathBuf`s.
#[derive(Debug)]
pub enum EngineError {
    /// The path does not exist. Expected during root resolution, where it
    /// means "create fresh".
    NotFound { path: String },

    /// Source and target disagree on file vs directory at a sync root.
    TypeMismatch { path: String, source_is_dir: bool },

    /// Failed to query metadata for a path
    StatFailed { path: String, source: io::Error },

    /// Failed to list a directory
    EnumerationFailed { path: String, source: io::Error },

    /// Failed to create a directory
    DirectoryCreationFailed { path: String, source: io::Error },

    /// Failed to remove a file or directory
    RemoveFailed { path: String, source: io::Error },

    /// Failed to read from a file
    ReadError { path: String, source: io::Error },

    /// Failed to write to a file or update its metadata
    WriteError { path: String, source: io::Error },

    /// Failed to compute a checksum
    ChecksumFailed { path: String, source: io::Error },

    /// A path reached the classifier without stats. This is a caller bug.
    MissingStats { path: String },

    /// Source and target backends share no checksum algorithm from the
    /// preference list.
    NoCommonChecksum,

    /// A backend returned a different number of checksums than requested.
    ChecksumBatchMismatch { expected: usize, actual: usize },

    /// An exclude pattern failed to compile
    InvalidPattern { pattern: String, reason: String },

    /// Path is malformed for the backend
    InvalidPath { path: String, reason: String },

    /// The caller raised the cancellation flag
    Cancelled,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "No such file or directory: {}", path),
            Self::TypeMismatch { path, source_is_dir } => {
                let (src, dst) = if *source_is_dir {
                    ("directory", "file")
                } else {
                    ("file", "directory")
                };
                write!(
                    f,
                    "Type mismatch at {}: source is a {}, target is a {}",
                    path, src, dst
                )
            }
            Self::StatFailed { path, source } => {
                write!(f, "Failed to stat {}: {}", path, source)
            }
            Self::EnumerationFailed { path, source } => {
                write!(f, "Failed to list directory {}: {}", path, source)
            }
            Self::DirectoryCreationFailed { path, source } => {
                write!(f, "Failed to create directory {}: {}", path, source)
            }
            Self::RemoveFailed { path, source } => {
                write!(f, "Failed to remove {}: {}", path, source)
            }
            Self::ReadError { path, source } => {
                write!(f, "Failed to read file {}: {}", path, source)
            }
            Self::WriteError { path, source } => {
                write!(f, "Failed to write file {}: {}", path, source)
            }
            Self::ChecksumFailed { path, source } => {
                write!(f, "Failed to checksum {}: {}", path, source)
            }
            Self::MissingStats { path } => {
                write!(f, "Stats required but not populated for {}", path)
            }
            Self::NoCommonChecksum => {
                write!(f, "Source and target have no checksum algorithm in common")
            }
            Self::ChecksumBatchMismatch { expected, actual } => write!(
                f,
                "Checksum batch returned {} values for {} paths",
                actual, expected
            ),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "Invalid exclude pattern '{}': {}", pattern, reason)
            }
            Self::InvalidPath { path, reason } => {
                write!(f, "Invalid path: {} ({})", path, reason)
            }
            Self::Cancelled => write!(f, "Sync cancelled"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StatFailed { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::ChecksumFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::StatFailed { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::ChecksumFailed { source, .. } => source.raw_os_error().map(|e| e as u32),
            _ => None,
        }
    }

    /// True for the "path does not exist" signal returned by `stat`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Map an `io::Error` from a stat-like call, turning `NotFound` into the
    /// dedicated variant.
    pub fn from_stat(path: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_string(),
            }
        } else {
            Self::StatFailed {
                path: path.to_string(),
                source: err,
            }
        }
    }
}
