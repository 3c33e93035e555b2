//! # jsync Engine - Directory Tree Synchronization Library
//!
//! A headless engine that makes a target file tree match a source file tree,
//! in the spirit of a minimal `rsync`. Both trees are reached through the
//! `VirtualFileSystem` trait, so the same algorithm drives local disk,
//! in-memory trees, or any remote backend.
//!
//! ## Overview
//!
//! The engine compares one directory level at a time and:
//! - creates missing directories and copies missing files
//! - transfers files whose size differs right away
//! - batches checksum computation for same-size files that may have changed
//! - optionally deletes target entries with no source counterpart
//! - reports what it did in a `SyncResult` and through `ProgressCallback`
//!
//! Files are always transferred whole; there is no delta encoding.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use jsync_engine::{sync, JsyncMode, LocalFileSystem, SyncOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let local = LocalFileSystem::new();
//! let options = SyncOptions {
//!     mode: JsyncMode::Merge,
//!     delete: true,
//!     ..SyncOptions::default()
//! };
//!
//! let result = sync(&local, "/srv/site", &local, "/backup/site", &options, None)?;
//! println!(
//!     "{} created, {} updated, {} deleted",
//!     result.files_created, result.files_updated, result.files_deleted
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (VirtualPath, Stats, SyncResult, JsyncMode)
//! - **error**: Error types and handling
//! - **vfs**: The virtual filesystem trait
//! - **local_fs**: Host filesystem backend
//! - **memory_fs**: In-memory backend with an operation journal
//! - **classify**: Per-file change detection
//! - **filter**: Exclude patterns
//! - **sync**: The recursive sync algorithm
//! - **progress**: Progress callback trait
//! - **checksums**: Checksum algorithms and computation

pub mod model;
pub mod error;
pub mod vfs;
pub mod local_fs;
pub mod memory_fs;
pub mod classify;
pub mod filter;
pub mod sync;
pub mod progress;
pub mod checksums;

// Re-export main types and functions
pub use model::{JsyncMode, Stats, SyncResult, TypeConflict, VirtualPath};
pub use error::EngineError;
pub use vfs::VirtualFileSystem;
pub use local_fs::LocalFileSystem;
pub use memory_fs::{FsOp, JournalEntry, MemoryFileSystem};
pub use classify::{classify, ChangeVerdict};
pub use filter::ExcludeFilter;
pub use sync::{sync, SyncOptions};
pub use progress::ProgressCallback;
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
