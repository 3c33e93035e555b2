//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the sync
//! engine from any specific UI technology. The CLI implements it for stderr
//! output; tests implement it to record the order of operations.

use crate::model::{SyncResult, TypeConflict, VirtualPath};

/// Trait for receiving progress updates from a sync run.
///
/// All methods are called synchronously from the thread running `sync`.
/// `rel` arguments are paths relative to the sync root, `/`-separated, with
/// no leading separator.
pub trait ProgressCallback: Send {
    /// Called once the source and target roots are resolved.
    fn on_sync_started(&self, source: &VirtualPath, target: &VirtualPath);

    /// Called before a directory pair is compared.
    fn on_dir_entered(&self, rel: &str);

    /// Called after a file has been written to the target.
    ///
    /// `created` is false when an existing target file was replaced.
    fn on_file_transferred(&self, rel: &str, bytes: u64, created: bool);

    /// Called after a target entry has been removed.
    fn on_entry_deleted(&self, rel: &str, is_dir: bool);

    /// Called when an entry is skipped because its type differs.
    fn on_conflict(&self, conflict: &TypeConflict);

    /// Called when the run finishes successfully.
    fn on_sync_completed(&self, result: &SyncResult);
}
