//! Sync orchestration.
//!
//! `sync` resolves the source and target roots according to the mode, then
//! walks the source tree one directory level at a time:
//! - list both sides, drop excluded entries, sort directories first
//! - create missing directories and transfer missing or clearly changed
//!   files right away
//! - collect same-size pairs that need a checksum, resolve them in one batch
//!   per directory
//! - recurse into subdirectories
//! - optionally delete target-only entries, children before parents
//!
//! Any backend failure aborts the whole run.

use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::checksums::{self, ChecksumAlgorithm};
use crate::classify::{classify, ChangeVerdict};
use crate::error::EngineError;
use crate::filter::ExcludeFilter;
use crate::model::{JsyncMode, SyncResult, TypeConflict, VirtualPath};
use crate::progress::ProgressCallback;
use crate::vfs::VirtualFileSystem;

/// Immutable configuration for one sync call.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How the source root maps onto the target root
    pub mode: JsyncMode,

    /// Remove target entries that have no source counterpart
    pub delete: bool,

    /// Checksum every equal-size file pair instead of trusting mtimes
    pub ignore_times: bool,

    /// Replace target entries whose type (file vs directory) differs
    pub force: bool,

    /// Create missing parent directories of the target root
    pub parents: bool,

    /// Exclude patterns, see `filter` for the syntax
    pub exclude: Vec<String>,

    /// Checksum algorithms in order of preference
    pub preferred_checksums: Vec<ChecksumAlgorithm>,

    /// Raised by the caller to stop the run early
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            mode: JsyncMode::Merge,
            delete: false,
            ignore_times: false,
            force: false,
            parents: false,
            exclude: Vec::new(),
            preferred_checksums: ChecksumAlgorithm::ALL.to_vec(),
            cancel: None,
        }
    }
}

/// A file pair waiting for the batch checksum pass.
#[derive(Debug)]
struct DeferredPair {
    source: VirtualPath,
    target: VirtualPath,
    rel: String,
}

struct Syncer<'a> {
    source: &'a dyn VirtualFileSystem,
    target: &'a dyn VirtualFileSystem,
    options: &'a SyncOptions,
    filter: ExcludeFilter,
    progress: Option<&'a dyn ProgressCallback>,
    algorithm: Option<ChecksumAlgorithm>,
    result: SyncResult,
}

/// Make the tree at `target_path` on `target` match the tree at
/// `source_path` on `source`.
///
/// Relative paths are resolved against each backend's `pwd()`.
///
/// # Arguments
/// * `source` - Backend holding the source tree
/// * `source_path` - Source root (file or directory)
/// * `target` - Backend holding the target tree
/// * `target_path` - Target root, created if missing
/// * `options` - Mode and flags for this run
/// * `progress` - Optional observer
///
/// # Returns
/// The counters of everything the run did.
///
/// # Errors
/// `EngineError::NotFound` if the source root does not exist, and any
/// backend error encountered along the way. On error the target is in an
/// unknown state; run the sync again.
pub fn sync(
    source: &dyn VirtualFileSystem,
    source_path: &str,
    target: &dyn VirtualFileSystem,
    target_path: &str,
    options: &SyncOptions,
    progress: Option<&dyn ProgressCallback>,
) -> Result<SyncResult, EngineError> {
    let filter = ExcludeFilter::new(&options.exclude)?;
    let mut syncer = Syncer {
        source,
        target,
        options,
        filter,
        progress,
        algorithm: None,
        result: SyncResult::new(),
    };

    let span = tracing::info_span!("jsync", run_id = %syncer.result.run_id);
    let _guard = span.enter();

    if let Err(e) = syncer.run(source_path, target_path) {
        error!(error = %e, os_error = ?e.raw_os_error(), "Sync aborted");
        return Err(e);
    }
    Ok(syncer.result)
}

impl<'a> Syncer<'a> {
    fn run(&mut self, source_path: &str, target_path: &str) -> Result<(), EngineError> {
        self.check_cancelled()?;

        let source_path = absolute(self.source, source_path)?;
        let target_path = absolute(self.target, target_path)?;
        let src_root = self.source.stat(&source_path)?;

        let root_path = match self.options.mode {
            JsyncMode::Merge => target_path,
            JsyncMode::Nest => {
                if src_root.name().is_empty() {
                    return Err(EngineError::InvalidPath {
                        path: src_root.path(),
                        reason: "cannot nest a root without a name".to_string(),
                    });
                }
                self.ensure_dir(&target_path)?
                    .resolve(src_root.name(), src_root.is_dir())
                    .path()
            }
        };

        info!(
            source = %src_root,
            target = %root_path,
            mode = %self.options.mode,
            "Starting sync"
        );

        let existing = match self.target.stat(&root_path) {
            Ok(found) => Some(found),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if src_root.is_dir() {
            let tgt_root = match existing {
                Some(found) if found.is_dir() => found,
                Some(found) => {
                    self.replace_root(&found, true)?;
                    self.ensure_dir(&root_path)?
                }
                None => self.ensure_dir(&root_path)?,
            };
            if let Some(progress) = self.progress {
                progress.on_sync_started(&src_root, &tgt_root);
            }
            self.sync_dir(&src_root, &tgt_root, "")?;
        } else {
            let tgt_root = match existing {
                Some(found) if found.is_dir() => {
                    self.replace_root(&found, false)?;
                    VirtualPath::from_path(&root_path, false)
                }
                Some(found) => found,
                None => {
                    let missing = VirtualPath::from_path(&root_path, false);
                    if let Some(parent) = missing.parent() {
                        self.ensure_dir(&parent.path())?;
                    }
                    missing
                }
            };
            if let Some(progress) = self.progress {
                progress.on_sync_started(&src_root, &tgt_root);
            }
            let rel = src_root.name().to_string();
            if let Some(pair) = self.sync_file(&src_root, &tgt_root, rel)? {
                self.resolve_deferred(vec![pair])?;
            }
        }

        let r = &self.result;
        info!(
            files_created = r.files_created,
            files_updated = r.files_updated,
            files_deleted = r.files_deleted,
            dirs_created = r.dirs_created,
            dirs_deleted = r.dirs_deleted,
            checksums = r.checksums_computed,
            conflicts = r.conflicts.len(),
            "Sync complete"
        );
        if let Some(progress) = self.progress {
            progress.on_sync_completed(&self.result);
        }
        Ok(())
    }

    /// Compare one directory level, then recurse.
    fn sync_dir(
        &mut self,
        src_dir: &VirtualPath,
        tgt_dir: &VirtualPath,
        rel: &str,
    ) -> Result<(), EngineError> {
        self.check_cancelled()?;
        if let Some(progress) = self.progress {
            progress.on_dir_entered(rel);
        }
        debug!(dir = %src_dir, "Comparing directory");

        let mut src_children = self.list(self.source, src_dir, rel)?;
        src_children.retain(|child| {
            if is_symlink(child) {
                debug!(path = %child, "Skipping symbolic link");
                return false;
            }
            true
        });
        let tgt_children = self.list(self.target, tgt_dir, rel)?;

        let mut deferred = Vec::new();
        let mut subdirs = Vec::new();

        for src_child in &src_children {
            self.check_cancelled()?;
            let child_rel = join_rel(rel, src_child.name());

            let mut found = tgt_children
                .iter()
                .find(|t| t.name() == src_child.name())
                .cloned();

            if let Some(tgt_child) = found.as_ref() {
                if tgt_child.is_dir() != src_child.is_dir() {
                    if !self.options.force {
                        self.record_conflict(tgt_child, src_child.is_dir());
                        continue;
                    }
                    self.remove_entry(tgt_child, &child_rel)?;
                    found = None;
                }
            }

            match found {
                None if src_child.is_dir() => {
                    let created = tgt_dir.resolve(src_child.name(), true);
                    self.target.mkdir(&created)?;
                    self.result.dirs_created += 1;
                    debug!(path = %created, "Created directory");
                    subdirs.push((src_child.clone(), created, child_rel));
                }
                None => {
                    let created = tgt_dir.resolve(src_child.name(), false);
                    self.transfer(src_child, &created, &child_rel, true)?;
                }
                Some(tgt_child) if tgt_child.is_dir() => {
                    subdirs.push((src_child.clone(), tgt_child, child_rel));
                }
                Some(tgt_child) => {
                    if let Some(pair) = self.sync_file(src_child, &tgt_child, child_rel)? {
                        deferred.push(pair);
                    }
                }
            }
        }

        self.resolve_deferred(deferred)?;

        for (src_child, tgt_child, child_rel) in subdirs {
            self.sync_dir(&src_child, &tgt_child, &child_rel)?;
        }

        if self.options.delete {
            for tgt_child in &tgt_children {
                if src_children.iter().any(|s| s.name() == tgt_child.name()) {
                    continue;
                }
                self.check_cancelled()?;
                self.remove_entry(tgt_child, &join_rel(rel, tgt_child.name()))?;
            }
        }

        Ok(())
    }

    /// Decide what to do with a file pair. Returns the pair if it needs a
    /// checksum before a decision can be made.
    fn sync_file(
        &mut self,
        src: &VirtualPath,
        tgt: &VirtualPath,
        rel: String,
    ) -> Result<Option<DeferredPair>, EngineError> {
        if is_symlink(tgt) {
            // Replace the link itself; never checksum or stamp through it
            self.transfer(src, tgt, &rel, false)?;
            return Ok(None);
        }
        let verdict = classify(src, tgt)?;

        if verdict.content_modified() {
            self.transfer(src, tgt, &rel, verdict.missing)?;
            Ok(None)
        } else if verdict.deferred_processing(self.options.ignore_times) {
            debug!(rel = %rel, "Deferring until checksums are known");
            Ok(Some(DeferredPair {
                source: src.clone(),
                target: tgt.clone(),
                rel,
            }))
        } else {
            self.settle_stats(src, tgt, &verdict, &rel)?;
            Ok(None)
        }
    }

    /// Checksum every deferred pair in one call per side, then finish the
    /// per-file decision.
    fn resolve_deferred(&mut self, pairs: Vec<DeferredPair>) -> Result<(), EngineError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let algorithm = self.checksum_algorithm()?;

        let sources: Vec<VirtualPath> = pairs.iter().map(|p| p.source.clone()).collect();
        let targets: Vec<VirtualPath> = pairs.iter().map(|p| p.target.clone()).collect();

        let source_sums = self.source.cksums(&sources, algorithm)?;
        check_batch(pairs.len(), source_sums.len())?;
        self.result.checksums_computed += source_sums.len() as u64;

        let target_sums = self.target.cksums(&targets, algorithm)?;
        check_batch(pairs.len(), target_sums.len())?;
        self.result.checksums_computed += target_sums.len() as u64;

        debug!(pairs = pairs.len(), %algorithm, "Resolved deferred checksums");

        for ((mut pair, src_sum), tgt_sum) in pairs.into_iter().zip(source_sums).zip(target_sums) {
            debug!(
                rel = %pair.rel,
                source = %src_sum.to_string_with_algo(),
                target = %tgt_sum.to_string_with_algo(),
                "Checksums"
            );
            pair.source.set_checksum(src_sum);
            pair.target.set_checksum(tgt_sum);

            let verdict = classify(&pair.source, &pair.target)?;
            if verdict.content_modified() {
                self.transfer(&pair.source, &pair.target, &pair.rel, false)?;
            } else {
                self.settle_stats(&pair.source, &pair.target, &verdict, &pair.rel)?;
            }
        }
        Ok(())
    }

    /// Copy the whole content of `src` over `tgt` and carry the mtime over.
    fn transfer(
        &mut self,
        src: &VirtualPath,
        tgt: &VirtualPath,
        rel: &str,
        created: bool,
    ) -> Result<(), EngineError> {
        let modified = source_mtime(src)?;
        let source = self.source;
        let target = self.target;

        let mut reader = source.read_file(src)?;
        let bytes = target.write_file(reader.as_mut(), tgt)?;
        drop(reader);
        target.set_modified(tgt, modified)?;

        if created {
            self.result.files_created += 1;
        } else {
            self.result.files_updated += 1;
        }
        self.result.bytes_transferred += bytes;
        debug!(path = %tgt, bytes, created, "Transferred file");

        if let Some(progress) = self.progress {
            progress.on_file_transferred(rel, bytes, created);
        }
        Ok(())
    }

    /// Handle metadata differences on a pair whose content is identical.
    fn settle_stats(
        &mut self,
        src: &VirtualPath,
        tgt: &VirtualPath,
        verdict: &ChangeVerdict,
        rel: &str,
    ) -> Result<(), EngineError> {
        if !verdict.stat_modified() {
            return Ok(());
        }
        if verdict.timestamp_differs {
            self.target.set_modified(tgt, source_mtime(src)?)?;
            self.result.stats_updated += 1;
            debug!(rel = %rel, "Content identical; updated mtime");
        }
        if verdict.permissions_differ || verdict.ownership_differs {
            debug!(
                rel = %rel,
                permissions = verdict.permissions_differ,
                ownership = verdict.ownership_differs,
                "Metadata differs; not reconciled"
            );
        }
        Ok(())
    }

    /// Remove `entry` and, for a directory, everything below it, children
    /// first.
    fn remove_entry(&mut self, entry: &VirtualPath, rel: &str) -> Result<(), EngineError> {
        if entry.is_dir() {
            let target = self.target;
            for child in target.ls(entry)? {
                let child_rel = join_rel(rel, child.name());
                self.remove_entry(&child, &child_rel)?;
            }
            self.target.rmdir(entry)?;
            self.result.dirs_deleted += 1;
        } else {
            self.target.rm(entry)?;
            self.result.files_deleted += 1;
        }
        debug!(path = %entry, "Deleted");

        if let Some(progress) = self.progress {
            progress.on_entry_deleted(rel, entry.is_dir());
        }
        Ok(())
    }

    /// A sync root exists with the wrong type.
    fn replace_root(&mut self, found: &VirtualPath, source_is_dir: bool) -> Result<(), EngineError> {
        if !self.options.force {
            return Err(EngineError::TypeMismatch {
                path: found.path(),
                source_is_dir,
            });
        }
        warn!(path = %found, "Replacing target root of the wrong type");
        self.remove_entry(found, "")
    }

    fn record_conflict(&mut self, tgt: &VirtualPath, source_is_dir: bool) {
        warn!(
            path = %tgt,
            source_is_dir,
            "Type mismatch between source and target; leaving target untouched"
        );
        let conflict = TypeConflict {
            path: tgt.path(),
            source_is_dir,
        };
        if let Some(progress) = self.progress {
            progress.on_conflict(&conflict);
        }
        self.result.conflicts.push(conflict);
    }

    /// Make sure `path` is a directory on the target, creating it (and with
    /// `parents`, its ancestors) if missing.
    fn ensure_dir(&mut self, path: &str) -> Result<VirtualPath, EngineError> {
        match self.target.stat(path) {
            Ok(found) if found.is_dir() => return Ok(found),
            Ok(found) => {
                return Err(EngineError::DirectoryCreationFailed {
                    path: found.path(),
                    source: io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "path exists but is not a directory",
                    ),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let dir = VirtualPath::from_path(path, true);
        if let Some(parent) = dir.parent() {
            if self.options.parents {
                self.ensure_dir(&parent.path())?;
            } else {
                // Surfaces NotFound for the missing parent
                self.target.stat(&parent.path())?;
            }
        }

        self.target.mkdir(&dir)?;
        self.result.dirs_created += 1;
        debug!(path = %dir, "Created directory");
        self.target.stat(path)
    }

    /// List `dir`, drop excluded entries, sort directories first then by
    /// name.
    fn list(
        &self,
        fs: &dyn VirtualFileSystem,
        dir: &VirtualPath,
        rel: &str,
    ) -> Result<Vec<VirtualPath>, EngineError> {
        let mut children = fs.ls(dir)?;
        if !self.filter.is_empty() {
            children.retain(|child| {
                let excluded = self
                    .filter
                    .is_excluded(&join_rel(rel, child.name()), child.is_dir());
                if excluded {
                    debug!(path = %child, "Excluded");
                }
                !excluded
            });
        }
        children.sort_by(|a, b| {
            b.is_dir()
                .cmp(&a.is_dir())
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(children)
    }

    fn checksum_algorithm(&mut self) -> Result<ChecksumAlgorithm, EngineError> {
        if let Some(algorithm) = self.algorithm {
            return Ok(algorithm);
        }
        let algorithm = checksums::negotiate(
            &self.options.preferred_checksums,
            &self.source.supported_checksums(),
            &self.target.supported_checksums(),
        )
        .ok_or(EngineError::NoCommonChecksum)?;
        debug!(%algorithm, "Selected checksum algorithm");
        self.algorithm = Some(algorithm);
        Ok(algorithm)
    }

    fn check_cancelled(&self) -> Result<(), EngineError> {
        match &self.options.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(EngineError::Cancelled),
            _ => Ok(()),
        }
    }
}

fn source_mtime(src: &VirtualPath) -> Result<DateTime<Utc>, EngineError> {
    src.stats()
        .map(|s| s.modified)
        .ok_or_else(|| EngineError::MissingStats { path: src.path() })
}

fn check_batch(expected: usize, actual: usize) -> Result<(), EngineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EngineError::ChecksumBatchMismatch { expected, actual })
    }
}

fn is_symlink(path: &VirtualPath) -> bool {
    path.stats().map(|s| s.is_symlink()).unwrap_or(false)
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", rel, name)
    }
}

/// Resolve `path` against the backend's working directory unless it is
/// already absolute. `.` segments and trailing separators are dropped.
fn absolute(fs: &dyn VirtualFileSystem, path: &str) -> Result<String, EngineError> {
    if path.is_empty() {
        return Err(EngineError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let (mut joined, rest) = if path.starts_with('/') {
        (String::new(), path)
    } else if Path::new(path).is_absolute() {
        // Drive-prefixed host path such as `C:/data`
        match path.split_once('/') {
            Some((prefix, rest)) => (prefix.to_string(), rest),
            None => (path.to_string(), ""),
        }
    } else {
        let cwd = fs.pwd()?.path();
        (cwd.trim_end_matches('/').to_string(), path)
    };

    for segment in rest.split('/').filter(|s| !s.is_empty() && *s != ".") {
        joined.push('/');
        joined.push_str(segment);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    Ok(joined)
}
