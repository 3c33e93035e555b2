//! Core data model for sync runs.
//!
//! This module defines the main data structures:
//! - VirtualPath / Stats: a location inside a virtual filesystem and its metadata
//! - JsyncMode: how the source root maps onto the target root
//! - SyncResult / TypeConflict: what a sync run did

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksums::ChecksumValue;

/// Metadata for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time
    pub modified: DateTime<Utc>,

    /// Content checksum, populated only by an explicit `cksums` call
    pub checksum: Option<ChecksumValue>,

    /// Permission bits, when the backend exposes them
    pub permissions: Option<u32>,

    /// Owning user id
    pub owner: Option<u32>,

    /// Owning group id
    pub group: Option<u32>,

    /// The entry is a symbolic link. Links are never followed; `size` and
    /// `modified` describe the link itself.
    pub symlink: bool,
}

impl Stats {
    /// Stats with only size and mtime known.
    pub fn new(size: u64, modified: DateTime<Utc>) -> Self {
        Stats {
            size,
            modified,
            checksum: None,
            permissions: None,
            owner: None,
            group: None,
            symlink: false,
        }
    }

    /// True for a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.symlink
    }
}

/// An immutable descriptor of a location within a virtual filesystem.
///
/// `stats == None` means the path has not been queried yet. A path that was
/// queried and found missing is never materialized: `stat` fails with
/// `EngineError::NotFound` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    parent: Option<String>,
    name: String,
    is_dir: bool,
    stats: Option<Stats>,
}

impl VirtualPath {
    /// Build a path from its absolute string form, e.g. `/srv/data/a.txt`.
    ///
    /// Trailing separators are ignored. `/` itself becomes a root with an
    /// empty name.
    pub fn from_path(path: &str, is_dir: bool) -> Self {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => {
                let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
                VirtualPath {
                    parent: Some(parent.to_string()),
                    name: trimmed[idx + 1..].to_string(),
                    is_dir,
                    stats: None,
                }
            }
            None => VirtualPath {
                parent: None,
                name: trimmed.to_string(),
                is_dir,
                stats: None,
            },
        }
    }

    /// Construct a hypothetical child that may not exist yet.
    pub fn resolve(&self, name: &str, is_dir: bool) -> VirtualPath {
        VirtualPath {
            parent: Some(self.path()),
            name: name.to_string(),
            is_dir,
            stats: None,
        }
    }

    /// Attach stats, consuming the path.
    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Final path segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this path denotes a directory
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Stats if they have been populated
    pub fn stats(&self) -> Option<&Stats> {
        self.stats.as_ref()
    }

    /// Record a freshly computed checksum. Has no effect on a path without
    /// stats.
    pub fn set_checksum(&mut self, checksum: ChecksumValue) {
        if let Some(stats) = self.stats.as_mut() {
            stats.checksum = Some(checksum);
        }
    }

    /// The logical parent directory, without stats.
    pub fn parent(&self) -> Option<VirtualPath> {
        self.parent
            .as_deref()
            .map(|parent| VirtualPath::from_path(parent, true))
    }

    /// Absolute path string.
    pub fn path(&self) -> String {
        match self.parent.as_deref() {
            None if self.name.is_empty() => "/".to_string(),
            None => self.name.clone(),
            Some(parent) if parent.ends_with('/') => format!("{}{}", parent, self.name),
            Some(parent) => format!("{}/{}", parent, self.name),
        }
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// How the source root maps onto the target root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsyncMode {
    /// The source becomes a named child of the target directory
    Nest,
    /// The source's children land directly in the target, or a source file
    /// replaces the target file
    #[default]
    Merge,
}

impl JsyncMode {
    /// Parse mode from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nest" => Some(JsyncMode::Nest),
            "merge" => Some(JsyncMode::Merge),
            _ => None,
        }
    }
}

impl std::fmt::Display for JsyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsyncMode::Nest => write!(f, "nest"),
            JsyncMode::Merge => write!(f, "merge"),
        }
    }
}

/// A name present on both sides with different types, left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeConflict {
    /// Target path of the conflicting entry
    pub path: String,
    /// True if the source entry is a directory (and the target a file)
    pub source_is_dir: bool,
}

/// Counters accumulated over one sync run.
///
/// Owned by a single `sync` call. Counters only cover operations that
/// completed; when `sync` fails the caller never sees this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Identifier of this run, also attached to its log lines
    pub run_id: Uuid,
    pub checksums_computed: u64,
    pub files_created: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub dirs_created: u64,
    pub dirs_deleted: u64,
    /// Target files whose mtime was fixed without a content transfer
    pub stats_updated: u64,
    pub bytes_transferred: u64,
    pub conflicts: Vec<TypeConflict>,
}

impl SyncResult {
    pub fn new() -> Self {
        SyncResult {
            run_id: Uuid::new_v4(),
            checksums_computed: 0,
            files_created: 0,
            files_updated: 0,
            files_deleted: 0,
            dirs_created: 0,
            dirs_deleted: 0,
            stats_updated: 0,
            bytes_transferred: 0,
            conflicts: Vec::new(),
        }
    }

    /// True when the run created, updated and deleted nothing.
    pub fn is_noop(&self) -> bool {
        self.files_created == 0
            && self.files_updated == 0
            && self.files_deleted == 0
            && self.dirs_created == 0
            && self.dirs_deleted == 0
    }
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::new()
    }
}
