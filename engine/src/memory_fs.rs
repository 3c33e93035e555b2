//! In-memory `VirtualFileSystem`.
//!
//! Keeps the whole tree in a `BTreeMap` keyed by absolute path. Every
//! successful operation is appended to a journal, and individual operations
//! can be made to fail, which makes this backend suitable for asserting on
//! operation order and on error propagation.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::{Mutex, MutexGuard};

use crate::checksums::{compute_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;
use crate::model::{Stats, VirtualPath};
use crate::vfs::VirtualFileSystem;

/// Kind of operation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    Stat,
    Ls,
    Mkdir,
    Rmdir,
    Rm,
    Read,
    Write,
    SetModified,
    Checksum,
}

/// One journaled operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: FsOp,
    pub path: String,
}

#[derive(Debug, Clone)]
enum Node {
    Dir {
        modified: DateTime<Utc>,
    },
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
        permissions: Option<u32>,
    },
    Link {
        target: String,
        modified: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct State {
    nodes: BTreeMap<String, Node>,
    journal: Vec<JournalEntry>,
    failures: Vec<(FsOp, String)>,
    cwd: String,
}

/// A virtual filesystem held entirely in memory.
#[derive(Debug)]
pub struct MemoryFileSystem {
    state: Mutex<State>,
    checksums: Vec<ChecksumAlgorithm>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// An empty filesystem containing only `/`, supporting every algorithm.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                modified: DateTime::<Utc>::UNIX_EPOCH,
            },
        );
        MemoryFileSystem {
            state: Mutex::new(State {
                nodes,
                journal: Vec::new(),
                failures: Vec::new(),
                cwd: "/".to_string(),
            }),
            checksums: ChecksumAlgorithm::ALL.to_vec(),
        }
    }

    /// Restrict the algorithms reported by `supported_checksums`.
    pub fn with_checksums(mut self, algorithms: &[ChecksumAlgorithm]) -> Self {
        self.checksums = algorithms.to_vec();
        self
    }

    /// Change the directory returned by `pwd`.
    pub fn set_cwd(&self, path: &str) {
        let mut state = self.lock();
        state.cwd = normalize(path, "/");
    }

    /// Seed a directory, creating missing ancestors. Not journaled.
    pub fn add_dir(&self, path: &str) {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        for dir in ancestors_inclusive(&path) {
            state.nodes.entry(dir).or_insert(Node::Dir {
                modified: DateTime::<Utc>::UNIX_EPOCH,
            });
        }
    }

    /// Seed a file with an explicit mtime, creating missing ancestors. Not
    /// journaled.
    pub fn add_file(&self, path: &str, contents: impl AsRef<[u8]>, modified: DateTime<Utc>) {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        if let Some(parent) = parent_of(&path) {
            for dir in ancestors_inclusive(&parent) {
                state.nodes.entry(dir).or_insert(Node::Dir {
                    modified: DateTime::<Utc>::UNIX_EPOCH,
                });
            }
        }
        state.nodes.insert(
            path,
            Node::File {
                data: contents.as_ref().to_vec(),
                modified,
                permissions: None,
            },
        );
    }

    /// Seed a symbolic link pointing at `target`, creating missing
    /// ancestors. Not journaled.
    pub fn add_symlink(&self, path: &str, target: &str) {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        if let Some(parent) = parent_of(&path) {
            for dir in ancestors_inclusive(&parent) {
                state.nodes.entry(dir).or_insert(Node::Dir {
                    modified: DateTime::<Utc>::UNIX_EPOCH,
                });
            }
        }
        state.nodes.insert(
            path,
            Node::Link {
                target: target.to_string(),
                modified: DateTime::<Utc>::UNIX_EPOCH,
            },
        );
    }

    /// Whether `path` is a symbolic link.
    pub fn is_symlink(&self, path: &str) -> bool {
        let state = self.lock();
        matches!(
            state.nodes.get(&normalize(path, &state.cwd)),
            Some(Node::Link { .. })
        )
    }

    /// Set permission bits on an existing file.
    pub fn set_permissions(&self, path: &str, mode: u32) {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        if let Some(Node::File { permissions, .. }) = state.nodes.get_mut(&path) {
            *permissions = Some(mode);
        }
    }

    /// Make the next and all later `op` calls on `path` fail with
    /// `PermissionDenied`.
    pub fn fail_on(&self, op: FsOp, path: &str) {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        state.failures.push((op, path));
    }

    /// Content of a file, if `path` is a file.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        match state.nodes.get(&normalize(path, &state.cwd)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let state = self.lock();
        state.nodes.contains_key(&normalize(path, &state.cwd))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let state = self.lock();
        matches!(
            state.nodes.get(&normalize(path, &state.cwd)),
            Some(Node::Dir { .. })
        )
    }

    /// Modification time of an entry.
    pub fn modified(&self, path: &str) -> Option<DateTime<Utc>> {
        let state = self.lock();
        state
            .nodes
            .get(&normalize(path, &state.cwd))
            .map(|node| match node {
                Node::Dir { modified } | Node::File { modified, .. } | Node::Link { modified, .. } => {
                    *modified
                }
            })
    }

    /// Every path in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    /// Journal entries of one kind, in order.
    pub fn ops(&self, op: FsOp) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter(|entry| entry.op == op)
            .map(|entry| entry.path.clone())
            .collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn check(&self, op: FsOp, path: &str) -> io::Result<()> {
        if self.failures.iter().any(|(o, p)| *o == op && p == path) {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected {:?} failure", op),
            ))
        } else {
            Ok(())
        }
    }

    fn record(&mut self, op: FsOp, path: &str) {
        self.journal.push(JournalEntry {
            op,
            path: path.to_string(),
        });
    }

    fn require_dir(&self, path: &str) -> io::Result<()> {
        match self.nodes.get(path) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", path),
            )),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn require_parent_dir(&self, path: &str) -> io::Result<()> {
        match parent_of(path) {
            Some(parent) => self.require_dir(&parent),
            None => Err(io::Error::new(io::ErrorKind::Other, "root has no parent")),
        }
    }

    fn has_children(&self, dir: &str) -> bool {
        let prefix = child_prefix(dir);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .map(|(key, _)| key.starts_with(&prefix))
            .unwrap_or(false)
    }

    fn to_virtual(&self, path: &str, node: &Node) -> VirtualPath {
        match node {
            Node::Dir { modified } => {
                VirtualPath::from_path(path, true).with_stats(Stats::new(0, *modified))
            }
            Node::File {
                data,
                modified,
                permissions,
            } => {
                let mut stats = Stats::new(data.len() as u64, *modified);
                stats.permissions = *permissions;
                VirtualPath::from_path(path, false).with_stats(stats)
            }
            Node::Link { target, modified } => {
                let mut stats = Stats::new(target.len() as u64, *modified);
                stats.symlink = true;
                VirtualPath::from_path(path, false).with_stats(stats)
            }
        }
    }
}

impl VirtualFileSystem for MemoryFileSystem {
    fn pwd(&self) -> Result<VirtualPath, EngineError> {
        let cwd = self.lock().cwd.clone();
        self.stat(&cwd)
    }

    fn stat(&self, path: &str) -> Result<VirtualPath, EngineError> {
        let mut state = self.lock();
        let path = normalize(path, &state.cwd);
        state
            .check(FsOp::Stat, &path)
            .map_err(|e| EngineError::from_stat(&path, e))?;
        let found = state.nodes.get(&path).map(|node| state.to_virtual(&path, node));
        match found {
            Some(vpath) => {
                state.record(FsOp::Stat, &path);
                Ok(vpath)
            }
            None => Err(EngineError::NotFound { path }),
        }
    }

    fn ls(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, EngineError> {
        let mut state = self.lock();
        let path = normalize(&dir.path(), &state.cwd);
        let fail = |e| EngineError::EnumerationFailed {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::Ls, &path).map_err(fail)?;
        state.require_dir(&path).map_err(fail)?;

        let prefix = child_prefix(&path);
        let children = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, node)| state.to_virtual(key, node))
            .collect();
        state.record(FsOp::Ls, &path);
        Ok(children)
    }

    fn mkdir(&self, dir: &VirtualPath) -> Result<(), EngineError> {
        let mut state = self.lock();
        let path = normalize(&dir.path(), &state.cwd);
        let fail = |e| EngineError::DirectoryCreationFailed {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::Mkdir, &path).map_err(fail)?;
        state.require_parent_dir(&path).map_err(fail)?;
        if state.nodes.contains_key(&path) {
            return Err(fail(io::Error::from(io::ErrorKind::AlreadyExists)));
        }
        state
            .nodes
            .insert(path.clone(), Node::Dir { modified: Utc::now() });
        state.record(FsOp::Mkdir, &path);
        Ok(())
    }

    fn rmdir(&self, dir: &VirtualPath) -> Result<(), EngineError> {
        let mut state = self.lock();
        let path = normalize(&dir.path(), &state.cwd);
        let fail = |e| EngineError::RemoveFailed {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::Rmdir, &path).map_err(fail)?;
        state.require_dir(&path).map_err(fail)?;
        if state.has_children(&path) {
            return Err(fail(io::Error::new(
                io::ErrorKind::Other,
                "directory not empty",
            )));
        }
        state.nodes.remove(&path);
        state.record(FsOp::Rmdir, &path);
        Ok(())
    }

    fn rm(&self, file: &VirtualPath) -> Result<(), EngineError> {
        let mut state = self.lock();
        let path = normalize(&file.path(), &state.cwd);
        let fail = |e| EngineError::RemoveFailed {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::Rm, &path).map_err(fail)?;
        match state.nodes.get(&path) {
            Some(Node::File { .. }) | Some(Node::Link { .. }) => {}
            Some(Node::Dir { .. }) => {
                return Err(fail(io::Error::new(io::ErrorKind::Other, "is a directory")))
            }
            None => return Err(fail(io::Error::from(io::ErrorKind::NotFound))),
        }
        state.nodes.remove(&path);
        state.record(FsOp::Rm, &path);
        Ok(())
    }

    fn read_file<'a>(&'a self, file: &VirtualPath) -> Result<Box<dyn Read + 'a>, EngineError> {
        let mut state = self.lock();
        let path = normalize(&file.path(), &state.cwd);
        let fail = |e| EngineError::ReadError {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::Read, &path).map_err(fail)?;
        let data = match state.nodes.get(&path) {
            Some(Node::File { data, .. }) => data.clone(),
            Some(Node::Dir { .. }) => {
                return Err(fail(io::Error::new(io::ErrorKind::Other, "is a directory")))
            }
            Some(Node::Link { .. }) => return Err(fail(not_followed())),
            None => return Err(fail(io::Error::from(io::ErrorKind::NotFound))),
        };
        state.record(FsOp::Read, &path);
        Ok(Box::new(Cursor::new(data)))
    }

    fn write_file(&self, reader: &mut dyn Read, file: &VirtualPath) -> Result<u64, EngineError> {
        // Drain the reader before taking the lock; it may belong to this
        // same filesystem.
        let mut data = Vec::new();
        let read = reader.read_to_end(&mut data);

        let mut state = self.lock();
        let path = normalize(&file.path(), &state.cwd);
        let fail = |e| EngineError::WriteError {
            path: path.clone(),
            source: e,
        };
        read.map_err(fail)?;
        state.check(FsOp::Write, &path).map_err(fail)?;
        state.require_parent_dir(&path).map_err(fail)?;

        let permissions = match state.nodes.get(&path) {
            Some(Node::Dir { .. }) => {
                return Err(fail(io::Error::new(io::ErrorKind::Other, "is a directory")))
            }
            Some(Node::File { permissions, .. }) => *permissions,
            Some(Node::Link { .. }) | None => None,
        };
        let written = data.len() as u64;
        state.nodes.insert(
            path.clone(),
            Node::File {
                data,
                modified: Utc::now(),
                permissions,
            },
        );
        state.record(FsOp::Write, &path);
        Ok(written)
    }

    fn set_modified(&self, file: &VirtualPath, time: DateTime<Utc>) -> Result<(), EngineError> {
        let mut state = self.lock();
        let path = normalize(&file.path(), &state.cwd);
        let fail = |e| EngineError::WriteError {
            path: path.clone(),
            source: e,
        };
        state.check(FsOp::SetModified, &path).map_err(fail)?;
        match state.nodes.get_mut(&path) {
            Some(Node::Dir { modified })
            | Some(Node::File { modified, .. })
            | Some(Node::Link { modified, .. }) => *modified = time,
            None => return Err(fail(io::Error::from(io::ErrorKind::NotFound))),
        }
        state.record(FsOp::SetModified, &path);
        Ok(())
    }

    fn supported_checksums(&self) -> Vec<ChecksumAlgorithm> {
        self.checksums.clone()
    }

    fn cksums(
        &self,
        paths: &[VirtualPath],
        algorithm: ChecksumAlgorithm,
    ) -> Result<Vec<ChecksumValue>, EngineError> {
        let mut state = self.lock();
        let mut values = Vec::with_capacity(paths.len());
        for vpath in paths {
            let path = normalize(&vpath.path(), &state.cwd);
            let fail = |e| EngineError::ChecksumFailed {
                path: path.clone(),
                source: e,
            };
            state.check(FsOp::Checksum, &path).map_err(fail)?;
            if !self.checksums.contains(&algorithm) {
                return Err(fail(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{} not supported", algorithm),
                )));
            }
            let value = match state.nodes.get(&path) {
                Some(Node::File { data, .. }) => {
                    compute_checksum(&mut data.as_slice(), algorithm).map_err(fail)?
                }
                Some(Node::Dir { .. }) => {
                    return Err(fail(io::Error::new(io::ErrorKind::Other, "is a directory")))
                }
                Some(Node::Link { .. }) => return Err(fail(not_followed())),
                None => return Err(fail(io::Error::from(io::ErrorKind::NotFound))),
            };
            state.record(FsOp::Checksum, &path);
            values.push(value);
        }
        Ok(values)
    }
}

fn not_followed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "symbolic links are not followed")
}

/// Absolute, single-slash, no trailing slash (except `/` itself).
fn normalize(path: &str, cwd: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };
    let parts: Vec<&str> = joined
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir)
    }
}

fn ancestors_inclusive(path: &str) -> Vec<String> {
    let mut dirs = vec!["/".to_string()];
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        dirs.push(current.clone());
    }
    dirs
}
