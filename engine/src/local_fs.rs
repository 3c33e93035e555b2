//! Local disk `VirtualFileSystem`.
//!
//! Virtual paths map one-to-one onto host paths. File writes go to a
//! uniquely named sibling temp file which is renamed over the destination
//! once fully written, so a failed transfer never leaves a truncated target.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;
use crate::model::{Stats, VirtualPath};
use crate::vfs::VirtualFileSystem;

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        LocalFileSystem
    }
}

/// Host path string with `/` separators.
fn virtual_string(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

fn host_path(path: &VirtualPath) -> PathBuf {
    PathBuf::from(path.path())
}

fn stats_from(metadata: &fs::Metadata) -> Stats {
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let size = if metadata.is_dir() { 0 } else { metadata.len() };
    #[allow(unused_mut)]
    let mut stats = Stats::new(size, modified);

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        stats.permissions = Some(metadata.mode() & 0o7777);
        stats.owner = Some(metadata.uid());
        stats.group = Some(metadata.gid());
    }

    stats
}

fn write_then_rename(reader: &mut dyn Read, tmp: &Path, dst: &Path) -> io::Result<u64> {
    let mut out = fs::File::create(tmp)?;
    let n = io::copy(reader, &mut out)?;
    out.sync_all()?;
    drop(out);
    fs::rename(tmp, dst)?;
    Ok(n)
}

impl VirtualFileSystem for LocalFileSystem {
    fn pwd(&self) -> Result<VirtualPath, EngineError> {
        let cwd = std::env::current_dir().map_err(|e| EngineError::StatFailed {
            path: ".".to_string(),
            source: e,
        })?;
        self.stat(&virtual_string(&cwd))
    }

    fn stat(&self, path: &str) -> Result<VirtualPath, EngineError> {
        let metadata = fs::metadata(path).map_err(|e| EngineError::from_stat(path, e))?;
        Ok(VirtualPath::from_path(path, metadata.is_dir()).with_stats(stats_from(&metadata)))
    }

    fn ls(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, EngineError> {
        let dir_path = host_path(dir);
        let fail = |e| EngineError::EnumerationFailed {
            path: dir.path(),
            source: e,
        };

        let mut children = Vec::new();
        for entry in fs::read_dir(&dir_path).map_err(fail)? {
            let entry = entry.map_err(fail)?;
            let entry_path = entry.path();

            // Never follow links: a link to a directory is a leaf, so
            // deleting it cannot reach outside the tree
            let file_type = entry.file_type().map_err(fail)?;
            let metadata = fs::symlink_metadata(&entry_path).map_err(fail)?;

            let name = entry.file_name().into_string().map_err(|raw| {
                EngineError::InvalidPath {
                    path: virtual_string(&entry_path),
                    reason: format!("name {:?} is not valid UTF-8", raw),
                }
            })?;

            let mut stats = stats_from(&metadata);
            stats.symlink = file_type.is_symlink();
            children.push(dir.resolve(&name, file_type.is_dir()).with_stats(stats));
        }
        Ok(children)
    }

    fn mkdir(&self, dir: &VirtualPath) -> Result<(), EngineError> {
        fs::create_dir(host_path(dir)).map_err(|e| EngineError::DirectoryCreationFailed {
            path: dir.path(),
            source: e,
        })
    }

    fn rmdir(&self, dir: &VirtualPath) -> Result<(), EngineError> {
        fs::remove_dir(host_path(dir)).map_err(|e| EngineError::RemoveFailed {
            path: dir.path(),
            source: e,
        })
    }

    fn rm(&self, file: &VirtualPath) -> Result<(), EngineError> {
        fs::remove_file(host_path(file)).map_err(|e| EngineError::RemoveFailed {
            path: file.path(),
            source: e,
        })
    }

    fn read_file<'a>(&'a self, file: &VirtualPath) -> Result<Box<dyn Read + 'a>, EngineError> {
        let handle = fs::File::open(host_path(file)).map_err(|e| EngineError::ReadError {
            path: file.path(),
            source: e,
        })?;
        Ok(Box::new(io::BufReader::new(handle)))
    }

    fn write_file(&self, reader: &mut dyn Read, file: &VirtualPath) -> Result<u64, EngineError> {
        let dst = host_path(file);
        let fail = |e| EngineError::WriteError {
            path: file.path(),
            source: e,
        };

        let parent = match dst.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = parent.join(format!(".{}.{}.jsync-tmp", file.name(), Uuid::new_v4().simple()));

        let written = write_then_rename(reader, &tmp, &dst);
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written.map_err(fail)
    }

    fn set_modified(&self, file: &VirtualPath, modified: DateTime<Utc>) -> Result<(), EngineError> {
        let mtime = filetime::FileTime::from_system_time(SystemTime::from(modified));
        filetime::set_file_mtime(host_path(file), mtime).map_err(|e| EngineError::WriteError {
            path: file.path(),
            source: e,
        })
    }

    fn supported_checksums(&self) -> Vec<ChecksumAlgorithm> {
        ChecksumAlgorithm::ALL.to_vec()
    }

    fn cksums(
        &self,
        paths: &[VirtualPath],
        algorithm: ChecksumAlgorithm,
    ) -> Result<Vec<ChecksumValue>, EngineError> {
        paths
            .iter()
            .map(|p| compute_file_checksum(&host_path(p), algorithm))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vroot(dir: &Path) -> VirtualPath {
        LocalFileSystem
            .stat(&virtual_string(dir))
            .expect("Failed to stat temp dir")
    }

    #[test]
    fn test_stat_file_and_missing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"0123456789").expect("Failed to write file");

        let vpath = LocalFileSystem
            .stat(&virtual_string(&file))
            .expect("Failed to stat");
        assert!(!vpath.is_dir());
        assert_eq!(vpath.name(), "a.txt");
        assert_eq!(vpath.stats().map(|s| s.size), Some(10));
        assert!(vpath.stats().and_then(|s| s.checksum.clone()).is_none());

        let missing = LocalFileSystem.stat(&virtual_string(&temp_dir.path().join("nope")));
        assert!(missing.expect_err("stat should fail").is_not_found());
    }

    #[test]
    fn test_ls_lists_children_with_types() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::create_dir(temp_dir.path().join("sub")).expect("Failed to create subdir");
        fs::write(temp_dir.path().join("f.txt"), b"data").expect("Failed to write file");

        let mut children = LocalFileSystem
            .ls(&vroot(temp_dir.path()))
            .expect("Failed to list");
        children.sort_by(|a, b| a.name().cmp(b.name()));

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name(), "f.txt");
        assert!(!children[0].is_dir());
        assert_eq!(children[0].stats().map(|s| s.size), Some(4));
        assert_eq!(children[1].name(), "sub");
        assert!(children[1].is_dir());
    }

    #[test]
    fn test_write_read_and_preserve_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = vroot(temp_dir.path());
        let target = root.resolve("out.txt", false);

        let mut data: &[u8] = b"test content";
        let written = LocalFileSystem
            .write_file(&mut data, &target)
            .expect("Failed to write");
        assert_eq!(written, 12);

        let mut content = String::new();
        LocalFileSystem
            .read_file(&target)
            .expect("Failed to open")
            .read_to_string(&mut content)
            .expect("Failed to read");
        assert_eq!(content, "test content");

        let when = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        LocalFileSystem
            .set_modified(&target, when)
            .expect("Failed to set mtime");
        let restat = LocalFileSystem.stat(&target.path()).expect("Failed to stat");
        assert_eq!(restat.stats().map(|s| s.modified.timestamp()), Some(when.timestamp()));

        // No temp files left behind
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .expect("Failed to read dir")
            .map(|e| e.expect("Failed to read entry").file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_write_into_missing_parent_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = vroot(temp_dir.path())
            .resolve("missing", true)
            .resolve("f.txt", false);
        let mut data: &[u8] = b"x";
        let result = LocalFileSystem.write_file(&mut data, &target);
        assert!(matches!(result, Err(EngineError::WriteError { .. })));
    }

    #[test]
    fn test_mkdir_rmdir_rm() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = vroot(temp_dir.path());
        let dir = root.resolve("d", true);
        LocalFileSystem.mkdir(&dir).expect("Failed to mkdir");
        fs::write(temp_dir.path().join("d").join("f"), b"1").expect("Failed to write");

        // Non-empty directory cannot be removed
        assert!(LocalFileSystem.rmdir(&dir).is_err());

        LocalFileSystem
            .rm(&dir.resolve("f", false))
            .expect("Failed to rm");
        LocalFileSystem.rmdir(&dir).expect("Failed to rmdir");
        assert!(!temp_dir.path().join("d").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_ls_reports_symlinks_as_leaves() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let outside = temp_dir.path().join("outside");
        fs::create_dir(&outside).expect("Failed to create dir");
        fs::write(outside.join("keep.txt"), b"keep").expect("Failed to write file");
        let tree = temp_dir.path().join("tree");
        fs::create_dir(&tree).expect("Failed to create dir");
        symlink(&outside, tree.join("dir-link")).expect("Failed to create symlink");
        symlink(&tree, tree.join("loop")).expect("Failed to create symlink");

        let mut children = LocalFileSystem.ls(&vroot(&tree)).expect("Failed to list");
        children.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(children.len(), 2);
        for child in &children {
            assert!(!child.is_dir(), "{} must not be a directory", child);
            assert!(child.stats().map(|s| s.is_symlink()).unwrap_or(false));
        }

        // Removing the link leaves its target alone
        LocalFileSystem.rm(&children[0]).expect("Failed to rm link");
        assert!(fs::symlink_metadata(tree.join("dir-link")).is_err());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn test_cksums_in_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a"), b"hello").expect("Failed to write");
        fs::write(temp_dir.path().join("b"), b"other").expect("Failed to write");
        let root = vroot(temp_dir.path());
        let paths = vec![root.resolve("b", false), root.resolve("a", false)];

        let sums = LocalFileSystem
            .cksums(&paths, ChecksumAlgorithm::Md5)
            .expect("Failed to checksum");
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[1].hex(), "5d41402abc4b2a76b9719d911017c592");
        assert_ne!(sums[0], sums[1]);
    }
}
