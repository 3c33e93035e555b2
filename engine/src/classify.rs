//! Change classification between a source path and a target path.
//!
//! `classify` never touches a backend: it only compares stats that are
//! already populated. Checksums take part only once both sides carry one.

use crate::error::EngineError;
use crate::model::VirtualPath;

/// Structured comparison of one source/target pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeVerdict {
    /// Target does not exist
    pub missing: bool,
    pub size_differs: bool,
    /// Modification times differ at whole-second resolution
    pub timestamp_differs: bool,
    pub permissions_differ: bool,
    pub ownership_differs: bool,
    /// `None` until both sides have a checksum; `Some(true)` means differs
    pub checksum: Option<bool>,
}

impl ChangeVerdict {
    /// A transfer is required right away.
    pub fn content_modified(&self) -> bool {
        self.missing || self.size_differs || self.checksum == Some(true)
    }

    /// The pair cannot be decided without a checksum.
    pub fn deferred_processing(&self, ignore_times: bool) -> bool {
        !self.missing
            && !self.size_differs
            && (ignore_times || self.timestamp_differs)
            && self.checksum.is_none()
    }

    /// Some piece of metadata differs.
    pub fn stat_modified(&self) -> bool {
        self.missing || self.timestamp_differs || self.permissions_differ || self.ownership_differs
    }
}

/// Compare `source` against `target`.
///
/// # Errors
/// Returns `EngineError::MissingStats` if the source has no stats. Source
/// paths always come from `ls` or `stat`, so this indicates a bug in the
/// caller.
pub fn classify(source: &VirtualPath, target: &VirtualPath) -> Result<ChangeVerdict, EngineError> {
    let src = source.stats().ok_or_else(|| EngineError::MissingStats {
        path: source.path(),
    })?;

    let dst = match target.stats() {
        Some(stats) => stats,
        None => {
            // Nothing to compare against
            return Ok(ChangeVerdict {
                missing: true,
                size_differs: true,
                timestamp_differs: true,
                permissions_differ: false,
                ownership_differs: false,
                checksum: None,
            });
        }
    };

    let checksum = match (&src.checksum, &dst.checksum) {
        (Some(a), Some(b)) if a.algorithm() == b.algorithm() => Some(a.hex() != b.hex()),
        _ => None,
    };

    Ok(ChangeVerdict {
        missing: false,
        size_differs: src.size != dst.size,
        timestamp_differs: src.modified.timestamp() != dst.modified.timestamp(),
        permissions_differ: known_differ(src.permissions, dst.permissions),
        ownership_differs: known_differ(src.owner, dst.owner)
            || known_differ(src.group, dst.group),
        checksum,
    })
}

fn known_differ(a: Option<u32>, b: Option<u32>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}
