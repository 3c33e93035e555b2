//! Exclude patterns.
//!
//! Patterns follow the usual rsync conventions:
//! - a pattern without `/` matches the entry name at any depth (`*.tmp`)
//! - a pattern containing `/` matches the path relative to the sync root
//!   (`build/*.o`, `/cache`); a leading `/` is accepted and ignored
//! - a trailing `/` restricts the pattern to directories (`target/`)
//!
//! `*` never crosses a `/`; use `**` for that.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::EngineError;

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    anchored: bool,
    dir_only: bool,
}

/// Compiled exclude list.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    rules: Vec<Rule>,
}

impl ExcludeFilter {
    /// Compile `patterns`.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPattern` for the first pattern that fails
    /// to compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, EngineError> {
        let mut rules = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let original = pattern.as_ref();
            let dir_only = original.len() > 1 && original.ends_with('/');
            let core = original.trim_end_matches('/');
            let anchored = core.contains('/');
            let core = core.trim_start_matches('/');

            if core.is_empty() {
                return Err(EngineError::InvalidPattern {
                    pattern: original.to_string(),
                    reason: "pattern is empty".to_string(),
                });
            }

            let glob = GlobBuilder::new(core)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|e| EngineError::InvalidPattern {
                    pattern: original.to_string(),
                    reason: e.to_string(),
                })?;

            rules.push(Rule {
                matcher: glob.compile_matcher(),
                anchored,
                dir_only,
            });
        }
        Ok(ExcludeFilter { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the entry at `rel` (relative to the sync root) is excluded.
    pub fn is_excluded(&self, rel: &str, is_dir: bool) -> bool {
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.rules.iter().any(|rule| {
            if rule.dir_only && !is_dir {
                return false;
            }
            if rule.anchored {
                rule.matcher.is_match(rel)
            } else {
                rule.matcher.is_match(name)
            }
        })
    }
}
