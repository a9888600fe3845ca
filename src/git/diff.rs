//! Diff statistics against a worktree's base commit
//!
//! Counts added/removed lines from raw diff output, excluding the
//! `+++`/`---` file header lines. Untracked files are staged with
//! intent-to-add first so brand-new files show up in the diff.

use serde::{Deserialize, Serialize};

use super::{run_git, Worktree};
use crate::error::Result;

/// Computed diff statistics for a worktree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffStats {
    /// Lines added
    pub added: usize,
    /// Lines removed
    pub removed: usize,
    /// The raw diff output
    pub content: String,
    /// Whether the content reflects uncommitted changes (vs. the last commit)
    #[serde(default)]
    pub is_uncommitted: bool,
}

impl DiffStats {
    /// Build stats from raw diff output, counting non-header +/- lines.
    pub fn from_content(content: String, is_uncommitted: bool) -> Self {
        let (added, removed) = count_changed_lines(&content);
        Self {
            added,
            removed,
            content,
            is_uncommitted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.content.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            "No changes".to_string()
        } else {
            format!("+{} -{}", self.added, self.removed)
        }
    }
}

impl Worktree {
    /// Diff the worktree against its base commit.
    ///
    /// Untracked files are staged intent-to-add first. A worktree whose base
    /// commit is not yet set (provisioning still in flight) yields empty
    /// stats rather than an error.
    pub async fn diff(&self) -> Result<DiffStats> {
        if self.base_commit_sha().is_empty() {
            return Ok(DiffStats::default());
        }

        run_git(self.path(), &["add", "-N", "."]).await?;
        let content = run_git(self.path(), &["diff", self.base_commit_sha()]).await?;

        Ok(DiffStats::from_content(content, true))
    }

    /// Prefer uncommitted changes; fall back to the last commit when clean.
    ///
    /// A clean worktree whose HEAD has a parent yields `HEAD^..HEAD`; a
    /// parentless HEAD yields the full show of HEAD.
    pub async fn diff_uncommitted_or_last_commit(&self) -> Result<DiffStats> {
        run_git(self.path(), &["add", "-N", "."]).await?;
        let uncommitted = run_git(self.path(), &["diff", "HEAD"]).await?;

        if !uncommitted.trim().is_empty() {
            return Ok(DiffStats::from_content(uncommitted, true));
        }

        let has_parent = run_git(self.path(), &["rev-parse", "--verify", "HEAD^"])
            .await
            .is_ok();

        let content = if has_parent {
            run_git(self.path(), &["diff", "HEAD^..HEAD"]).await?
        } else {
            run_git(self.path(), &["show", "HEAD"]).await?
        };

        Ok(DiffStats::from_content(content, false))
    }
}

/// Count `+`/`-` prefixed lines, excluding `+++`/`---` file headers.
fn count_changed_lines(diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;

    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }

    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_excludes_file_headers() {
        let diff = "\
diff --git a/a b/a
index e69de29..7898192 100644
--- a/a
+++ b/a
@@ -0,0 +1 @@
+hello
";
        let stats = DiffStats::from_content(diff.to_string(), true);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.removed, 0);
    }

    #[test]
    fn test_count_mixed_changes() {
        let diff = "\
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,3 @@
-old line
+new line
+another line
 context
";
        let (added, removed) = count_changed_lines(diff);
        assert_eq!(added, 2);
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_empty_stats() {
        let stats = DiffStats::default();
        assert!(stats.is_empty());
        assert_eq!(stats.summary(), "No changes");

        let stats = DiffStats::from_content(String::new(), true);
        assert!(stats.is_empty());
    }

    #[test]
    fn test_summary_with_changes() {
        let stats = DiffStats::from_content("+a\n-b\n+c\n".to_string(), false);
        assert_eq!(stats.summary(), "+2 -1");
        assert!(!stats.is_uncommitted);
    }
}
