//! Git integration
//!
//! Hybrid approach: gitoxide answers read-side queries ([`backend`]),
//! the git CLI performs mutations (worktree add/remove, commits, merges).
//!
//! - [`backend`] - Read-only repository queries via gix
//! - [`worktree`] - Branch-specific checkout lifecycle
//! - [`diff`] - Diff statistics against a base commit
//! - [`sync`] - Batch update-from-mainline across instances
//! - [`names`] - Branch-name sanitization

mod backend;
mod diff;
mod names;
mod sync;
mod worktree;

pub use backend::*;
pub use diff::*;
pub use names::*;
pub use sync::*;
pub use worktree::*;

use std::path::Path;
use std::process::Stdio;

use crate::error::{GitError, Result};

/// Run a git command in `dir` and return its stdout.
///
/// Non-zero exit status maps to [`GitError::OperationFailed`] carrying the
/// command line and stderr.
pub(crate) async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GitError::OperationFailed(format!("git {}: {}", args.join(" "), e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(GitError::OperationFailed(format!(
            "git {}: {}",
            args.join(" "),
            stderr.trim()
        ))
        .into())
    }
}
