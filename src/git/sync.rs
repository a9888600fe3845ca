//! Batch update-from-mainline across instance worktrees
//!
//! Fetches the remote default branch and merges it into an instance's branch,
//! optionally refreshing submodules. Dirty worktrees are stashed around the
//! merge under a known label. Known limitation: a failed stash pop leaves the
//! stash in place and is reported as a warning, not a sync failure.

use std::path::Path;
use std::process::Stdio;

use tracing::{debug, info, instrument, warn};

use super::{run_git, GitBackend, Worktree};
use crate::error::Result;

/// Stash label prefix used around sync merges.
const STASH_LABEL_PREFIX: &str = "squadron-sync";

/// Options controlling a sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Merge the remote default branch into each instance branch
    pub pull_main: bool,
    /// Refresh submodules recursively
    pub update_submodules: bool,
    /// On merge conflict, retry preferring our side and commit the resolution
    pub auto_resolve: bool,
    /// Commit message used for auto-resolved merges
    pub resolve_message: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            pull_main: true,
            update_submodules: false,
            auto_resolve: false,
            resolve_message: "merge mainline (auto-resolved, ours preferred)".to_string(),
        }
    }
}

/// Per-instance outcome of a sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Branch the sync ran against
    pub branch: String,
    /// The pass completed without a hard failure
    pub success: bool,
    /// The merge brought in mainline commits
    pub updated_from_main: bool,
    /// Submodules were refreshed
    pub updated_submodule: bool,
    /// The merge hit conflicts
    pub conflicts: bool,
    /// Conflicts were auto-resolved preferring our side
    pub conflicts_resolved: bool,
    /// Human-readable notes (warnings land here)
    pub message: String,
    /// Hard failure description, if any
    pub error: Option<String>,
}

impl SyncStatus {
    fn failed(branch: &str, error: String) -> Self {
        Self {
            branch: branch.to_string(),
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }

    fn note(&mut self, msg: &str) {
        if !self.message.is_empty() {
            self.message.push_str("; ");
        }
        self.message.push_str(msg);
    }
}

/// Run a sync pass over one worktree.
///
/// Never returns `Err`; all failures are folded into the returned status so a
/// batch over many instances reports per-instance outcomes.
#[instrument(skip(worktree, opts), fields(branch = %worktree.branch()))]
pub async fn sync_worktree(worktree: &Worktree, opts: &SyncOptions) -> SyncStatus {
    let branch = worktree.branch().to_string();
    let dir = worktree.path();

    let mut status = SyncStatus {
        branch: branch.clone(),
        success: true,
        ..Default::default()
    };

    let dirty = match worktree.is_dirty().await {
        Ok(d) => d,
        Err(e) => return SyncStatus::failed(&branch, format!("dirty check failed: {e}")),
    };

    let stash_label = format!("{STASH_LABEL_PREFIX}-{}", branch.replace('/', "-"));
    if dirty {
        debug!("Worktree dirty, stashing as {}", stash_label);
        if let Err(e) = run_git(dir, &["stash", "push", "-m", &stash_label]).await {
            return SyncStatus::failed(&branch, format!("stash failed: {e}"));
        }
    }

    if opts.pull_main {
        merge_mainline(worktree, opts, &mut status).await;
    }

    if status.success && opts.update_submodules {
        update_submodules(dir, &mut status).await;
    }

    if dirty {
        // Pop regardless of the merge outcome; a pop failure leaves the
        // stash in place and downgrades to a warning.
        if let Err(e) = run_git(dir, &["stash", "pop"]).await {
            warn!("Stash pop failed on {}: {}", branch, e);
            status.note(&format!("stash '{stash_label}' was not restored: {e}"));
        }
    }

    status
}

async fn merge_mainline(worktree: &Worktree, opts: &SyncOptions, status: &mut SyncStatus) {
    let dir = worktree.path();

    let default_branch = match detect_remote_default_branch(worktree).await {
        Ok(b) => b,
        Err(e) => {
            status.success = false;
            status.error = Some(format!("could not detect remote default branch: {e}"));
            return;
        }
    };

    if let Err(e) = run_git(dir, &["fetch", "origin", &default_branch]).await {
        status.success = false;
        status.error = Some(format!("fetch failed: {e}"));
        return;
    }

    let merge_ref = format!("origin/{default_branch}");
    match git_merge(dir, &[&merge_ref]).await {
        MergeOutcome::Clean(output) => {
            status.updated_from_main = !output.contains("Already up to date");
            if status.updated_from_main {
                info!("Merged {} into {}", merge_ref, status.branch);
            }
        }
        MergeOutcome::Conflict => {
            status.conflicts = true;
            let _ = run_git(dir, &["merge", "--abort"]).await;

            if opts.auto_resolve {
                match git_merge(dir, &["-X", "ours", "-m", &opts.resolve_message, &merge_ref])
                    .await
                {
                    MergeOutcome::Clean(_) => {
                        status.conflicts_resolved = true;
                        status.updated_from_main = true;
                        info!("Auto-resolved conflicts on {}", status.branch);
                    }
                    MergeOutcome::Conflict => {
                        status.success = false;
                        status.error =
                            Some("auto-resolve merge still hit conflicts".to_string());
                    }
                    MergeOutcome::Failed(e) => {
                        status.success = false;
                        status.error = Some(format!("auto-resolve merge failed: {e}"));
                    }
                }
            } else {
                status.success = false;
                status.error = Some(format!(
                    "merge of '{merge_ref}' into '{}' hit conflicts",
                    status.branch
                ));
            }
        }
        MergeOutcome::Failed(e) => {
            status.success = false;
            status.error = Some(format!("merge failed: {e}"));
        }
    }
}

async fn update_submodules(dir: &Path, status: &mut SyncStatus) {
    let present = match run_git(dir, &["submodule", "status"]).await {
        Ok(out) => !out.trim().is_empty(),
        Err(_) => false,
    };
    if !present {
        return;
    }

    match run_git(
        dir,
        &["submodule", "update", "--init", "--recursive", "--remote"],
    )
    .await
    {
        Ok(_) => {
            status.updated_submodule = true;
        }
        Err(e) => {
            status.note(&format!("submodule update failed: {e}"));
        }
    }
}

/// Detect the branch `origin/HEAD` points at, falling back to the local
/// default when the remote has no HEAD ref.
async fn detect_remote_default_branch(worktree: &Worktree) -> Result<String> {
    if let Ok(out) = run_git(
        worktree.path(),
        &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
    )
    .await
    {
        let name = out.trim();
        if let Some(stripped) = name.strip_prefix("origin/") {
            return Ok(stripped.to_string());
        }
    }

    for candidate in ["main", "master"] {
        let remote_ref = format!("refs/remotes/origin/{candidate}");
        if run_git(worktree.path(), &["show-ref", "--verify", "--quiet", &remote_ref])
            .await
            .is_ok()
        {
            return Ok(candidate.to_string());
        }
    }

    let backend = GitBackend::open(worktree.repo_path())?;
    backend.detect_default_branch()
}

enum MergeOutcome {
    Clean(String),
    Conflict,
    Failed(String),
}

/// Merge needs both stdout and stderr to classify conflicts, so it bypasses
/// the shared runner.
async fn git_merge(dir: &Path, args: &[&str]) -> MergeOutcome {
    let output = tokio::process::Command::new("git")
        .current_dir(dir)
        .arg("merge")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(o) => o,
        Err(e) => return MergeOutcome::Failed(e.to_string()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        MergeOutcome::Clean(stdout)
    } else if stdout.contains("CONFLICT") || stdout.contains("Automatic merge failed") {
        MergeOutcome::Conflict
    } else {
        MergeOutcome::Failed(format!("{}{}", stdout.trim(), stderr.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_default() {
        let opts = SyncOptions::default();
        assert!(opts.pull_main);
        assert!(!opts.update_submodules);
        assert!(!opts.auto_resolve);
        assert!(opts.resolve_message.contains("ours"));
    }

    #[test]
    fn test_status_notes_accumulate() {
        let mut status = SyncStatus::default();
        status.note("first warning");
        status.note("second warning");
        assert_eq!(status.message, "first warning; second warning");
    }

    #[test]
    fn test_failed_status() {
        let status = SyncStatus::failed("sq/feature", "fetch exploded".to_string());
        assert!(!status.success);
        assert_eq!(status.branch, "sq/feature");
        assert_eq!(status.error.as_deref(), Some("fetch exploded"));
        assert!(!status.updated_from_main);
    }
}
