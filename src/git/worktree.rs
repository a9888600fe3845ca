//! Git worktree lifecycle
//!
//! Each instance owns a branch-specific checkout rooted outside the user's
//! primary working tree. `setup` creates or attaches it, `remove` detaches the
//! checkout while preserving the branch, and `cleanup` deletes both. Cleanup
//! steps are all attempted; failures accumulate into one composite error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, instrument, warn};

use super::{run_git, sanitize_branch_name, GitBackend};
use crate::error::{Error, FailureLog, GitError, Result};

/// Process-wide sequence for worktree path uniqueness.
static WORKTREE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Ownership mode of a worktree.
///
/// `Fresh` checkouts are created and destroyed by their instance. `Adopted`
/// checkouts existed before the instance attached to them and are never set
/// up or cleaned up here. `Shared` checkouts are used by several instances
/// and deleted only by their outer owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeMode {
    Fresh,
    Adopted,
    Shared,
}

/// A branch-specific checkout of a source repository.
#[derive(Debug, Clone)]
pub struct Worktree {
    /// Source repository root
    repo_path: PathBuf,
    /// On-disk location of the checkout
    worktree_path: PathBuf,
    /// Session name this worktree was derived from
    session_name: String,
    /// Branch owned by this worktree
    branch: String,
    /// Commit the branch forked from; reference point for diffs.
    /// Empty until first-time setup completes.
    base_commit_sha: String,
    /// Ownership mode
    mode: WorktreeMode,
}

impl Worktree {
    /// Derive a new worktree for `session_name` under `worktree_root`.
    ///
    /// The branch is `branch_prefix` + sanitized session name. The checkout
    /// path gets a monotonic token suffix so rapid parallel creations never
    /// collide. Returns the worktree and the derived branch name.
    pub fn new(
        repo_path: impl Into<PathBuf>,
        session_name: &str,
        branch_prefix: &str,
        worktree_root: &Path,
    ) -> (Self, String) {
        let repo_path = repo_path.into();
        let sanitized = sanitize_branch_name(session_name);
        let branch = format!("{branch_prefix}{sanitized}");

        let repo_name = repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        let token = unique_path_token();
        let dir_name = sanitized.replace('/', "-");
        let worktree_path = worktree_root
            .join(repo_name)
            .join(format!("{dir_name}_{token}"));

        let worktree = Self {
            repo_path,
            worktree_path,
            session_name: session_name.to_string(),
            branch: branch.clone(),
            base_commit_sha: String::new(),
            mode: WorktreeMode::Fresh,
        };

        (worktree, branch)
    }

    /// Attach to an already-checked-out branch directory.
    ///
    /// No setup is performed and cleanup never touches the path.
    pub fn adopt(
        repo_path: impl Into<PathBuf>,
        session_name: &str,
        branch: &str,
        existing_path: impl Into<PathBuf>,
        base_commit_sha: &str,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            worktree_path: existing_path.into(),
            session_name: session_name.to_string(),
            branch: branch.to_string(),
            base_commit_sha: base_commit_sha.to_string(),
            mode: WorktreeMode::Adopted,
        }
    }

    /// Reconstruct a worktree from persisted state.
    pub fn from_storage(
        repo_path: impl Into<PathBuf>,
        worktree_path: impl Into<PathBuf>,
        session_name: &str,
        branch: &str,
        base_commit_sha: &str,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            worktree_path: worktree_path.into(),
            session_name: session_name.to_string(),
            branch: branch.to_string(),
            base_commit_sha: base_commit_sha.to_string(),
            mode: WorktreeMode::Fresh,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn path(&self) -> &Path {
        &self.worktree_path
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base_commit_sha(&self) -> &str {
        &self.base_commit_sha
    }

    pub fn mode(&self) -> WorktreeMode {
        self.mode
    }

    /// Mark this worktree as cooperatively owned; cleanup then leaves the
    /// checkout for the outer owner to delete.
    pub fn mark_shared(&mut self) {
        self.mode = WorktreeMode::Shared;
    }

    pub fn is_shared(&self) -> bool {
        self.mode == WorktreeMode::Shared
    }

    pub fn is_adopted(&self) -> bool {
        self.mode == WorktreeMode::Adopted
    }

    /// Create or attach the on-disk checkout.
    ///
    /// Existing-branch policy: an existing branch with no live checkout is
    /// attached; a branch checked out in the source repository is refused
    /// (adoption is an explicit separate path). A missing branch is created
    /// from the source repository's HEAD, failing with `BrandNewRepo` when
    /// HEAD does not resolve. Any stale administrative entry at the chosen
    /// path is force-removed and pruned first. On failure, partial state is
    /// cleaned up best-effort and the original error is returned.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub async fn setup(&mut self) -> Result<()> {
        if self.is_adopted() {
            debug!("Adopted worktree, skipping setup");
            return Ok(());
        }

        match self.setup_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Worktree setup failed, cleaning up partial state: {}", e);
                if let Err(cleanup_err) = self.cleanup().await {
                    warn!("Post-failure cleanup also failed: {}", cleanup_err);
                }
                Err(e)
            }
        }
    }

    async fn setup_inner(&mut self) -> Result<()> {
        let backend = GitBackend::open(&self.repo_path)?;

        if let Some(parent) = self.worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GitError::WorktreeError(format!("failed to create worktree root: {e}"))
            })?;
        }

        // Drop any stale administrative entry at the chosen path.
        let path_str = self.worktree_path.to_string_lossy().to_string();
        let _ = run_git(
            &self.repo_path,
            &["worktree", "remove", "--force", &path_str],
        )
        .await;
        let _ = run_git(&self.repo_path, &["worktree", "prune"]).await;

        if backend.branch_exists(&self.branch)? {
            if self.is_branch_checked_out()? {
                return Err(GitError::WorktreeError(format!(
                    "branch '{}' is checked out in the source repository",
                    self.branch
                ))
                .into());
            }
            debug!("Branch {} exists, attaching worktree", self.branch);
            run_git(
                &self.repo_path,
                &["worktree", "add", &path_str, &self.branch],
            )
            .await?;
        } else {
            let head = backend.head_commit_id()?;
            debug!("Creating branch {} from {}", self.branch, head);
            run_git(
                &self.repo_path,
                &["worktree", "add", "-b", &self.branch, &path_str, &head],
            )
            .await?;
        }

        // The diff base is the commit the branch forked from; a re-attach
        // after pause must not move it forward past the auto-commit.
        if self.base_commit_sha.is_empty() {
            let head = run_git(&self.worktree_path, &["rev-parse", "HEAD"]).await?;
            self.base_commit_sha = head.trim().to_string();
        }

        info!(
            "Worktree ready at {:?} on branch {}",
            self.worktree_path, self.branch
        );
        Ok(())
    }

    /// Detach the checkout; the branch is preserved.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub async fn remove(&self) -> Result<()> {
        if self.is_adopted() {
            return Ok(());
        }

        let path_str = self.worktree_path.to_string_lossy().to_string();
        run_git(
            &self.repo_path,
            &["worktree", "remove", "--force", &path_str],
        )
        .await?;

        info!("Removed worktree at {:?}", self.worktree_path);
        Ok(())
    }

    /// Remove the checkout and delete the branch reference.
    ///
    /// Every step is attempted; sub-failures are joined into one error.
    /// Adopted and shared worktrees are left untouched.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub async fn cleanup(&self) -> Result<()> {
        if self.is_adopted() || self.is_shared() {
            debug!("Worktree not owned exclusively, skipping cleanup");
            return Ok(());
        }

        let mut failures = FailureLog::new();
        let path_str = self.worktree_path.to_string_lossy().to_string();

        failures.check(
            "remove worktree",
            run_git(
                &self.repo_path,
                &["worktree", "remove", "--force", &path_str],
            )
            .await,
        );

        match GitBackend::open(&self.repo_path) {
            Ok(backend) => {
                if backend.branch_exists(&self.branch).unwrap_or(false) {
                    failures.check(
                        "delete branch",
                        run_git(&self.repo_path, &["branch", "-D", &self.branch]).await,
                    );
                }
            }
            Err(e) => failures.record("open repository", e),
        }

        failures.check(
            "prune worktrees",
            run_git(&self.repo_path, &["worktree", "prune"]).await,
        );

        failures.finish(|failures| Error::Git(GitError::Cleanup { failures }))
    }

    /// Prune stale worktree administrative state.
    pub async fn prune(&self) -> Result<()> {
        run_git(&self.repo_path, &["worktree", "prune"]).await?;
        Ok(())
    }

    /// Whether tracked or untracked modifications exist relative to HEAD.
    pub async fn is_dirty(&self) -> Result<bool> {
        let out = run_git(&self.worktree_path, &["status", "--porcelain"]).await?;
        Ok(!out.trim().is_empty())
    }

    /// Whether the source repository itself has this branch checked out.
    pub fn is_branch_checked_out(&self) -> Result<bool> {
        let backend = GitBackend::open(&self.repo_path)?;
        Ok(backend.current_branch()? == self.branch)
    }

    /// Whether the checkout directory currently exists on disk.
    pub fn path_exists(&self) -> bool {
        self.worktree_path.exists()
    }

    /// Stage everything and commit with verification hooks disabled.
    /// No-op when the worktree is clean.
    #[instrument(skip(self, message), fields(branch = %self.branch))]
    pub async fn commit_changes(&self, message: &str) -> Result<()> {
        if !self.is_dirty().await? {
            debug!("Worktree clean, nothing to commit");
            return Ok(());
        }

        run_git(&self.worktree_path, &["add", "-A"]).await?;
        run_git(
            &self.worktree_path,
            &["commit", "-m", message, "--no-verify"],
        )
        .await?;

        info!("Committed changes on {}", self.branch);
        Ok(())
    }
}

/// Monotonic token for worktree path uniqueness.
///
/// Combines a nanosecond timestamp with a process-wide counter so both
/// parallel creations and process restarts land on fresh paths.
fn unique_path_token() -> String {
    let seq = WORKTREE_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("{nanos:x}{seq:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worktree_derives_branch() {
        let (wt, branch) = Worktree::new(
            "/tmp/repo",
            "Fix Auth",
            "squadron/",
            Path::new("/tmp/worktrees"),
        );
        assert_eq!(branch, "squadron/fix-auth");
        assert_eq!(wt.branch(), "squadron/fix-auth");
        assert_eq!(wt.mode(), WorktreeMode::Fresh);
        assert!(wt.base_commit_sha().is_empty());
        assert!(wt
            .path()
            .starts_with(Path::new("/tmp/worktrees").join("repo")));
    }

    #[test]
    fn test_worktree_paths_unique_across_rapid_creations() {
        let root = Path::new("/tmp/worktrees");
        let mut paths = std::collections::HashSet::new();
        for _ in 0..64 {
            let (wt, _) = Worktree::new("/tmp/repo", "same title", "sq/", root);
            assert!(paths.insert(wt.path().to_path_buf()), "path collision");
        }
    }

    #[test]
    fn test_adopted_worktree_mode() {
        let wt = Worktree::adopt("/tmp/repo", "reuse", "feature-x", "/tmp/elsewhere", "abc123");
        assert!(wt.is_adopted());
        assert!(!wt.is_shared());
        assert_eq!(wt.base_commit_sha(), "abc123");
    }

    #[test]
    fn test_mark_shared() {
        let (mut wt, _) = Worktree::new("/tmp/repo", "topic", "sq/", Path::new("/tmp/w"));
        wt.mark_shared();
        assert!(wt.is_shared());
    }

    #[tokio::test]
    async fn test_cleanup_skips_adopted() {
        let wt = Worktree::adopt("/nonexistent", "reuse", "feature-x", "/nonexistent/wt", "");
        // Would fail loudly if it touched git; adopted mode short-circuits.
        assert!(wt.cleanup().await.is_ok());
        assert!(wt.remove().await.is_ok());
    }

    #[test]
    fn test_unique_token_monotonic() {
        let a = unique_path_token();
        let b = unique_path_token();
        assert_ne!(a, b);
    }
}
