//! Instance lifecycle
//!
//! An instance couples one branch-specific worktree, one terminal session,
//! and metadata. A single write lock serializes mutating operations;
//! observation paths take a read lock and consult the `started`/`tmux_dead`
//! atomics, published with release ordering so an observer that sees
//! `started == true` also sees the fully initialized worktree and terminal.
//!
//! ```text
//! Ready --start(first=true)--> Running
//! Running --pause--> Paused
//! Paused --resume--> Running
//! Running|Paused --kill--> (terminal)
//! Running --restart (after process death)--> Running
//! ```

mod resources;
mod types;

pub use resources::*;
pub use types::*;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{FailureLog, GitError, InstanceError, Result};
use crate::git::{DiffStats, Worktree};
use crate::tmux::{new_terminal_session, parse_activity, Activity, TerminalSession};

/// Delay between prompt text and the carriage return, preventing the two
/// send-keys calls from fusing into one input event.
const PROMPT_ENTER_DELAY: Duration = Duration::from_millis(100);

/// Construction parameters for an instance.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// User-facing title; immutable once started
    pub title: String,
    /// Absolute path to the source repository root
    pub path: PathBuf,
    /// Agent command line to spawn
    pub program: String,
    /// Auto-acknowledge agent prompts
    pub auto_yes: bool,
    /// Prefix for the derived branch name (includes any separator)
    pub branch_prefix: String,
    /// Directory worktrees are created under
    pub worktree_root: PathBuf,
}

/// Persisted fields used to reconstruct an instance across restarts.
pub struct RestoredState {
    pub branch: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub width: u16,
    pub height: u16,
    pub worktree: Worktree,
    pub diff_stats: DiffStats,
}

/// Point-in-time view of an instance, for display and persistence.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub title: String,
    pub path: PathBuf,
    pub branch: String,
    pub program: String,
    pub status: Status,
    pub loading_stage: LoadingStage,
    pub auto_yes: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub width: u16,
    pub height: u16,
    pub started: bool,
    pub worktree: Option<WorktreeSnapshot>,
    pub diff_stats: DiffStats,
    pub resource_usage: ResourceUsage,
}

/// Worktree identity fields as persisted.
#[derive(Debug, Clone)]
pub struct WorktreeSnapshot {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

struct InstanceInner {
    title: String,
    path: PathBuf,
    branch: String,
    program: String,
    status: Status,
    loading_stage: LoadingStage,
    auto_yes: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    width: u16,
    height: u16,
    shared_worktree: bool,
    branch_prefix: String,
    worktree_root: PathBuf,
    worktree: Option<Worktree>,
    terminal: Option<Box<dyn TerminalSession>>,
    diff_stats: DiffStats,
    resource_usage: ResourceUsage,
    sampler: ResourceSampler,
}

/// A managed coding-agent session: one branch worktree + one terminal + metadata.
pub struct Instance {
    started: AtomicBool,
    tmux_dead: AtomicBool,
    inner: RwLock<InstanceInner>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("started", &self.started.load(Ordering::Acquire))
            .field("tmux_dead", &self.tmux_dead.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Construct an unstarted instance in `Ready`.
    pub fn new(opts: InstanceOptions) -> Result<Self> {
        if opts.title.trim().is_empty() {
            return Err(InstanceError::TitleEmpty.into());
        }

        let now = Utc::now();
        Ok(Self {
            started: AtomicBool::new(false),
            tmux_dead: AtomicBool::new(false),
            inner: RwLock::new(InstanceInner {
                title: opts.title,
                path: opts.path,
                branch: String::new(),
                program: opts.program,
                status: Status::Ready,
                loading_stage: LoadingStage::Initializing,
                auto_yes: opts.auto_yes,
                created_at: now,
                updated_at: now,
                width: 0,
                height: 0,
                shared_worktree: false,
                branch_prefix: opts.branch_prefix,
                worktree_root: opts.worktree_root,
                worktree: None,
                terminal: None,
                diff_stats: DiffStats::default(),
                resource_usage: ResourceUsage::default(),
                sampler: ResourceSampler::new(),
            }),
        })
    }

    /// Reconstruct an instance from persisted state.
    pub fn from_storage(opts: InstanceOptions, restored: RestoredState) -> Result<Self> {
        let mut instance = Self::new(opts)?;
        {
            // Lock cannot be contended before the value escapes this function
            let inner = instance.inner.get_mut();
            inner.branch = restored.branch;
            inner.status = restored.status;
            inner.created_at = restored.created_at;
            inner.updated_at = restored.updated_at;
            inner.width = restored.width;
            inner.height = restored.height;
            inner.worktree = Some(restored.worktree);
            inner.diff_stats = restored.diff_stats;
        }
        Ok(instance)
    }

    /// Whether `start` has completed and not been undone by `kill`.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the terminal was observed dead during preview.
    pub fn terminal_dead(&self) -> bool {
        self.tmux_dead.load(Ordering::Acquire)
    }

    /// Attach to an already-checked-out branch instead of creating a fresh
    /// worktree. Must be called before `start`.
    pub async fn adopt_worktree(
        &self,
        branch: &str,
        existing_path: &Path,
        base_commit_sha: &str,
    ) -> Result<()> {
        if self.started() {
            return Err(InstanceError::AlreadyStarted(self.title().await).into());
        }
        let mut inner = self.inner.write().await;
        inner.worktree = Some(Worktree::adopt(
            inner.path.clone(),
            &inner.title,
            branch,
            existing_path,
            base_commit_sha,
        ));
        inner.branch = branch.to_string();
        Ok(())
    }

    /// Mark this instance's worktree as cooperatively owned; pause and kill
    /// then leave the checkout in place for its outer owner.
    pub async fn mark_shared_worktree(&self) {
        let mut inner = self.inner.write().await;
        inner.shared_worktree = true;
        if let Some(wt) = inner.worktree.as_mut() {
            wt.mark_shared();
        }
    }

    /// Acquire worktree and terminal, transitioning to `Running`.
    ///
    /// With `first_time`, a fresh worktree is provisioned (unless one was
    /// adopted) and the terminal is spawned; otherwise the existing terminal
    /// session is restored. Any failure rolls back via `kill`.
    #[instrument(skip(self))]
    pub async fn start(&self, first_time: bool) -> Result<()> {
        let mut inner = self.inner.write().await;

        if first_time && self.started() {
            return Err(InstanceError::AlreadyStarted(inner.title.clone()).into());
        }

        inner.status = Status::Loading;
        inner.loading_stage = LoadingStage::Initializing;

        match self.start_inner(&mut inner, first_time).await {
            Ok(()) => {
                inner.loading_stage = LoadingStage::Ready;
                inner.status = Status::Running;
                inner.updated_at = Utc::now();
                self.tmux_dead.store(false, Ordering::Release);
                // Published last so observers that see started=true also see
                // the initialized worktree and terminal.
                self.started.store(true, Ordering::Release);
                info!("Instance '{}' running on {}", inner.title, inner.branch);
                Ok(())
            }
            Err(e) => {
                warn!("Start failed for '{}', rolling back: {}", inner.title, e);
                if let Err(kill_err) = self.kill_inner(&mut inner).await {
                    warn!("Rollback after failed start also failed: {}", kill_err);
                }
                Err(e)
            }
        }
    }

    async fn start_inner(&self, inner: &mut InstanceInner, first_time: bool) -> Result<()> {
        let title = inner.title.clone();

        if first_time && inner.worktree.is_none() {
            inner.loading_stage = LoadingStage::CreatingWorktree;
            let (mut wt, branch) = Worktree::new(
                inner.path.clone(),
                &inner.title,
                &inner.branch_prefix,
                &inner.worktree_root,
            );
            if inner.shared_worktree {
                wt.mark_shared();
            }
            inner.branch = branch;
            inner.worktree = Some(wt);
        }

        if inner.terminal.is_none() {
            inner.terminal = Some(new_terminal_session(&title, &inner.program));
        }

        let Some(wt) = inner.worktree.as_mut() else {
            return Err(GitError::WorktreeError("instance has no worktree".to_string()).into());
        };

        if first_time {
            inner.loading_stage = LoadingStage::SettingUpWorktree;
            wt.setup().await?;
        }
        let wt_path = wt.path().to_path_buf();

        let Some(term) = inner.terminal.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };

        if first_time {
            inner.loading_stage = LoadingStage::StartingSession;
            term.start(&wt_path).await?;
        } else {
            term.restore().await?;
        }

        Ok(())
    }

    /// Reconstruct a loaded-but-paused instance: a terminal object exists but
    /// no live process is attached until `resume`.
    pub async fn mark_started_paused(&self) {
        let mut inner = self.inner.write().await;
        if inner.terminal.is_none() {
            inner.terminal = Some(new_terminal_session(&inner.title, &inner.program));
        }
        inner.status = Status::Paused;
        self.started.store(true, Ordering::Release);
    }

    /// Detach the terminal and remove the worktree directory, preserving the
    /// branch. Dirty worktrees are auto-committed first; a commit failure
    /// aborts the pause with the instance still `Running`.
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.write().await;

        if !self.started() {
            return Err(InstanceError::NotStarted(inner.title.clone()).into());
        }
        if inner.status.is_paused() {
            return Err(InstanceError::AlreadyPaused(inner.title.clone()).into());
        }

        let title = inner.title.clone();
        let Some(wt) = inner.worktree.as_ref() else {
            return Err(InstanceError::NotStarted(title).into());
        };
        let exclusively_owned = !wt.is_shared() && !wt.is_adopted();
        let branch = wt.branch().to_string();

        if exclusively_owned && wt.is_dirty().await? {
            let message = format!(
                "update from '{}' on {} (paused)",
                title,
                Utc::now().to_rfc2822()
            );
            wt.commit_changes(&message).await?;
        }

        let Some(term) = inner.terminal.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };
        term.detach_safely().await?;

        if exclusively_owned {
            if let Some(wt) = inner.worktree.as_ref() {
                wt.remove().await?;
                wt.prune().await?;
            }
        }

        inner.status = Status::Paused;
        inner.updated_at = Utc::now();

        copy_to_clipboard(&branch);
        info!("Paused '{}', branch {} preserved", inner.title, branch);
        Ok(())
    }

    /// Re-provision the worktree and bring the terminal back, transitioning
    /// to `Running`. A live session is re-attached optimistically; on failure
    /// (or when it is gone) a fresh terminal start is attempted.
    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let title = inner.title.clone();

        if !self.started() {
            return Err(InstanceError::NotStarted(title).into());
        }
        if !inner.status.can_resume() {
            return Err(InstanceError::InvalidStateForResume(title).into());
        }

        let Some(wt) = inner.worktree.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };

        if wt.is_branch_checked_out()? {
            return Err(InstanceError::BranchCheckedOut(wt.branch().to_string()).into());
        }

        wt.setup().await?;
        let wt_path = wt.path().to_path_buf();

        let Some(term) = inner.terminal.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };

        if term.does_session_exist().await {
            if let Err(e) = term.restore().await {
                warn!("Re-attach failed, falling back to fresh start: {}", e);
                let _ = term.close().await;
                term.start(&wt_path).await?;
            }
        } else {
            term.start(&wt_path).await?;
        }

        inner.status = Status::Running;
        inner.updated_at = Utc::now();
        self.tmux_dead.store(false, Ordering::Release);
        info!("Resumed '{}'", inner.title);
        Ok(())
    }

    /// Destroy terminal, worktree, and branch (shared worktrees excepted).
    /// Best-effort: every step runs and sub-failures are joined.
    #[instrument(skip(self))]
    pub async fn kill(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        self.kill_inner(&mut inner).await
    }

    async fn kill_inner(&self, inner: &mut InstanceInner) -> Result<()> {
        let mut failures = FailureLog::new();

        if let Some(term) = inner.terminal.as_mut() {
            failures.check("close terminal", term.close().await);
        }
        if let Some(wt) = inner.worktree.as_ref() {
            // cleanup itself skips adopted and shared checkouts
            failures.check("cleanup worktree", wt.cleanup().await);
        }

        inner.status = Status::Ready;
        inner.updated_at = Utc::now();
        self.started.store(false, Ordering::Release);
        self.tmux_dead.store(false, Ordering::Release);

        failures.finish(|failures| InstanceError::Cleanup { failures }.into())
    }

    /// Replace a dead terminal session with a fresh one under the same name.
    /// Only valid after the agent process was observed dead; re-provisions
    /// the worktree if its directory disappeared.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let title = inner.title.clone();

        if !self.started() {
            return Err(InstanceError::NotStarted(title).into());
        }
        if !self.terminal_dead() {
            return Err(InstanceError::RestartWhileAlive(title).into());
        }

        let Some(wt) = inner.worktree.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };
        if !wt.path_exists() {
            wt.setup().await?;
        }
        let wt_path = wt.path().to_path_buf();

        let mut term = new_terminal_session(&inner.title, &inner.program);
        term.start(&wt_path).await?;
        inner.terminal = Some(term);

        inner.status = Status::Running;
        inner.updated_at = Utc::now();
        self.tmux_dead.store(false, Ordering::Release);
        info!("Restarted '{}'", inner.title);
        Ok(())
    }

    /// Type `text` into the agent and press Enter.
    pub async fn send_prompt(&self, text: &str) -> Result<()> {
        let mut inner = self.inner.write().await;

        if !self.started() || inner.status.is_paused() {
            return Err(InstanceError::NotStarted(inner.title.clone()).into());
        }
        let Some(term) = inner.terminal.as_ref() else {
            return Err(InstanceError::NotStarted(inner.title.clone()).into());
        };

        term.send_keys(text).await?;
        tokio::time::sleep(PROMPT_ENTER_DELAY).await;
        term.tap_enter().await?;

        inner.updated_at = Utc::now();
        Ok(())
    }

    /// Current visible pane content.
    ///
    /// Empty for unstarted or paused instances. A dead terminal also yields
    /// empty content, and the deadness is cached so later previews
    /// short-circuit until `restart` succeeds.
    pub async fn preview(&self) -> Result<String> {
        if !self.started() || self.terminal_dead() {
            return Ok(String::new());
        }

        let inner = self.inner.read().await;
        if inner.status.is_paused() {
            return Ok(String::new());
        }
        let Some(term) = inner.terminal.as_ref() else {
            return Ok(String::new());
        };

        match term.capture_pane_content().await {
            Ok(content) => Ok(content),
            Err(e) => {
                if !term.does_session_exist().await {
                    debug!("Terminal for '{}' is gone", inner.title);
                    self.tmux_dead.store(true, Ordering::Release);
                    return Ok(String::new());
                }
                Err(e)
            }
        }
    }

    /// Whether pane content changed since the last check, and whether an
    /// awaiting-input prompt is visible. With auto-yes on, a visible prompt
    /// is acknowledged with a best-effort Enter.
    pub async fn has_updated(&self) -> Result<(bool, bool)> {
        if !self.started() || self.terminal_dead() {
            return Ok((false, false));
        }

        let inner = self.inner.read().await;
        if inner.status.is_paused() {
            return Ok((false, false));
        }
        let Some(term) = inner.terminal.as_ref() else {
            return Ok((false, false));
        };

        let (updated, has_prompt) = term.has_updated().await?;
        if has_prompt && inner.auto_yes {
            if let Err(e) = term.tap_enter().await {
                debug!("Auto-yes acknowledgement failed: {}", e);
            }
        }
        Ok((updated, has_prompt))
    }

    /// Classify what the agent is currently doing from the visible pane.
    pub async fn current_activity(&self) -> Result<Option<Activity>> {
        let content = self.preview().await?;
        if content.is_empty() {
            return Ok(None);
        }
        let program = {
            let inner = self.inner.read().await;
            inner.program.clone()
        };
        Ok(parse_activity(&content, &program))
    }

    /// Recompute diff stats against the worktree's base commit.
    ///
    /// A worktree that is not fully provisioned yields empty stats; on any
    /// other failure the previous stats are kept and the error surfaces.
    pub async fn update_diff_stats(&self) -> Result<()> {
        let mut inner = self.inner.write().await;

        if !self.started() || inner.status.is_paused() {
            return Ok(());
        }
        let Some(wt) = inner.worktree.as_ref() else {
            return Ok(());
        };

        let stats = wt.diff().await?;
        inner.diff_stats = stats;
        Ok(())
    }

    /// Refresh process-tree resource usage.
    ///
    /// Failures (dead PID, lookup races) keep the previous sample.
    pub async fn update_resource_usage(&self) -> Result<()> {
        let mut inner = self.inner.write().await;

        if !self.started() || inner.status.is_paused() || self.terminal_dead() {
            return Ok(());
        }
        let Some(term) = inner.terminal.as_ref() else {
            return Ok(());
        };

        let windows = match term.list_windows().await {
            Ok(w) => w,
            Err(e) => {
                debug!("Window enumeration failed, keeping last sample: {}", e);
                return Ok(());
            }
        };

        match inner.sampler.sample(&windows) {
            Ok(usage) => {
                inner.resource_usage = usage;
            }
            Err(e) => {
                debug!("Resource sample failed, keeping last sample: {}", e);
            }
        }
        Ok(())
    }

    /// Rename the instance; rejected once started.
    pub async fn set_title(&self, title: &str) -> Result<()> {
        if title.trim().is_empty() {
            return Err(InstanceError::TitleEmpty.into());
        }
        let mut inner = self.inner.write().await;
        if self.started() {
            return Err(InstanceError::TitleImmutable(inner.title.clone()).into());
        }
        inner.title = title.to_string();
        inner.updated_at = Utc::now();
        Ok(())
    }

    pub async fn set_auto_yes(&self, auto_yes: bool) {
        let mut inner = self.inner.write().await;
        inner.auto_yes = auto_yes;
    }

    /// Record the preview size and resize the detached pane to match.
    pub async fn set_size(&self, width: u16, height: u16) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.width = width;
        inner.height = height;
        if inner.status.is_paused() || !self.started() {
            return Ok(());
        }
        if let Some(term) = inner.terminal.as_ref() {
            term.set_detached_size(width, height).await?;
        }
        Ok(())
    }

    /// Bridge the host terminal to this instance's session.
    pub async fn attach(
        &self,
    ) -> Result<tokio::sync::oneshot::Receiver<crate::tmux::AttachResult>> {
        let mut inner = self.inner.write().await;
        let title = inner.title.clone();
        if !self.started() || inner.status.is_paused() {
            return Err(InstanceError::NotStarted(title).into());
        }
        let Some(term) = inner.terminal.as_mut() else {
            return Err(InstanceError::NotStarted(title).into());
        };
        Ok(term.attach())
    }

    /// Run a sync pass over this instance's worktree.
    pub async fn sync(&self, opts: &crate::git::SyncOptions) -> crate::git::SyncStatus {
        let inner = self.inner.read().await;
        let Some(wt) = inner.worktree.as_ref() else {
            return crate::git::SyncStatus {
                branch: inner.branch.clone(),
                error: Some("instance has no worktree".to_string()),
                ..Default::default()
            };
        };
        if !self.started() || !wt.path_exists() {
            return crate::git::SyncStatus {
                branch: inner.branch.clone(),
                error: Some("instance is not running".to_string()),
                ..Default::default()
            };
        }
        crate::git::sync_worktree(wt, opts).await
    }

    pub async fn title(&self) -> String {
        self.inner.read().await.title.clone()
    }

    pub async fn program(&self) -> String {
        self.inner.read().await.program.clone()
    }

    pub async fn branch(&self) -> String {
        self.inner.read().await.branch.clone()
    }

    pub async fn status(&self) -> Status {
        self.inner.read().await.status
    }

    pub async fn loading_stage(&self) -> LoadingStage {
        self.inner.read().await.loading_stage
    }

    pub async fn diff_stats(&self) -> DiffStats {
        self.inner.read().await.diff_stats.clone()
    }

    pub async fn resource_usage(&self) -> ResourceUsage {
        self.inner.read().await.resource_usage.clone()
    }

    /// Matches on the `(title, program)` identity.
    pub async fn matches(&self, title: &str, program: &str) -> bool {
        let inner = self.inner.read().await;
        inner.title == title && inner.program == program
    }

    /// Point-in-time view for display and persistence.
    pub async fn snapshot(&self) -> InstanceSnapshot {
        let inner = self.inner.read().await;
        InstanceSnapshot {
            title: inner.title.clone(),
            path: inner.path.clone(),
            branch: inner.branch.clone(),
            program: inner.program.clone(),
            status: inner.status,
            loading_stage: inner.loading_stage,
            auto_yes: inner.auto_yes,
            created_at: inner.created_at,
            updated_at: inner.updated_at,
            width: inner.width,
            height: inner.height,
            started: self.started(),
            worktree: inner.worktree.as_ref().map(|wt| WorktreeSnapshot {
                repo_path: wt.repo_path().to_path_buf(),
                worktree_path: wt.path().to_path_buf(),
                session_name: wt.session_name().to_string(),
                branch_name: wt.branch().to_string(),
                base_commit_sha: wt.base_commit_sha().to_string(),
            }),
            diff_stats: inner.diff_stats.clone(),
            resource_usage: inner.resource_usage.clone(),
        }
    }
}

/// Copy text to the host clipboard. Best-effort: never fails the caller.
fn copy_to_clipboard(text: &str) {
    match arboard::Clipboard::new() {
        Ok(mut clipboard) => {
            if let Err(e) = clipboard.set_text(text.to_string()) {
                debug!("Clipboard write failed: {}", e);
            }
        }
        Err(e) => debug!("Clipboard unavailable: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options(title: &str) -> InstanceOptions {
        InstanceOptions {
            title: title.to_string(),
            path: PathBuf::from("/tmp/repo"),
            program: "bash".to_string(),
            auto_yes: false,
            branch_prefix: "squadron/".to_string(),
            worktree_root: PathBuf::from("/tmp/worktrees"),
        }
    }

    #[test]
    fn test_new_instance_is_ready() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        assert!(!instance.started());
        assert!(!instance.terminal_dead());
    }

    #[test]
    fn test_empty_title_rejected() {
        let err = Instance::new(test_options("  ")).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_operations_require_started() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();

        assert!(matches!(
            instance.pause().await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::NotStarted(_))
        ));
        assert!(matches!(
            instance.resume().await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::NotStarted(_))
        ));
        assert!(matches!(
            instance.send_prompt("hello").await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_preview_empty_when_not_started() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        assert_eq!(instance.preview().await.unwrap(), "");
        assert_eq!(instance.has_updated().await.unwrap(), (false, false));
    }

    #[tokio::test]
    async fn test_set_title_before_start() {
        let instance = Instance::new(test_options("old-name")).unwrap();
        instance.set_title("new-name").await.unwrap();
        assert_eq!(instance.title().await, "new-name");

        assert!(matches!(
            instance.set_title("").await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::TitleEmpty)
        ));
    }

    #[tokio::test]
    async fn test_title_immutable_once_started() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        // Simulate a completed start without touching git or tmux.
        instance.mark_started_paused().await;

        assert!(matches!(
            instance.set_title("other").await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::TitleImmutable(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_requires_dead_terminal() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        instance.mark_started_paused().await;

        assert!(matches!(
            instance.restart().await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::RestartWhileAlive(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_twice_is_already_paused() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        instance.mark_started_paused().await;

        assert!(matches!(
            instance.pause().await.unwrap_err(),
            crate::error::Error::Instance(InstanceError::AlreadyPaused(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_identity() {
        let instance = Instance::new(test_options("fix-auth")).unwrap();
        let snapshot = instance.snapshot().await;
        assert_eq!(snapshot.title, "fix-auth");
        assert_eq!(snapshot.program, "bash");
        assert_eq!(snapshot.status, Status::Ready);
        assert!(!snapshot.started);
        assert!(snapshot.worktree.is_none());
        assert!(instance.matches("fix-auth", "bash").await);
        assert!(!instance.matches("fix-auth", "claude").await);
    }
}
