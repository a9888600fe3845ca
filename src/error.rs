//! Error types for squadron
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Cleanup paths accumulate sub-failures into a single composite error instead of
//! short-circuiting on the first one.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for squadron
#[derive(Error, Debug)]
pub enum Error {
    #[error("Instance error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Tmux error: {0}")]
    Tmux(#[from] TmuxError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Instance lifecycle errors
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("Instance '{0}' is not started")]
    NotStarted(String),

    #[error("Instance '{0}' is already started")]
    AlreadyStarted(String),

    #[error("Instance '{0}' is already paused")]
    AlreadyPaused(String),

    #[error("Instance '{0}' is not in a state that can be resumed")]
    InvalidStateForResume(String),

    #[error("Instance title cannot be empty")]
    TitleEmpty,

    #[error("Instance '{0}' is started; title is immutable")]
    TitleImmutable(String),

    #[error("Branch '{0}' is checked out in the source repository; detach it before resuming")]
    BranchCheckedOut(String),

    #[error("Restart is only valid after the agent process has died")]
    RestartWhileAlive(String),

    #[error("Process tree lookup failed: {0}")]
    ProcessLookup(String),

    #[error("Cleanup finished with {} failure(s): {}", .failures.len(), .failures.join("; "))]
    Cleanup { failures: Vec<String> },
}

/// Tmux integration errors
#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("Tmux is not installed or not in PATH")]
    NotInstalled,

    #[error("Tmux session '{0}' already exists")]
    SessionAlreadyExists(String),

    #[error("Tmux session '{name}' did not register within {elapsed:?}")]
    SpawnTimeout { name: String, elapsed: Duration },

    #[error("Tmux command failed: {command} - {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to capture pane content: {0}")]
    CaptureFailed(String),

    #[error("Session '{0}' not found in tmux")]
    SessionNotFound(String),

    #[error("Tmux command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse tmux output: {0}")]
    ParseError(String),

    #[error("Semaphore acquire failed")]
    SemaphoreError,

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("No PTY is attached to session '{0}'")]
    NotAttached(String),

    #[error("Close finished with {} failure(s): {}", .failures.len(), .failures.join("; "))]
    Close { failures: Vec<String> },
}

impl From<pty_process::Error> for TmuxError {
    fn from(e: pty_process::Error) -> Self {
        TmuxError::PtyError(e.to_string())
    }
}

impl From<pty_process::Error> for Error {
    fn from(e: pty_process::Error) -> Self {
        Error::Tmux(TmuxError::PtyError(e.to_string()))
    }
}

/// Git operations errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Repository at {0} has no commits yet; create an initial commit first")]
    BrandNewRepo(PathBuf),

    #[error("Git operation failed: {0}")]
    OperationFailed(String),

    #[error("Worktree error: {0}")]
    WorktreeError(String),

    #[error("Branch '{0}' not found")]
    BranchNotFound(String),

    #[error("Merge of '{from_branch}' into '{branch}' hit conflicts")]
    MergeConflict { branch: String, from_branch: String },

    #[error("Failed to compute diff: {0}")]
    DiffFailed(String),

    #[error("Gitoxide error: {0}")]
    Gix(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("Cleanup finished with {} failure(s): {}", .failures.len(), .failures.join("; "))]
    Cleanup { failures: Vec<String> },
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Instance '{title}' ({program}) not found")]
    NotFound { title: String, program: String },

    #[error("Instance '{title}' ({program}) already exists")]
    Duplicate { title: String, program: String },

    #[error("Failed to save state: {0}")]
    SaveFailed(String),

    #[error("Failed to load state: {0}")]
    LoadFailed(String),

    #[error("Failed to serialize instance state: {0}")]
    Serialize(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<gix::open::Error> for GitError {
    fn from(e: gix::open::Error) -> Self {
        GitError::Gix(e.to_string())
    }
}

impl From<gix::discover::Error> for GitError {
    fn from(e: gix::discover::Error) -> Self {
        GitError::Gix(e.to_string())
    }
}

/// Collect best-effort sub-failures during a multi-step teardown.
///
/// Every step runs regardless of earlier failures; the composite error is
/// returned only once all steps were attempted.
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Vec<String>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error of a failed step, tagged with its context.
    pub fn record<E: std::fmt::Display>(&mut self, context: &str, err: E) {
        self.failures.push(format!("{context}: {err}"));
    }

    /// Run a fallible step, recording its error without short-circuiting.
    pub fn check<T, E: std::fmt::Display>(
        &mut self,
        context: &str,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.record(context, e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_failures(self) -> Vec<String> {
        self.failures
    }

    /// Finish the teardown: `Ok(())` if every step succeeded, otherwise the
    /// composite error built by `make_err`.
    pub fn finish<F>(self, make_err: F) -> Result<()>
    where
        F: FnOnce(Vec<String>) -> Error,
    {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(make_err(self.failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InstanceError::NotStarted("fix-auth".to_string());
        assert!(err.to_string().contains("not started"));

        let err = TmuxError::NotInstalled;
        assert!(err.to_string().contains("not installed"));

        let err = GitError::NotARepository(PathBuf::from("/tmp/foo"));
        assert!(err.to_string().contains("/tmp/foo"));

        let err = GitError::BrandNewRepo(PathBuf::from("/tmp/foo"));
        assert!(err.to_string().contains("no commits"));
    }

    #[test]
    fn test_error_conversion() {
        let instance_err = InstanceError::TitleEmpty;
        let _top_err: Error = instance_err.into();

        let tmux_err = TmuxError::NotInstalled;
        let _top_err: Error = tmux_err.into();
    }

    #[test]
    fn test_failure_log_accumulates() {
        let mut log = FailureLog::new();
        assert!(log.is_empty());

        log.record("kill session", "no such session");
        let got = log.check("remove worktree", Err::<(), _>("directory locked"));
        assert!(got.is_none());
        let got = log.check("prune", Ok::<_, String>(42));
        assert_eq!(got, Some(42));

        let err = log
            .finish(|failures| GitError::Cleanup { failures }.into())
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 failure(s)"));
        assert!(msg.contains("kill session: no such session"));
        assert!(msg.contains("remove worktree: directory locked"));
    }

    #[test]
    fn test_failure_log_empty_is_ok() {
        let log = FailureLog::new();
        assert!(log
            .finish(|failures| GitError::Cleanup { failures }.into())
            .is_ok());
    }
}
