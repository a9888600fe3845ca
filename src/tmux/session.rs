//! Detachable terminal sessions
//!
//! [`TerminalSession`] is the capability an instance programs against;
//! [`TmuxSession`] is the POSIX backend. A session is created detached, gets
//! a monitor PTY attached for observation, and can be closed, safely
//! detached (backing process kept alive), or restored.
//!
//! ```text
//! (none) --start--> Attached --detach_safely--> Detached --restore--> Attached
//!                     |                           |
//!                     +--close--> Closed <--------+
//! ```

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::activity::strip_ansi;
use super::attach::{spawn_attach, AttachResult};
use super::executor::{TmuxExecutor, WindowInfo};
use super::AgentClass;
use crate::error::{FailureLog, Result, TmuxError};

/// Namespace tag prefixed to every session name so squadron sessions never
/// collide with unrelated host terminals.
pub const SESSION_PREFIX: &str = "squadron_";

/// Existence-poll backoff after spawning a session.
const SPAWN_POLL_INITIAL: Duration = Duration::from_millis(5);
const SPAWN_POLL_CAP: Duration = Duration::from_millis(50);
const SPAWN_DEADLINE: Duration = Duration::from_secs(2);

/// Trust-confirmation poll pacing.
const CONFIRM_POLL_INITIAL: Duration = Duration::from_millis(100);
const CONFIRM_POLL_CAP: Duration = Duration::from_secs(1);
const CONFIRM_POLL_FACTOR: f32 = 1.2;

/// Derive a collision-resistant tmux session name from an instance title.
///
/// Lowercase, whitespace runs collapse to a single `_`, characters outside
/// `[a-z0-9-_]` are dropped, and the namespace prefix is applied.
pub fn sanitize_session_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_sep = false;

    for c in title.to_lowercase().chars() {
        if c.is_whitespace() {
            if !out.is_empty() {
                pending_sep = true;
            }
            continue;
        }
        if matches!(c, 'a'..='z' | '0'..='9' | '-' | '_') {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(c);
        }
    }

    format!("{SESSION_PREFIX}{out}")
}

/// Lifecycle state of a terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No backing process yet
    Unstarted,
    /// Backing session alive, monitor PTY attached
    Attached,
    /// Backing session alive, no PTY
    Detached,
    /// Backing session gone; the name may be reused once proven gone
    Closed,
}

/// A named, detachable terminal hosting an agent process.
#[async_trait]
pub trait TerminalSession: Send + Sync {
    /// Spawn the program in a new detached session rooted at `work_dir`.
    async fn start(&mut self, work_dir: &Path) -> Result<()>;

    /// Re-attach a monitor PTY to an existing live session.
    async fn restore(&mut self) -> Result<()>;

    /// Terminate the backing session. Errors are accumulated.
    async fn close(&mut self) -> Result<()>;

    /// Drop the PTY while leaving the session process alive.
    async fn detach_safely(&mut self) -> Result<()>;

    /// Authoritative process-liveness check.
    async fn does_session_exist(&self) -> bool;

    /// Current visible pane.
    async fn capture_pane_content(&self) -> Result<String>;

    /// Arbitrary scrollback slice; `"-"` for either bound means full history.
    async fn capture_pane_content_with_options(&self, start: &str, end: &str) -> Result<String>;

    /// Send raw text (no trailing newline).
    async fn send_keys(&self, text: &str) -> Result<()>;

    /// Send a carriage return.
    async fn tap_enter(&self) -> Result<()>;

    /// Resize the detached pane; no-op without a live session.
    async fn set_detached_size(&self, width: u16, height: u16) -> Result<()>;

    /// Compare pane content against the previous observation.
    ///
    /// Returns `(updated, has_prompt)`: whether the content hash changed,
    /// and whether an agent-specific awaiting-input prompt is visible.
    async fn has_updated(&self) -> Result<(bool, bool)>;

    /// Enumerate windows for sub-agent detection.
    async fn list_windows(&self) -> Result<Vec<WindowInfo>>;

    /// PID of the active pane process in the given window.
    async fn pane_pid(&self, window_index: usize) -> Result<u32>;

    /// Bridge the host terminal to this session.
    ///
    /// The returned channel resolves when the user detaches or the session
    /// ends.
    fn attach(&mut self) -> oneshot::Receiver<AttachResult>;

    fn name(&self) -> &str;

    fn state(&self) -> SessionState;
}

/// Construct the platform's terminal session backend.
#[cfg(unix)]
pub fn new_terminal_session(title: &str, program: &str) -> Box<dyn TerminalSession> {
    Box::new(TmuxSession::new(title, program))
}

/// Monitor PTY holding a `tmux attach-session` client.
struct MonitorPty {
    // Held to keep the client fd open; never read from directly.
    _pty: pty_process::Pty,
    child: tokio::process::Child,
}

/// tmux-backed terminal session.
pub struct TmuxSession {
    executor: TmuxExecutor,
    name: String,
    program: String,
    agent: AgentClass,
    state: SessionState,
    monitor: Option<MonitorPty>,
    last_hash: Mutex<Option<[u8; 32]>>,
}

impl TmuxSession {
    pub fn new(title: &str, program: &str) -> Self {
        Self::with_executor(TmuxExecutor::new(), title, program)
    }

    pub fn with_executor(executor: TmuxExecutor, title: &str, program: &str) -> Self {
        Self {
            executor,
            name: sanitize_session_name(title),
            program: program.to_string(),
            agent: AgentClass::from_program(program),
            state: SessionState::Unstarted,
            monitor: None,
            last_hash: Mutex::new(None),
        }
    }

    /// Forget the previous pane hash so the next `has_updated` reports fresh.
    fn reset_monitor(&self) {
        let mut guard = self
            .last_hash
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }

    /// Poll until tmux registers the new session, with capped exponential
    /// backoff. Bounded by [`SPAWN_DEADLINE`].
    async fn wait_for_session(&self) -> Result<()> {
        let started = Instant::now();
        let mut delay = SPAWN_POLL_INITIAL;

        loop {
            if self.executor.session_exists(&self.name).await {
                return Ok(());
            }
            if started.elapsed() >= SPAWN_DEADLINE {
                return Err(TmuxError::SpawnTimeout {
                    name: self.name.clone(),
                    elapsed: started.elapsed(),
                }
                .into());
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(SPAWN_POLL_CAP);
        }
    }

    /// Watch for the agent's first-launch trust confirmation and accept it.
    ///
    /// Best-effort: the loop gives up silently once the agent's budget is
    /// spent, since not every launch shows the prompt.
    async fn confirm_trust_prompt(&self) {
        let Some(trust) = self.agent.trust_prompt() else {
            return;
        };

        let started = Instant::now();
        let mut delay = CONFIRM_POLL_INITIAL;

        while started.elapsed() < trust.budget {
            tokio::time::sleep(delay).await;

            match self.executor.capture_pane(&self.name).await {
                Ok(content) => {
                    if strip_ansi(&content).contains(trust.phrase) {
                        debug!("Trust prompt detected on {}", self.name);
                        for key in trust.confirm_keys {
                            if let Err(e) = self.executor.send_key(&self.name, key).await {
                                warn!("Failed to confirm trust prompt: {}", e);
                                return;
                            }
                        }
                        return;
                    }
                }
                Err(e) => {
                    debug!("Capture during trust confirmation failed: {}", e);
                }
            }

            delay = delay.mul_f32(CONFIRM_POLL_FACTOR).min(CONFIRM_POLL_CAP);
        }
    }
}

#[async_trait]
impl TerminalSession for TmuxSession {
    #[instrument(skip(self, work_dir), fields(name = %self.name))]
    async fn start(&mut self, work_dir: &Path) -> Result<()> {
        if self.does_session_exist().await {
            return Err(TmuxError::SessionAlreadyExists(self.name.clone()).into());
        }

        self.executor
            .create_session(&self.name, work_dir, &self.program)
            .await?;

        if let Err(e) = self
            .executor
            .set_option(&self.name, "history-limit", "10000")
            .await
        {
            warn!("Failed to raise scrollback on {}: {}", self.name, e);
        }
        if let Err(e) = self.executor.set_option(&self.name, "mouse", "on").await {
            warn!("Failed to enable mouse on {}: {}", self.name, e);
        }

        if let Err(e) = self.wait_for_session().await {
            let _ = self.close().await;
            return Err(e);
        }

        if let Err(e) = self.restore().await {
            let _ = self.close().await;
            return Err(e);
        }

        self.confirm_trust_prompt().await;

        info!("Started session {}", self.name);
        Ok(())
    }

    #[instrument(skip(self), fields(name = %self.name))]
    async fn restore(&mut self) -> Result<()> {
        let pty = pty_process::Pty::new().map_err(TmuxError::from)?;
        pty.resize(pty_process::Size::new(50, 200))
            .map_err(TmuxError::from)?;

        let mut cmd = pty_process::Command::new("tmux");
        cmd.args(["attach-session", "-t", &self.name]);
        let child = cmd.spawn(&pty.pts().map_err(TmuxError::from)?)?;

        self.monitor = Some(MonitorPty { _pty: pty, child });
        self.reset_monitor();
        self.state = SessionState::Attached;

        debug!("Restored monitor PTY for {}", self.name);
        Ok(())
    }

    #[instrument(skip(self), fields(name = %self.name))]
    async fn close(&mut self) -> Result<()> {
        let mut failures = FailureLog::new();

        if let Some(mut monitor) = self.monitor.take() {
            failures.check("detach pty", monitor.child.kill().await);
        }

        if self.executor.session_exists(&self.name).await {
            failures.check("kill session", self.executor.kill_session(&self.name).await);
        }

        self.state = SessionState::Closed;
        failures.finish(|failures| TmuxError::Close { failures }.into())
    }

    async fn detach_safely(&mut self) -> Result<()> {
        if let Some(mut monitor) = self.monitor.take() {
            let _ = monitor.child.kill().await;
        }
        self.state = SessionState::Detached;
        debug!("Detached PTY from {}, session kept alive", self.name);
        Ok(())
    }

    async fn does_session_exist(&self) -> bool {
        self.executor.session_exists(&self.name).await
    }

    async fn capture_pane_content(&self) -> Result<String> {
        self.executor.capture_pane(&self.name).await
    }

    async fn capture_pane_content_with_options(&self, start: &str, end: &str) -> Result<String> {
        self.executor
            .capture_pane_range(&self.name, start, end)
            .await
    }

    async fn send_keys(&self, text: &str) -> Result<()> {
        self.executor.send_text(&self.name, text).await
    }

    async fn tap_enter(&self) -> Result<()> {
        self.executor.send_key(&self.name, "Enter").await
    }

    async fn set_detached_size(&self, width: u16, height: u16) -> Result<()> {
        if matches!(self.state, SessionState::Unstarted | SessionState::Closed) {
            return Ok(());
        }
        self.executor.resize_window(&self.name, width, height).await
    }

    async fn has_updated(&self) -> Result<(bool, bool)> {
        let content = self.capture_pane_content().await?;
        let digest: [u8; 32] = Sha256::digest(content.as_bytes()).into();

        let updated = {
            let mut guard = self
                .last_hash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let changed = guard.map(|prev| prev != digest).unwrap_or(true);
            *guard = Some(digest);
            changed
        };

        let has_prompt = self.agent.has_prompt(&strip_ansi(&content));
        Ok((updated, has_prompt))
    }

    async fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        self.executor.list_windows(&self.name).await
    }

    async fn pane_pid(&self, window_index: usize) -> Result<u32> {
        self.executor.pane_pid(&self.name, window_index).await
    }

    fn attach(&mut self) -> oneshot::Receiver<AttachResult> {
        spawn_attach(&self.name)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_session_name() {
        assert_eq!(sanitize_session_name("Fix Auth"), "squadron_fix_auth");
        assert_eq!(
            sanitize_session_name("  Fix   Auth  Bug "),
            "squadron_fix_auth_bug"
        );
        assert_eq!(sanitize_session_name("Refactor!@#"), "squadron_refactor");
        assert_eq!(sanitize_session_name(""), "squadron_");
    }

    #[test]
    fn test_sanitize_session_name_keeps_allowed_chars() {
        assert_eq!(
            sanitize_session_name("my-task_v2"),
            "squadron_my-task_v2"
        );
    }

    #[test]
    fn test_new_session_initial_state() {
        let session = TmuxSession::new("Fix Auth", "claude");
        assert_eq!(session.state(), SessionState::Unstarted);
        assert_eq!(session.name(), "squadron_fix_auth");
        assert_eq!(session.agent, AgentClass::Claude);
    }

    #[test]
    fn test_reset_monitor_clears_hash() {
        let session = TmuxSession::new("t", "bash");
        {
            let mut guard = session.last_hash.lock().unwrap();
            *guard = Some([7u8; 32]);
        }
        session.reset_monitor();
        assert!(session.last_hash.lock().unwrap().is_none());
    }
}
