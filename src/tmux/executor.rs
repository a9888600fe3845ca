//! Async tmux command executor with semaphore-controlled concurrency
//!
//! Provides non-blocking tmux command execution with:
//! - Semaphore to limit concurrent commands (default: 16)
//! - Timeout handling
//! - Structured output parsing

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{Result, TmuxError};

/// Default maximum concurrent tmux commands
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Default command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A window inside a tmux session, as reported by `list-windows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Window index within the session
    pub index: usize,
    /// Window name
    pub name: String,
    /// PID of the window's active pane process
    pub pane_pid: u32,
}

/// Async tmux command executor
///
/// Uses a semaphore to limit concurrent tmux commands, preventing
/// resource exhaustion when managing many sessions.
#[derive(Clone)]
pub struct TmuxExecutor {
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    /// Command timeout
    timeout: Duration,
}

impl TmuxExecutor {
    /// Create a new executor with default settings
    pub fn new() -> Self {
        Self::with_max_concurrent(DEFAULT_MAX_CONCURRENT)
    }

    /// Create an executor with custom concurrency limit
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if tmux is installed and accessible
    pub async fn check_installed(&self) -> Result<()> {
        let output = Command::new("tmux")
            .arg("-V")
            .output()
            .await
            .map_err(|_| TmuxError::NotInstalled)?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            debug!("tmux version: {}", version.trim());
            Ok(())
        } else {
            Err(TmuxError::NotInstalled.into())
        }
    }

    /// Execute a tmux command and return its output
    #[instrument(skip(self), fields(args = ?args))]
    pub async fn execute(&self, args: &[&str]) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TmuxError::SemaphoreError)?;

        let mut cmd = Command::new("tmux");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let result = timeout(self.timeout, cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    Err(TmuxError::CommandFailed {
                        command: format!("tmux {}", args.join(" ")),
                        stderr,
                    }
                    .into())
                }
            }
            Ok(Err(e)) => {
                warn!("tmux command failed: {}", e);
                Err(TmuxError::CommandFailed {
                    command: format!("tmux {}", args.join(" ")),
                    stderr: e.to_string(),
                }
                .into())
            }
            Err(_) => Err(TmuxError::Timeout(self.timeout).into()),
        }
    }

    /// Check if a tmux session exists
    pub async fn session_exists(&self, session_name: &str) -> bool {
        let target = format!("={session_name}");
        self.execute(&["has-session", "-t", &target]).await.is_ok()
    }

    /// Create a new detached session running `program` with `working_dir` as cwd.
    pub async fn create_session(
        &self,
        session_name: &str,
        working_dir: &Path,
        program: &str,
    ) -> Result<()> {
        let working_dir_str = working_dir.to_str().unwrap_or(".");

        self.execute(&[
            "new-session",
            "-d",
            "-s",
            session_name,
            "-c",
            working_dir_str,
            program,
        ])
        .await?;

        Ok(())
    }

    /// Set a session option.
    pub async fn set_option(&self, session_name: &str, option: &str, value: &str) -> Result<()> {
        self.execute(&["set-option", "-t", session_name, option, value])
            .await?;
        Ok(())
    }

    /// Kill a tmux session
    pub async fn kill_session(&self, session_name: &str) -> Result<()> {
        self.execute(&["kill-session", "-t", session_name]).await?;
        Ok(())
    }

    /// Send literal text to a session (no trailing newline).
    pub async fn send_text(&self, session_name: &str, text: &str) -> Result<()> {
        self.execute(&["send-keys", "-t", session_name, "-l", "--", text])
            .await?;
        Ok(())
    }

    /// Send a named tmux key (e.g. `Enter`, `Escape`) to a session.
    pub async fn send_key(&self, session_name: &str, key: &str) -> Result<()> {
        self.execute(&["send-keys", "-t", session_name, key]).await?;
        Ok(())
    }

    /// Capture the visible pane content of a session.
    pub async fn capture_pane(&self, session_name: &str) -> Result<String> {
        self.execute(&["capture-pane", "-t", session_name, "-p"])
            .await
            .map_err(|e| TmuxError::CaptureFailed(e.to_string()).into())
    }

    /// Capture an arbitrary scrollback slice; `"-"` for either bound means
    /// the start or end of history.
    pub async fn capture_pane_range(
        &self,
        session_name: &str,
        start_line: &str,
        end_line: &str,
    ) -> Result<String> {
        self.execute(&[
            "capture-pane",
            "-t",
            session_name,
            "-p",
            "-S",
            start_line,
            "-E",
            end_line,
        ])
        .await
        .map_err(|e| TmuxError::CaptureFailed(e.to_string()).into())
    }

    /// Resize the detached session's window.
    pub async fn resize_window(&self, session_name: &str, width: u16, height: u16) -> Result<()> {
        let w = width.to_string();
        let h = height.to_string();
        self.execute(&["resize-window", "-t", session_name, "-x", &w, "-y", &h])
            .await?;
        Ok(())
    }

    /// Enumerate windows of a session with their active-pane PIDs.
    pub async fn list_windows(&self, session_name: &str) -> Result<Vec<WindowInfo>> {
        let output = self
            .execute(&[
                "list-windows",
                "-t",
                session_name,
                "-F",
                "#{window_index} #{window_name} #{pane_pid}",
            ])
            .await?;

        parse_window_list(&output)
    }

    /// PID of the active pane process in the given window.
    pub async fn pane_pid(&self, session_name: &str, window_index: usize) -> Result<u32> {
        let target = format!("{session_name}:{window_index}");
        let output = self
            .execute(&["display-message", "-p", "-t", &target, "#{pane_pid}"])
            .await?;

        output
            .trim()
            .parse::<u32>()
            .map_err(|_| TmuxError::ParseError(format!("pane pid: {:?}", output.trim())).into())
    }
}

fn parse_window_list(output: &str) -> Result<Vec<WindowInfo>> {
    let mut windows = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(index), Some(name), Some(pid)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TmuxError::ParseError(format!("window line: {line:?}")).into());
        };
        windows.push(WindowInfo {
            index: index
                .parse()
                .map_err(|_| TmuxError::ParseError(format!("window index: {index:?}")))?,
            name: name.to_string(),
            pane_pid: pid
                .parse()
                .map_err(|_| TmuxError::ParseError(format!("pane pid: {pid:?}")))?,
        });
    }
    Ok(windows)
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self::new()
    }
}
