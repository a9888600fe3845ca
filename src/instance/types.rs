//! Instance status and loading stages

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Constructed but not yet started
    Ready,
    /// Agent process alive in its worktree
    Running,
    /// A transition is in flight
    Loading,
    /// Terminal detached, worktree removed, branch preserved
    Paused,
}

impl Status {
    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Loading => write!(f, "loading"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Substage text shown while an instance is `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStage {
    #[default]
    Initializing,
    CreatingWorktree,
    SettingUpWorktree,
    StartingSession,
    Ready,
}

impl fmt::Display for LoadingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing…"),
            Self::CreatingWorktree => write!(f, "Creating git worktree…"),
            Self::SettingUpWorktree => write!(f, "Setting up git worktree…"),
            Self::StartingSession => write!(f, "Starting tmux session…"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(Status::Running.can_pause());
        assert!(!Status::Running.can_resume());
        assert!(Status::Paused.can_resume());
        assert!(!Status::Paused.can_pause());
        assert!(!Status::Ready.can_pause());
        assert!(!Status::Loading.can_pause());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Running.to_string(), "running");
        assert_eq!(Status::Paused.to_string(), "paused");
    }

    #[test]
    fn test_loading_stage_text() {
        assert_eq!(LoadingStage::Initializing.to_string(), "Initializing…");
        assert_eq!(
            LoadingStage::CreatingWorktree.to_string(),
            "Creating git worktree…"
        );
        assert_eq!(
            LoadingStage::StartingSession.to_string(),
            "Starting tmux session…"
        );
        assert_eq!(LoadingStage::Ready.to_string(), "Ready");
    }
}
