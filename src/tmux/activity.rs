//! Agent activity detection from pane content
//!
//! Scans the tail of a captured pane for agent status lines and classifies
//! what the agent is doing right now. The scan runs bottom-up over the last
//! 30 lines so the most recent status wins; ANSI escapes are stripped first,
//! making the result invariant under terminal styling.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::AgentClass;

/// Lines from the bottom of the pane considered for activity detection.
const SCAN_WINDOW: usize = 30;

/// Maximum detail length, including the `...` suffix.
const DETAIL_MAX: usize = 40;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

static EDITING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:Editing|Writing)\s+(.+)").unwrap());
static READING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Reading\s+(.+)").unwrap());
static RUNNING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Running\s+(.+)").unwrap());
static SEARCHING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Searching").unwrap());
static WORKING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Working").unwrap());
static SHELL_PROMPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$\s+(.+)").unwrap());

/// What the agent appears to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    Editing,
    Reading,
    Running,
    Searching,
    Working,
}

impl std::fmt::Display for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Editing => write!(f, "editing"),
            Self::Reading => write!(f, "reading"),
            Self::Running => write!(f, "running"),
            Self::Searching => write!(f, "searching"),
            Self::Working => write!(f, "working"),
        }
    }
}

/// A classified agent activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub action: AgentAction,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Strip `ESC [ ... letter` escape sequences.
pub fn strip_ansi(content: &str) -> String {
    ANSI_ESCAPE.replace_all(content, "").to_string()
}

/// Classify the current agent activity from raw pane content.
///
/// Returns `None` when no status line appears within the scan window.
pub fn parse_activity(content: &str, program: &str) -> Option<Activity> {
    let class = AgentClass::from_program(program);
    let stripped = strip_ansi(content);

    let lines: Vec<&str> = stripped.lines().collect();
    let window = lines.len().saturating_sub(SCAN_WINDOW);

    for line in lines[window..].iter().rev() {
        if let Some(activity) = classify_line(line, class) {
            return Some(activity);
        }
    }

    None
}

fn classify_line(line: &str, class: AgentClass) -> Option<Activity> {
    match class {
        AgentClass::Claude | AgentClass::Gemini => {
            if let Some(caps) = EDITING.captures(line) {
                return Some(activity(AgentAction::Editing, file_detail(&caps[1])));
            }
            if let Some(caps) = READING.captures(line) {
                return Some(activity(AgentAction::Reading, file_detail(&caps[1])));
            }
            if let Some(caps) = RUNNING.captures(line) {
                return Some(activity(AgentAction::Running, caps[1].trim().to_string()));
            }
            if SEARCHING.is_match(line) {
                return Some(activity(AgentAction::Searching, String::new()));
            }
            if WORKING.is_match(line) {
                return Some(activity(AgentAction::Working, String::new()));
            }
            shell_prompt(line)
        }
        AgentClass::Aider => EDITING
            .captures(line)
            .map(|caps| activity(AgentAction::Editing, file_detail(&caps[1]))),
        AgentClass::Other => shell_prompt(line),
    }
}

fn shell_prompt(line: &str) -> Option<Activity> {
    SHELL_PROMPT
        .captures(line)
        .map(|caps| activity(AgentAction::Running, caps[1].trim().to_string()))
}

fn activity(action: AgentAction, detail: String) -> Activity {
    Activity {
        action,
        detail: truncate_detail(&detail),
        timestamp: Utc::now(),
    }
}

/// Collapse a file path to its basename.
fn file_detail(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// Cap detail at 40 characters, ending in `...` when truncated.
fn truncate_detail(detail: &str) -> String {
    let chars: Vec<char> = detail.chars().collect();
    if chars.len() <= DETAIL_MAX {
        detail.to_string()
    } else {
        let mut out: String = chars[..DETAIL_MAX - 3].iter().collect();
        out.push_str("...");
        out
    }
}
