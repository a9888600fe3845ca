//! Per-agent knowledge
//!
//! The supported coding agents differ in two observable ways: the
//! trust-the-workspace confirmation they show on first launch, and the
//! phrases that mark "awaiting user input". Both live here so every
//! agent-specific string has a single home.

use std::time::Duration;

/// Which class of agent a program command line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentClass {
    Claude,
    Aider,
    Gemini,
    /// Anything else (plain shells, custom tools)
    Other,
}

/// First-launch trust confirmation shown by an agent.
#[derive(Debug, Clone, Copy)]
pub struct TrustPrompt {
    /// Phrase to look for in ANSI-stripped pane content
    pub phrase: &'static str,
    /// Key sequence (tmux key names) that accepts the prompt
    pub confirm_keys: &'static [&'static str],
    /// How long to keep watching for the prompt after launch
    pub budget: Duration,
}

impl AgentClass {
    /// Classify a program command line by its executable name.
    pub fn from_program(program: &str) -> Self {
        let exe = program
            .split_whitespace()
            .next()
            .unwrap_or("")
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_lowercase();

        if exe.contains("claude") {
            Self::Claude
        } else if exe.contains("aider") {
            Self::Aider
        } else if exe.contains("gemini") {
            Self::Gemini
        } else {
            Self::Other
        }
    }

    /// The trust confirmation this agent shows on first launch, if any.
    pub fn trust_prompt(&self) -> Option<TrustPrompt> {
        match self {
            Self::Claude => Some(TrustPrompt {
                phrase: "Do you trust the files in this folder?",
                confirm_keys: &["Enter"],
                budget: Duration::from_secs(30),
            }),
            Self::Aider => Some(TrustPrompt {
                phrase: "(Y)es/(N)o",
                confirm_keys: &["y", "Enter"],
                budget: Duration::from_secs(45),
            }),
            Self::Gemini => Some(TrustPrompt {
                phrase: "Do you trust this folder?",
                confirm_keys: &["Enter"],
                budget: Duration::from_secs(30),
            }),
            Self::Other => None,
        }
    }

    /// Substrings that mark the agent as awaiting user input.
    pub fn prompt_markers(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &[
                "No, and tell Claude what to do differently",
                "Do you want to proceed?",
            ],
            Self::Aider => &["(Y)es/(N)o"],
            Self::Gemini => &["Apply this change?", "Do you want to proceed?"],
            Self::Other => &[],
        }
    }

    /// Whether `content` (already ANSI-stripped) shows an awaiting-input prompt.
    pub fn has_prompt(&self, content: &str) -> bool {
        self.prompt_markers().iter().any(|m| content.contains(m))
    }
}
