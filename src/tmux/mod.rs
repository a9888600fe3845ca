//! Terminal-session integration
//!
//! Non-blocking tmux operations behind the [`TerminalSession`] capability:
//! - [`TmuxExecutor`] - Semaphore-controlled async command execution
//! - [`TmuxSession`] - Named detachable session hosting the agent process
//! - [`AgentClass`] - Per-agent trust prompts and awaiting-input markers
//! - [`parse_activity`] - Activity classification from pane content
//! - [`spawn_attach`] - Async PTY-based host terminal bridge

mod activity;
mod agents;
mod attach;
mod executor;
mod session;

pub use activity::*;
pub use agents::*;
pub use attach::*;
pub use executor::*;
pub use session::*;
