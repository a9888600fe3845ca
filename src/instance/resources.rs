//! Process-tree resource observation
//!
//! Walks the process tree rooted at a session's pane PID and aggregates
//! CPU and resident memory. Additional tmux windows are treated as
//! sub-agents; a tool-name heuristic over each window's subtree labels what
//! the sub-agent is doing. Lookup failures leave the caller's previous
//! sample in place so the display never flickers to zero.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::{InstanceError, Result};
use crate::tmux::WindowInfo;

/// Minimum interval between process-tree debug dumps.
const DUMP_INTERVAL: Duration = Duration::from_secs(30);

/// Tool names recognized in a sub-agent's process subtree.
const KNOWN_TOOLS: &[&str] = &["git", "rg", "grep", "node", "python", "cargo", "npm", "go", "make"];

/// Resource usage of one sub-agent window.
#[derive(Debug, Clone, Default)]
pub struct SubAgentUsage {
    /// tmux window index (> 0)
    pub window_index: usize,
    /// Heuristic label, e.g. "running git"
    pub activity: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Aggregated resource usage of an instance.
#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    /// Total %cpu over the whole process tree, sub-agents included
    pub cpu_percent: f32,
    /// Total RSS over the whole process tree, sub-agents included
    pub memory_bytes: u64,
    /// Per-window breakdown for windows beyond the primary
    pub sub_agents: Vec<SubAgentUsage>,
}

/// Stateful sampler; owns the sysinfo handle and the dump rate limiter.
pub struct ResourceSampler {
    system: System,
    last_dump: Option<Instant>,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            last_dump: None,
        }
    }

    /// Sample resource usage for a session's windows.
    ///
    /// `windows[0]` anchors the primary agent; the rest are sub-agents.
    /// Errors mean "no sample this round"; callers keep their last values.
    pub fn sample(&mut self, windows: &[WindowInfo]) -> Result<ResourceUsage> {
        let Some(primary) = windows.first() else {
            return Err(InstanceError::ProcessLookup("no windows in session".to_string()).into());
        };

        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let children = child_index(&self.system);

        let primary_tree = collect_subtree(&self.system, &children, primary.pane_pid);
        if primary_tree.process_count == 0 {
            return Err(InstanceError::ProcessLookup(format!(
                "pane process {} not found",
                primary.pane_pid
            ))
            .into());
        }

        let mut usage = ResourceUsage {
            cpu_percent: primary_tree.cpu_percent,
            memory_bytes: primary_tree.memory_bytes,
            sub_agents: Vec::new(),
        };

        for window in &windows[1..] {
            let tree = collect_subtree(&self.system, &children, window.pane_pid);
            usage.cpu_percent += tree.cpu_percent;
            usage.memory_bytes += tree.memory_bytes;
            usage.sub_agents.push(SubAgentUsage {
                window_index: window.index,
                activity: classify_subtree(&tree.names),
                cpu_percent: tree.cpu_percent,
                memory_bytes: tree.memory_bytes,
            });
        }

        self.maybe_dump(primary.pane_pid, &primary_tree);

        Ok(usage)
    }

    fn maybe_dump(&mut self, root: u32, tree: &Subtree) {
        let due = self
            .last_dump
            .map(|at| at.elapsed() >= DUMP_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_dump = Some(Instant::now());
        debug!(
            "process tree under {}: {} process(es), {:.1}%cpu, {} bytes rss: {:?}",
            root, tree.process_count, tree.cpu_percent, tree.memory_bytes, tree.names
        );
    }
}

struct Subtree {
    cpu_percent: f32,
    memory_bytes: u64,
    process_count: usize,
    names: Vec<String>,
}

fn child_index(system: &System) -> HashMap<Pid, Vec<Pid>> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }
    children
}

fn collect_subtree(system: &System, children: &HashMap<Pid, Vec<Pid>>, root: u32) -> Subtree {
    let mut tree = Subtree {
        cpu_percent: 0.0,
        memory_bytes: 0,
        process_count: 0,
        names: Vec::new(),
    };

    let mut queue = vec![Pid::from_u32(root)];
    while let Some(pid) = queue.pop() {
        if let Some(process) = system.process(pid) {
            tree.cpu_percent += process.cpu_usage();
            tree.memory_bytes += process.memory();
            tree.process_count += 1;
            tree.names
                .push(process.name().to_string_lossy().to_string());
        }
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }

    tree
}

/// Map a process subtree to a sub-agent activity label.
fn classify_subtree(names: &[String]) -> String {
    for name in names {
        let lowered = name.to_lowercase();
        for tool in KNOWN_TOOLS {
            if lowered == *tool || lowered.starts_with(&format!("{tool}-")) {
                return format!("running {tool}");
            }
        }
    }
    "idle".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_subtree_known_tools() {
        let names = vec!["zsh".to_string(), "git".to_string()];
        assert_eq!(classify_subtree(&names), "running git");

        let names = vec!["node".to_string()];
        assert_eq!(classify_subtree(&names), "running node");
    }

    #[test]
    fn test_classify_subtree_idle() {
        let names = vec!["zsh".to_string()];
        assert_eq!(classify_subtree(&names), "idle");
        assert_eq!(classify_subtree(&[]), "idle");
    }

    #[test]
    fn test_sample_without_windows_is_error() {
        let mut sampler = ResourceSampler::new();
        assert!(sampler.sample(&[]).is_err());
    }

    #[test]
    fn test_sample_own_process_tree() {
        let mut sampler = ResourceSampler::new();
        let windows = vec![WindowInfo {
            index: 0,
            name: "test".to_string(),
            pane_pid: std::process::id(),
        }];
        let usage = sampler.sample(&windows).unwrap();
        assert!(usage.memory_bytes > 0);
        assert!(usage.sub_agents.is_empty());
    }

    #[test]
    fn test_sample_dead_pid_is_error() {
        let mut sampler = ResourceSampler::new();
        let windows = vec![WindowInfo {
            index: 0,
            name: "test".to_string(),
            // PIDs this large do not exist on any sane system
            pane_pid: u32::MAX - 1,
        }];
        assert!(sampler.sample(&windows).is_err());
    }
}
