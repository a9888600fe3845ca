//! Integration tests for squadron
//!
//! Tests touching terminals require tmux to be installed; they skip
//! themselves otherwise. All state lives in temp directories so the tests
//! never pollute user data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use squadron::config::Config;
use squadron::git::{DiffStats, Worktree};
use squadron::instance::{Instance, InstanceOptions, Status};
use squadron::storage::{FileStateStore, Storage};
use squadron::tmux::sanitize_session_name;

/// Run a git command in `dir`, panicking on failure.
async fn git(dir: &Path, args: &[&str]) -> String {
    let output = tokio::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Create a repository with one commit.
async fn create_test_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = temp_dir.path().to_path_buf();

    git(&repo_path, &["init"]).await;
    git(&repo_path, &["config", "user.email", "test@test.com"]).await;
    git(&repo_path, &["config", "user.name", "Test User"]).await;

    tokio::fs::write(repo_path.join("README.md"), "# Test Repository\n")
        .await
        .unwrap();
    git(&repo_path, &["add", "README.md"]).await;
    git(&repo_path, &["commit", "-m", "Initial commit"]).await;

    (temp_dir, repo_path)
}

async fn tmux_available() -> bool {
    tokio::process::Command::new("tmux")
        .arg("-V")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn branch_exists(repo: &Path, branch: &str) -> bool {
    tokio::process::Command::new("git")
        .current_dir(repo)
        .args(["show-ref", "--verify", &format!("refs/heads/{branch}")])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn tmux_session_exists(name: &str) -> bool {
    tokio::process::Command::new("tmux")
        .args(["has-session", "-t", &format!("={name}")])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn instance_options(title: &str, repo: &Path, worktrees: &Path) -> InstanceOptions {
    InstanceOptions {
        title: title.to_string(),
        path: repo.to_path_buf(),
        program: "bash".to_string(),
        auto_yes: false,
        branch_prefix: "squadron/".to_string(),
        worktree_root: worktrees.to_path_buf(),
    }
}

#[tokio::test]
async fn test_worktree_setup_remove_cleanup() {
    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let (mut wt, branch) = Worktree::new(
        repo_path.clone(),
        "feature work",
        "squadron/",
        worktrees.path(),
    );
    assert_eq!(branch, "squadron/feature-work");

    wt.setup().await.unwrap();
    assert!(wt.path().exists());
    assert!(!wt.base_commit_sha().is_empty());
    assert!(branch_exists(&repo_path, &branch).await);
    let base = wt.base_commit_sha().to_string();

    // Advance the branch so re-attaching has a newer HEAD to tempt it with
    tokio::fs::write(wt.path().join("more.txt"), "more\n")
        .await
        .unwrap();
    wt.commit_changes("advance branch").await.unwrap();

    // Remove detaches the checkout but keeps the branch
    wt.remove().await.unwrap();
    assert!(!wt.path().exists());
    assert!(branch_exists(&repo_path, &branch).await);

    // Setup again re-attaches the existing branch; the diff base stays at
    // the original fork point
    wt.setup().await.unwrap();
    assert!(wt.path().exists());
    assert_eq!(wt.base_commit_sha(), base);

    // Cleanup removes checkout and branch
    wt.cleanup().await.unwrap();
    assert!(!wt.path().exists());
    assert!(!branch_exists(&repo_path, &branch).await);
}

#[tokio::test]
async fn test_setup_on_empty_repo_is_brand_new_repo() {
    let temp_dir = TempDir::new().unwrap();
    let repo_path = temp_dir.path().to_path_buf();
    git(&repo_path, &["init"]).await;

    let worktrees = TempDir::new().unwrap();
    let (mut wt, _) = Worktree::new(repo_path, "feature", "squadron/", worktrees.path());

    let err = wt.setup().await.unwrap_err();
    assert!(
        err.to_string().contains("no commits"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_diff_counts_exclude_file_headers() {
    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let (mut wt, _) = Worktree::new(repo_path, "diff test", "squadron/", worktrees.path());
    wt.setup().await.unwrap();

    tokio::fs::write(wt.path().join("a"), "hello\n").await.unwrap();

    let stats = wt.diff().await.unwrap();
    assert_eq!(stats.added, 1, "diff content: {}", stats.content);
    assert_eq!(stats.removed, 0);
    assert!(stats.content.contains("+++"));

    wt.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_diff_uncommitted_or_last_commit() {
    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let (mut wt, _) = Worktree::new(repo_path, "last commit", "squadron/", worktrees.path());
    wt.setup().await.unwrap();

    // Clean worktree on a parentless HEAD falls back to showing HEAD
    let stats = wt.diff_uncommitted_or_last_commit().await.unwrap();
    assert!(!stats.is_uncommitted);
    assert!(stats.content.contains("Initial commit"));

    // Dirty worktree prefers the uncommitted changes
    tokio::fs::write(wt.path().join("b"), "new file\n")
        .await
        .unwrap();
    let stats = wt.diff_uncommitted_or_last_commit().await.unwrap();
    assert!(stats.is_uncommitted);
    assert_eq!(stats.added, 1);

    wt.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_commit_changes_idempotent_when_clean() {
    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let (mut wt, _) = Worktree::new(repo_path, "commits", "squadron/", worktrees.path());
    wt.setup().await.unwrap();

    let before = git(wt.path(), &["rev-parse", "HEAD"]).await;
    wt.commit_changes("nothing to do").await.unwrap();
    let after = git(wt.path(), &["rev-parse", "HEAD"]).await;
    assert_eq!(before, after);

    tokio::fs::write(wt.path().join("c"), "dirty\n").await.unwrap();
    assert!(wt.is_dirty().await.unwrap());
    wt.commit_changes("pick up changes").await.unwrap();
    assert!(!wt.is_dirty().await.unwrap());
    let committed = git(wt.path(), &["rev-parse", "HEAD"]).await;
    assert_ne!(before, committed);

    wt.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_instance_lifecycle() {
    if !tmux_available().await {
        eprintln!("Skipping test: tmux not available");
        return;
    }

    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let instance = Instance::new(instance_options("fix-auth", &repo_path, worktrees.path()))
        .unwrap();

    instance.start(true).await.unwrap();
    assert!(instance.started());
    assert_eq!(instance.status().await, Status::Running);
    assert_eq!(instance.branch().await, "squadron/fix-auth");

    let snapshot = instance.snapshot().await;
    let worktree_path = snapshot.worktree.as_ref().unwrap().worktree_path.clone();
    assert!(worktree_path.exists());

    // Pause: worktree gone, branch preserved, session kept alive
    instance.pause().await.unwrap();
    assert_eq!(instance.status().await, Status::Paused);
    assert!(!worktree_path.exists());
    assert!(branch_exists(&repo_path, "squadron/fix-auth").await);
    assert_eq!(instance.preview().await.unwrap(), "");

    // Resume: worktree recreated
    instance.resume().await.unwrap();
    assert_eq!(instance.status().await, Status::Running);
    assert!(worktree_path.exists());

    // Kill: session and branch both gone
    let session_name = sanitize_session_name("fix-auth");
    instance.kill().await.unwrap();
    assert!(!instance.started());
    assert!(!tmux_session_exists(&session_name).await);
    assert!(!branch_exists(&repo_path, "squadron/fix-auth").await);
}

#[tokio::test]
async fn test_pause_auto_commits_dirty_worktree() {
    if !tmux_available().await {
        eprintln!("Skipping test: tmux not available");
        return;
    }

    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let instance = Instance::new(instance_options("dirty-pause", &repo_path, worktrees.path()))
        .unwrap();
    instance.start(true).await.unwrap();

    let snapshot = instance.snapshot().await;
    let worktree_path = snapshot.worktree.as_ref().unwrap().worktree_path.clone();
    let base = snapshot.worktree.as_ref().unwrap().base_commit_sha.clone();

    tokio::fs::write(worktree_path.join("wip.txt"), "work in progress\n")
        .await
        .unwrap();

    instance.pause().await.unwrap();

    // The branch gained exactly the auto-commit on top of the base commit
    let head = git(&repo_path, &["rev-parse", "squadron/dirty-pause"]).await;
    assert_ne!(head.trim(), base);
    let message = git(
        &repo_path,
        &["log", "-1", "--format=%s", "squadron/dirty-pause"],
    )
    .await;
    assert!(message.contains("update from 'dirty-pause'"));
    assert!(message.contains("(paused)"));

    instance.resume().await.unwrap();
    instance.kill().await.unwrap();
}

#[tokio::test]
async fn test_failed_start_rolls_back_worktree_and_branch() {
    if !tmux_available().await {
        eprintln!("Skipping test: tmux not available");
        return;
    }

    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    // Occupy the session name so the terminal start fails after the
    // worktree was provisioned.
    let session_name = sanitize_session_name("collide");
    let created = tokio::process::Command::new("tmux")
        .args(["new-session", "-d", "-s", &session_name, "sleep", "60"])
        .output()
        .await
        .unwrap();
    assert!(created.status.success());

    let instance =
        Instance::new(instance_options("collide", &repo_path, worktrees.path())).unwrap();

    let err = instance.start(true).await.unwrap_err();
    assert!(
        err.to_string().contains("already exists"),
        "unexpected error: {err}"
    );
    assert!(!instance.started());
    assert!(!branch_exists(&repo_path, "squadron/collide").await);

    let _ = tokio::process::Command::new("tmux")
        .args(["kill-session", "-t", &session_name])
        .output()
        .await;
}

#[tokio::test]
async fn test_storage_roundtrip_over_lifecycle() {
    if !tmux_available().await {
        eprintln!("Skipping test: tmux not available");
        return;
    }

    let (_repo_dir, repo_path) = create_test_repo().await;
    let state_dir = TempDir::new().unwrap();
    let worktrees = TempDir::new().unwrap();

    let config = Config {
        worktrees_dir: Some(worktrees.path().to_path_buf()),
        default_program: "bash".to_string(),
        ..Default::default()
    };
    let store = FileStateStore::new(state_dir.path().join("instances.json"));
    let storage = Storage::new(Box::new(store), config.clone());

    let instance = Arc::new(
        Instance::new(instance_options("persisted", &repo_path, worktrees.path())).unwrap(),
    );
    instance.start(true).await.unwrap();
    storage.add_instance(Arc::clone(&instance)).await.unwrap();
    instance.pause().await.unwrap();
    storage.save_instances().await.unwrap();

    // A second storage over the same blob reconstructs the paused instance
    let store = FileStateStore::new(state_dir.path().join("instances.json"));
    let reloaded_storage = Storage::new(Box::new(store), config);
    let loaded = reloaded_storage.load_instances().await.unwrap();
    assert_eq!(loaded.len(), 1);

    let restored = &loaded[0];
    assert!(restored.started());
    assert_eq!(restored.status().await, Status::Paused);
    assert_eq!(restored.title().await, "persisted");
    assert_eq!(restored.branch().await, "squadron/persisted");

    // The restored instance can resume and be killed
    restored.resume().await.unwrap();
    assert_eq!(restored.status().await, Status::Running);
    restored.kill().await.unwrap();
}

#[tokio::test]
async fn test_send_prompt_reaches_agent() {
    if !tmux_available().await {
        eprintln!("Skipping test: tmux not available");
        return;
    }

    let (_repo_dir, repo_path) = create_test_repo().await;
    let worktrees = TempDir::new().unwrap();

    let instance =
        Instance::new(instance_options("prompted", &repo_path, worktrees.path())).unwrap();
    instance.start(true).await.unwrap();

    instance.send_prompt("echo squadron-marker").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let preview = instance.preview().await.unwrap();
    assert!(
        preview.contains("squadron-marker"),
        "pane content: {preview}"
    );

    instance.kill().await.unwrap();
}

#[tokio::test]
async fn test_empty_diff_stats_before_provisioning() {
    let worktrees = TempDir::new().unwrap();
    let (wt, _) = Worktree::new("/tmp/repo", "unprovisioned", "squadron/", worktrees.path());

    // No base commit recorded yet: empty stats, not an error
    let stats = wt.diff().await.unwrap();
    assert!(stats.is_empty());
    assert_eq!(stats.added, 0);
    assert_eq!(stats.removed, 0);
}

#[test]
fn test_diff_stats_from_fixture() {
    let diff = "--- a/a\n+++ b/a\n@@ -0,0 +1 @@\n+one added line\n";
    let stats = DiffStats::from_content(diff.to_string(), true);
    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 0);
}
