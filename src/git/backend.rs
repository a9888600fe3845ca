//! Read-side git queries via gitoxide
//!
//! Mutations (worktree add/remove, commits, merges) go through the git CLI in
//! [`super::worktree`] and [`super::sync`]; everything read-only is answered
//! here without spawning a process.

use std::path::{Path, PathBuf};

use gix::Repository;
use tracing::{debug, instrument};

use crate::error::{GitError, Result};

/// Read-only handle on a source repository.
pub struct GitBackend {
    /// The gitoxide repository handle
    repo: Repository,
    /// Path to the repository root
    path: PathBuf,
}

impl GitBackend {
    /// Open an existing repository
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let repo = gix::open(&path).map_err(|e| {
            if e.to_string().contains("not a git repository") {
                GitError::NotARepository(path.clone())
            } else {
                GitError::Gix(e.to_string())
            }
        })?;

        debug!("Opened repository at {:?}", path);

        Ok(Self { repo, path })
    }

    /// Discover repository from a path (searches parent directories)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo =
            gix::discover(path).map_err(|_e| GitError::NotARepository(path.to_path_buf()))?;

        let repo_path = repo
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        debug!("Discovered repository at {:?}", repo_path);

        Ok(Self {
            repo,
            path: repo_path,
        })
    }

    /// Get the repository root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the branch currently checked out in this repository.
    ///
    /// Used to refuse resuming an instance whose branch is held by the
    /// host's working tree.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().map_err(|e| GitError::Gix(e.to_string()))?;

        match head.kind {
            gix::head::Kind::Symbolic(reference) => {
                let name = reference.name.shorten().to_string();
                Ok(name)
            }
            gix::head::Kind::Detached { .. } => match head.id() {
                Some(id) => {
                    let id_str = id.to_string();
                    let short = if id_str.len() > 8 { &id_str[..8] } else { &id_str };
                    Ok(format!("HEAD detached at {}", short))
                }
                None => Ok("HEAD (no commits)".to_string()),
            },
            gix::head::Kind::Unborn(full_name) => {
                let name = full_name.shorten().to_string();
                Ok(name)
            }
        }
    }

    /// Check if a local branch exists
    pub fn branch_exists(&self, branch_name: &str) -> Result<bool> {
        let refs = self
            .repo
            .references()
            .map_err(|e| GitError::Gix(e.to_string()))?;

        let branch_ref = format!("refs/heads/{}", branch_name);

        for reference in refs.all().map_err(|e| GitError::Gix(e.to_string()))? {
            match reference {
                Ok(r) => {
                    if r.name().as_bstr() == branch_ref.as_bytes() {
                        return Ok(true);
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(false)
    }

    /// Resolve HEAD to a commit id.
    ///
    /// A repository without an initial commit cannot host worktrees;
    /// that case surfaces as [`GitError::BrandNewRepo`].
    pub fn head_commit_id(&self) -> Result<String> {
        let head = self.repo.head().map_err(|e| GitError::Gix(e.to_string()))?;
        match head.id() {
            Some(id) => Ok(id.to_string()),
            None => Err(GitError::BrandNewRepo(self.path.clone()).into()),
        }
    }

    /// Get the local default branch name (main or master)
    pub fn detect_default_branch(&self) -> Result<String> {
        if self.branch_exists("main")? {
            Ok("main".to_string())
        } else if self.branch_exists("master")? {
            Ok("master".to_string())
        } else {
            self.current_branch()
        }
    }

    /// Get the repository name (directory name)
    pub fn repo_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}
