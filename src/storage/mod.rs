//! Instance persistence and orchestration
//!
//! [`Storage`] owns the set of instances and serializes them through a
//! [`StateStore`] as a single JSON blob. Mutating operations roll their
//! in-memory change back when persistence fails, so the live set and the
//! blob never drift apart.

mod store;

pub use store::*;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{Result, StorageError};
use crate::git::{DiffStats, SyncOptions, SyncStatus, Worktree};
use crate::instance::{Instance, InstanceOptions, InstanceSnapshot, RestoredState, Status};

/// Persisted record of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceData {
    pub title: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: Status,
    pub program: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_yes: bool,
    pub width: u16,
    pub height: u16,
    pub worktree: WorktreeData,
    pub diff_stats: DiffStatsData,
}

/// Persisted worktree identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeData {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

/// Persisted diff statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffStatsData {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

impl InstanceData {
    fn from_snapshot(snapshot: &InstanceSnapshot) -> Self {
        let worktree = snapshot
            .worktree
            .as_ref()
            .map(|wt| WorktreeData {
                repo_path: wt.repo_path.clone(),
                worktree_path: wt.worktree_path.clone(),
                session_name: wt.session_name.clone(),
                branch_name: wt.branch_name.clone(),
                base_commit_sha: wt.base_commit_sha.clone(),
            })
            .unwrap_or_default();

        Self {
            title: snapshot.title.clone(),
            path: snapshot.path.clone(),
            branch: snapshot.branch.clone(),
            status: snapshot.status,
            program: snapshot.program.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            auto_yes: snapshot.auto_yes,
            width: snapshot.width,
            height: snapshot.height,
            worktree,
            diff_stats: DiffStatsData {
                added: snapshot.diff_stats.added,
                removed: snapshot.diff_stats.removed,
                content: snapshot.diff_stats.content.clone(),
            },
        }
    }
}

/// Container of instances backed by a [`StateStore`].
pub struct Storage {
    store: Box<dyn StateStore>,
    config: Config,
    instances: Mutex<Vec<Arc<Instance>>>,
}

impl Storage {
    pub fn new(store: Box<dyn StateStore>, config: Config) -> Self {
        Self {
            store,
            config,
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Build instance construction options from the configuration.
    pub fn instance_options(&self, title: &str, path: PathBuf, program: &str) -> Result<InstanceOptions> {
        Ok(InstanceOptions {
            title: title.to_string(),
            path,
            program: program.to_string(),
            auto_yes: self.config.auto_yes,
            branch_prefix: self.config.branch_prefix.clone(),
            worktree_root: self.config.worktrees_dir()?,
        })
    }

    /// All managed instances.
    pub async fn list(&self) -> Vec<Arc<Instance>> {
        self.instances.lock().await.clone()
    }

    /// Find by `(title, program)` identity.
    pub async fn get(&self, title: &str, program: &str) -> Option<Arc<Instance>> {
        let instances = self.instances.lock().await;
        for instance in instances.iter() {
            if instance.matches(title, program).await {
                return Some(Arc::clone(instance));
            }
        }
        None
    }

    /// Find all instances whose title matches, regardless of program.
    pub async fn find_by_title(&self, title: &str) -> Vec<Arc<Instance>> {
        let instances = self.instances.lock().await;
        let mut found = Vec::new();
        for instance in instances.iter() {
            if instance.title().await == title {
                found.push(Arc::clone(instance));
            }
        }
        found
    }

    /// Register a new instance and persist the set.
    ///
    /// Duplicate `(title, program)` identities are rejected with the set
    /// unchanged; a persistence failure rolls the registration back.
    #[instrument(skip(self, instance))]
    pub async fn add_instance(&self, instance: Arc<Instance>) -> Result<()> {
        let snapshot = instance.snapshot().await;

        let mut instances = self.instances.lock().await;
        for existing in instances.iter() {
            if existing.matches(&snapshot.title, &snapshot.program).await {
                return Err(StorageError::Duplicate {
                    title: snapshot.title,
                    program: snapshot.program,
                }
                .into());
            }
        }

        instances.push(instance);

        if let Err(e) = self.persist(&instances).await {
            instances.pop();
            return Err(e);
        }

        info!("Added instance '{}'", snapshot.title);
        Ok(())
    }

    /// Remove an instance by identity and persist the set.
    ///
    /// A persistence failure re-inserts the record before returning.
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, title: &str, program: &str) -> Result<()> {
        let mut instances = self.instances.lock().await;

        let mut index = None;
        for (i, instance) in instances.iter().enumerate() {
            if instance.matches(title, program).await {
                index = Some(i);
                break;
            }
        }
        let Some(index) = index else {
            return Err(StorageError::NotFound {
                title: title.to_string(),
                program: program.to_string(),
            }
            .into());
        };

        let removed = instances.remove(index);

        if let Err(e) = self.persist(&instances).await {
            instances.insert(index, removed);
            return Err(e);
        }

        info!("Deleted instance '{}'", title);
        Ok(())
    }

    /// Persist the current state of a known instance.
    #[instrument(skip(self))]
    pub async fn update_instance(&self, title: &str, program: &str) -> Result<()> {
        let instances = self.instances.lock().await;

        let mut found = false;
        for instance in instances.iter() {
            if instance.matches(title, program).await {
                found = true;
                break;
            }
        }
        if !found {
            return Err(StorageError::NotFound {
                title: title.to_string(),
                program: program.to_string(),
            }
            .into());
        }

        self.persist(&instances).await
    }

    /// Serialize and save all started instances.
    pub async fn save_instances(&self) -> Result<()> {
        let instances = self.instances.lock().await;
        self.persist(&instances).await
    }

    async fn persist(&self, instances: &[Arc<Instance>]) -> Result<()> {
        let mut records = Vec::new();
        for instance in instances {
            if !instance.started() {
                continue;
            }
            let snapshot = instance.snapshot().await;
            records.push(InstanceData::from_snapshot(&snapshot));
        }

        let blob = serde_json::to_vec_pretty(&records)
            .map_err(|e| StorageError::Serialize(e.to_string()))?;
        self.store.save_instances(&blob).await
    }

    /// Load the persisted set and reconstruct each instance.
    ///
    /// Paused records come back started-but-paused with a lazy terminal;
    /// running records get their terminal session restored. A failed restore
    /// is logged and the instance kept so the user can kill or restart it.
    #[instrument(skip(self))]
    pub async fn load_instances(&self) -> Result<Vec<Arc<Instance>>> {
        let blob = self.store.get_instances().await?;
        if blob.is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<InstanceData> = serde_json::from_slice(&blob)
            .map_err(|e| StorageError::LoadFailed(format!("parse state blob: {e}")))?;

        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            let instance = match self.reconstruct(record).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("Skipping unrecoverable instance record: {}", e);
                    continue;
                }
            };
            loaded.push(Arc::new(instance));
        }

        let mut instances = self.instances.lock().await;
        *instances = loaded.clone();

        info!("Loaded {} instance(s)", loaded.len());
        Ok(loaded)
    }

    async fn reconstruct(&self, record: InstanceData) -> Result<Instance> {
        let mut opts =
            self.instance_options(&record.title, record.path.clone(), &record.program)?;
        opts.auto_yes = record.auto_yes;

        let worktree = Worktree::from_storage(
            record.worktree.repo_path.clone(),
            record.worktree.worktree_path.clone(),
            &record.worktree.session_name,
            &record.worktree.branch_name,
            &record.worktree.base_commit_sha,
        );

        let instance = Instance::from_storage(
            opts,
            RestoredState {
                branch: record.branch.clone(),
                status: record.status,
                created_at: record.created_at,
                updated_at: record.updated_at,
                width: record.width,
                height: record.height,
                worktree,
                diff_stats: DiffStats {
                    added: record.diff_stats.added,
                    removed: record.diff_stats.removed,
                    content: record.diff_stats.content.clone(),
                    is_uncommitted: true,
                },
            },
        )?;

        if record.status == Status::Paused {
            instance.mark_started_paused().await;
        } else if let Err(e) = instance.start(false).await {
            warn!(
                "Could not restore terminal for '{}': {}",
                record.title, e
            );
        }

        Ok(instance)
    }

    /// Drop everything, in memory and in the store.
    pub async fn delete_all_instances(&self) -> Result<()> {
        let mut instances = self.instances.lock().await;
        instances.clear();
        self.store.delete_all_instances().await
    }

    /// Run a sync pass over the selected instances (all started ones when
    /// `titles` is empty) and return per-instance outcomes.
    pub async fn sync_instances(&self, titles: &[String], opts: &SyncOptions) -> Vec<SyncStatus> {
        let instances = self.instances.lock().await;

        let mut results = Vec::new();
        for instance in instances.iter() {
            if !instance.started() {
                continue;
            }
            let title = instance.title().await;
            if !titles.is_empty() && !titles.contains(&title) {
                continue;
            }
            results.push(instance.sync(opts).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage(dir: &TempDir) -> Storage {
        let store = FileStateStore::new(dir.path().join("instances.json"));
        let config = Config {
            worktrees_dir: Some(dir.path().join("worktrees")),
            ..Default::default()
        };
        Storage::new(Box::new(store), config)
    }

    fn test_instance(storage: &Storage, title: &str) -> Arc<Instance> {
        let opts = storage
            .instance_options(title, PathBuf::from("/tmp/repo"), "bash")
            .unwrap();
        Arc::new(Instance::new(opts).unwrap())
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        let instance = test_instance(&storage, "fix-auth");
        storage.add_instance(instance).await.unwrap();

        assert!(storage.get("fix-auth", "bash").await.is_some());
        assert!(storage.get("fix-auth", "claude").await.is_none());
        assert_eq!(storage.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        storage
            .add_instance(test_instance(&storage, "fix-auth"))
            .await
            .unwrap();
        let err = storage
            .add_instance(test_instance(&storage, "fix-auth"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(storage.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        let err = storage.delete_instance("ghost", "bash").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_removes() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        storage
            .add_instance(test_instance(&storage, "fix-auth"))
            .await
            .unwrap();
        storage.delete_instance("fix-auth", "bash").await.unwrap();
        assert!(storage.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unstarted_instances_not_persisted() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        storage
            .add_instance(test_instance(&storage, "fix-auth"))
            .await
            .unwrap();
        storage.save_instances().await.unwrap();

        let loaded = storage.load_instances().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_paused_instance_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        let instance = test_instance(&storage, "fix-auth");
        // Simulate a started-then-paused lifecycle without git or tmux.
        instance.mark_started_paused().await;
        storage.add_instance(instance).await.unwrap();

        let loaded = storage.load_instances().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].started());
        assert_eq!(loaded[0].status().await, Status::Paused);
        assert_eq!(loaded[0].title().await, "fix-auth");
    }

    #[tokio::test]
    async fn test_delete_all() {
        let dir = TempDir::new().unwrap();
        let storage = test_storage(&dir);

        storage
            .add_instance(test_instance(&storage, "one"))
            .await
            .unwrap();
        storage
            .add_instance(test_instance(&storage, "two"))
            .await
            .unwrap();
        storage.delete_all_instances().await.unwrap();

        assert!(storage.list().await.is_empty());
        assert!(storage.load_instances().await.unwrap().is_empty());
    }

    #[test]
    fn test_instance_data_schema() {
        let json = serde_json::json!({
            "title": "fix-auth",
            "path": "/tmp/repo",
            "branch": "squadron/fix-auth",
            "status": "paused",
            "program": "claude",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z",
            "auto_yes": false,
            "width": 120,
            "height": 40,
            "worktree": {
                "repo_path": "/tmp/repo",
                "worktree_path": "/tmp/worktrees/repo/fix-auth_1",
                "session_name": "fix-auth",
                "branch_name": "squadron/fix-auth",
                "base_commit_sha": "abc123"
            },
            "diff_stats": {"added": 3, "removed": 1, "content": "+x\n"}
        });

        let record: InstanceData = serde_json::from_value(json).unwrap();
        assert_eq!(record.title, "fix-auth");
        assert_eq!(record.status, Status::Paused);
        assert_eq!(record.worktree.base_commit_sha, "abc123");
        assert_eq!(record.diff_stats.added, 3);
    }
}
