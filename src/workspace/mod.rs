mod shell;

pub use shell::{GitShell, WorktreeEntry};

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{error, info, warn};

use crate::error::{HConductorError, Result};

#[derive(Debug, Clone)]
pub struct Workspace {
    pub task_id: String,
    pub branch_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub success: bool,
    pub message: String,
}

/// Creates, merges, and destroys branch-scoped working copies. A faulty or
/// malicious generation is confined to its own worktree and branch.
pub struct WorkspaceManager {
    git: GitShell,
    repo_path: PathBuf,
    base_dir: PathBuf,
    disk_threshold: f64,
}

fn worktree_dir_name(task_id: &str) -> String {
    format!("hc_worktree_{task_id}")
}

fn attempt_branch_name(task_id: &str, attempt: u32) -> String {
    format!("feature/{task_id}_attempt_{attempt}")
}

impl WorkspaceManager {
    pub fn new(repo_path: PathBuf, base_dir: PathBuf, disk_threshold: f64) -> Self {
        Self {
            git: GitShell::new(repo_path.clone()),
            repo_path,
            base_dir,
            disk_threshold,
        }
    }

    /// Preflight disk check; creates a new attempt branch and attaches a
    /// fresh worktree. On any failure, undoes whatever partial state it left
    /// behind (directory, branch, stale metadata) before returning.
    pub async fn create(&self, task_id: &str, attempt: u32) -> Result<Workspace> {
        self.check_disk_usage()?;

        let branch_name = attempt_branch_name(task_id, attempt);
        let path = self.base_dir.join(worktree_dir_name(task_id));

        match self.git.create_worktree(&path, &branch_name).await {
            Ok(()) => Ok(Workspace {
                task_id: task_id.to_string(),
                branch_name,
                path,
            }),
            Err(e) => {
                self.rollback_partial_create(&path, &branch_name).await;
                Err(HConductorError::resource(format!(
                    "failed to create workspace for task '{task_id}': {e}"
                )))
            }
        }
    }

    async fn rollback_partial_create(&self, path: &Path, branch_name: &str) {
        if path.exists() {
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = self.git.delete_branch(branch_name).await;
        let _ = self.git.prune().await;
    }

    fn check_disk_usage(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let stat = nix::sys::statvfs::statvfs(&self.repo_path)
                .map_err(|e| HConductorError::resource(format!("failed to stat filesystem: {e}")))?;
            let total = stat.blocks() as f64;
            let free = stat.blocks_available() as f64;
            if total > 0.0 {
                let used_fraction = 1.0 - (free / total);
                if used_fraction > self.disk_threshold {
                    return Err(HConductorError::resource(format!(
                        "disk usage {used_fraction:.2} exceeds threshold {:.2}",
                        self.disk_threshold
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fast-forward-only merge. On non-fast-forward, returns a failed outcome
    /// and leaves the workspace untouched for inspection. On success, invokes
    /// cleanup of the workspace.
    pub async fn merge(&self, workspace: &Workspace, target_branch: &str) -> Result<MergeOutcome> {
        self.git.checkout(&self.repo_path, target_branch).await?;

        match self.git.merge_fast_forward_only(&self.repo_path, &workspace.branch_name).await {
            Ok(()) => {
                self.cleanup(&workspace.task_id, &workspace.path, &workspace.branch_name, true)
                    .await?;
                Ok(MergeOutcome {
                    success: true,
                    message: format!("merged {} into {target_branch}", workspace.branch_name),
                })
            }
            Err(e) => Ok(MergeOutcome {
                success: false,
                message: e.to_string(),
            }),
        }
    }

    /// Idempotent removal of the working copy; falls back to filesystem
    /// removal if the git call fails, then prunes metadata. Never errors on
    /// a repeat invocation.
    pub async fn cleanup(&self, task_id: &str, path: &Path, branch_name: &str, delete_branch: bool) -> Result<()> {
        if path.exists() {
            if let Err(e) = self.git.remove_worktree(path, true).await {
                warn!(task_id, %e, "git worktree remove failed, falling back to filesystem removal");
                if let Err(e) = std::fs::remove_dir_all(path) {
                    error!(task_id, %e, "filesystem removal also failed");
                }
            }
        }

        if let Err(e) = self.git.prune().await {
            warn!(task_id, %e, "worktree prune failed during cleanup");
        }

        if delete_branch {
            for branch in self
                .git
                .list_branches_matching(&format!("feature/{task_id}_attempt_"))
                .await
                .unwrap_or_default()
            {
                let _ = self.git.delete_branch(&branch).await;
            }
        }

        info!(task_id, "workspace cleaned up");
        Ok(())
    }

    /// Enumerates registered worktrees and filesystem directories matching
    /// the naming convention that are not registered with git; these are
    /// orphans left behind by a prior crash.
    pub async fn find_orphaned(&self) -> Result<Vec<PathBuf>> {
        let registered: Vec<PathBuf> = self.git.list_worktrees().await?.into_iter().map(|w| w.path).collect();
        let name_re = Regex::new(r"^hc_worktree_").expect("static pattern compiles");

        let mut orphaned = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.base_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name_re.is_match(name) && !registered.contains(&path) {
                    orphaned.push(path);
                }
            }
        }
        Ok(orphaned)
    }

    /// Deletes every orphaned directory and prunes git metadata. Called once
    /// at process start, and independently callable thereafter.
    pub async fn cleanup_orphaned(&self) -> Result<usize> {
        let orphaned = self.find_orphaned().await?;
        for path in &orphaned {
            if let Err(e) = std::fs::remove_dir_all(path) {
                warn!(path = %path.display(), %e, "failed to remove orphaned worktree directory");
            }
        }
        let _ = self.git.prune().await;
        info!(count = orphaned.len(), "orphan recovery complete");
        Ok(orphaned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_and_branch_names_follow_convention() {
        assert_eq!(worktree_dir_name("t1"), "hc_worktree_t1");
        assert_eq!(attempt_branch_name("t1", 2), "feature/t1_attempt_2");
    }

    #[test]
    fn distinct_task_ids_produce_disjoint_names() {
        assert_ne!(worktree_dir_name("a"), worktree_dir_name("b"));
        assert_ne!(attempt_branch_name("a", 1), attempt_branch_name("b", 1));
    }
}
