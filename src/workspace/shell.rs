use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{HConductorError, Result};

/// Thin wrapper over the `git` CLI: every operation shells out rather than
/// linking a git implementation, so a faulty invocation cannot corrupt
/// process state beyond the subprocess boundary.
#[derive(Debug)]
pub struct GitShell {
    repo_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: String,
}

impl GitShell {
    pub fn new(repo_path: PathBuf) -> Self {
        Self { repo_path }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| HConductorError::resource(format!("failed to execute git {args:?}: {e}")))
    }

    fn ok_or_git_error(output: std::process::Output, action: &str) -> Result<std::process::Output> {
        if output.status.success() {
            Ok(output)
        } else {
            Err(HConductorError::resource(format!(
                "{action}: {}",
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }

    pub async fn create_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| HConductorError::resource("worktree path is not valid UTF-8"))?;
        let output = self
            .run(&self.repo_path, &["worktree", "add", "-b", branch, path_str])
            .await?;
        Self::ok_or_git_error(output, "failed to create worktree")?;
        info!(path = %path.display(), branch, "worktree created");
        Ok(())
    }

    pub async fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| HConductorError::resource("worktree path is not valid UTF-8"))?;
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str);
        let output = self.run(&self.repo_path, &args).await?;
        Self::ok_or_git_error(output, "failed to remove worktree")?;
        Ok(())
    }

    pub async fn prune(&self) -> Result<()> {
        let output = self.run(&self.repo_path, &["worktree", "prune"]).await?;
        Self::ok_or_git_error(output, "failed to prune worktrees")?;
        Ok(())
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<()> {
        let output = self.run(&self.repo_path, &["branch", "-D", branch]).await?;
        // Deleting an already-gone branch is not fatal during cleanup.
        if !output.status.success() {
            warn!(branch, "branch delete failed (may already be gone)");
        }
        Ok(())
    }

    pub async fn list_branches_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self.run(&self.repo_path, &["branch", "--list", &format!("{prefix}*")]).await?;
        let output = Self::ok_or_git_error(output, "failed to list branches")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim_start_matches('*').trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let output = self.run(&self.repo_path, &["worktree", "list", "--porcelain"]).await?;
        let output = Self::ok_or_git_error(output, "failed to list worktrees")?;
        Ok(Self::parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
        let mut entries = Vec::new();
        let mut current: Option<WorktreeEntry> = None;

        for line in output.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(WorktreeEntry {
                    path: PathBuf::from(path),
                    branch: String::new(),
                });
            } else if let Some(entry) = current.as_mut() {
                if let Some(branch) = line.strip_prefix("branch refs/heads/") {
                    entry.branch = branch.to_string();
                }
            }
        }
        if let Some(entry) = current {
            entries.push(entry);
        }
        entries
    }

    pub async fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        let output = self.run(dir, &["checkout", branch]).await?;
        Self::ok_or_git_error(output, &format!("failed to checkout {branch}"))?;
        Ok(())
    }

    /// Attempts a fast-forward-only merge of `source_branch` into whichever
    /// branch is currently checked out in `dir`. Any divergence is a failure,
    /// and nothing is touched on failure.
    pub async fn merge_fast_forward_only(&self, dir: &Path, source_branch: &str) -> Result<()> {
        let output = self.run(dir, &["merge", "--ff-only", source_branch]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HConductorError::policy(format!(
                "fast-forward merge of '{source_branch}' failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_porcelain_worktree_list() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n\
                       worktree /repo/hc_worktree_t1\nHEAD def456\nbranch refs/heads/feature/t1_attempt_1\n";
        let entries = GitShell::parse_worktree_list(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].branch, "feature/t1_attempt_1");
        assert_eq!(entries[1].path, PathBuf::from("/repo/hc_worktree_t1"));
    }
}
