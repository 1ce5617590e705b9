use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::dispatch::ModelDispatcher;
use crate::error::{HConductorError, Result};
use crate::quality::{QualityGate, Verdict};
use crate::runner::TestRunner;
use crate::task::Task;
use crate::tdd::{new_retry_policy, TddCycle, TddCycleExecutor};
use crate::traceability::TraceabilityGate;
use crate::workspace::{Workspace, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Worktree,
    Tdd,
    Qa,
    Traceability,
    Merge,
    Memory,
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub stage_reached: Stage,
    pub error: Option<String>,
}

pub struct PipelineConfig {
    pub target_branch: String,
    pub run_qa: bool,
    pub run_traceability: bool,
    pub max_green_retries: u32,
    /// Shell command that runs the project's pre-existing regression suite,
    /// e.g. `"pytest tests/"`. When set, its output is passed to the quality
    /// gate as `existing_test_results` so a silent regression in code the
    /// task didn't touch can still be caught. `None` skips this check.
    pub existing_test_command: Option<String>,
}

/// Composes the workspace, TDD cycle, quality gate and traceability gate into
/// the seven ordered stages a single task passes through. Cleanup always
/// runs, on every exit path: success, a stage failure, or an unexpected error.
pub struct Pipeline {
    workspace_manager: WorkspaceManager,
    dispatcher_factory: Box<dyn Fn() -> ModelDispatcher + Send + Sync>,
    test_interpreter: String,
    test_timeout_secs: u64,
    quality_gate: Option<QualityGate>,
    traceability_gate: Option<TraceabilityGate>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        workspace_manager: WorkspaceManager,
        dispatcher_factory: Box<dyn Fn() -> ModelDispatcher + Send + Sync>,
        test_interpreter: impl Into<String>,
        test_timeout_secs: u64,
        quality_gate: Option<QualityGate>,
        traceability_gate: Option<TraceabilityGate>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            workspace_manager,
            dispatcher_factory,
            test_interpreter: test_interpreter.into(),
            test_timeout_secs,
            quality_gate,
            traceability_gate,
            config,
        }
    }

    pub async fn run(&self, task: &Task, attempt: u32) -> ExecutionResult {
        let mut stage_reached = Stage::Worktree;

        let workspace = match self.workspace_manager.create(&task.id, attempt).await {
            Ok(ws) => ws,
            Err(e) => {
                return ExecutionResult {
                    task_id: task.id.clone(),
                    success: false,
                    stage_reached,
                    error: Some(e.to_string()),
                }
            }
        };

        let result = self.run_inner(task, &workspace, &mut stage_reached).await;

        // Cleanup runs on every exit path. On success the merge stage already
        // cleaned the workspace up; this call is then a harmless no-op.
        if let Err(e) = self
            .workspace_manager
            .cleanup(&task.id, &workspace.path, &workspace.branch_name, result.is_err())
            .await
        {
            warn!(task_id = %task.id, %e, "cleanup stage reported an error");
        }

        match result {
            Ok(()) => ExecutionResult {
                task_id: task.id.clone(),
                success: true,
                stage_reached: Stage::Cleanup,
                error: None,
            },
            Err(e) => ExecutionResult {
                task_id: task.id.clone(),
                success: false,
                stage_reached,
                error: Some(e.to_string()),
            },
        }
    }

    async fn run_inner(&self, task: &Task, workspace: &Workspace, stage_reached: &mut Stage) -> Result<()> {
        *stage_reached = Stage::Tdd;
        let (code, test_output) = self.run_tdd(task, workspace).await?;

        if self.config.run_qa && self.config.run_traceability {
            // Combined path: a queue-wide orphan or traceability drift is a
            // rejection regardless of what the code review alone concluded.
            *stage_reached = Stage::Qa;
            self.run_combined_qa_and_traceability_gate(task, workspace, &code, &test_output).await?;
            *stage_reached = Stage::Traceability;
        } else {
            if self.config.run_qa {
                *stage_reached = Stage::Qa;
                self.run_qa_gate(task, workspace, &code, &test_output).await?;
            }

            if self.config.run_traceability {
                *stage_reached = Stage::Traceability;
                self.run_traceability_gate(task)?;
            }
        }

        *stage_reached = Stage::Merge;
        let outcome = self
            .workspace_manager
            .merge(workspace, &self.config.target_branch)
            .await?;
        if !outcome.success {
            return Err(HConductorError::policy(format!(
                "merge failed for task '{}': {}",
                task.id, outcome.message
            )));
        }

        *stage_reached = Stage::Memory;
        self.update_memory_best_effort(task).await;

        Ok(())
    }

    async fn run_tdd(&self, task: &Task, workspace: &Workspace) -> Result<(String, String)> {
        let dispatcher = (self.dispatcher_factory)();
        let runner = TestRunner::new(
            std::time::Duration::from_secs(self.test_timeout_secs),
            self.test_interpreter.clone(),
        );
        let executor = TddCycleExecutor::new(
            dispatcher,
            runner,
            workspace.path.clone(),
            self.config.max_green_retries,
        );

        let mut cycle = TddCycle::new();
        executor.execute_red(&mut cycle, task).await?;

        let mut policy = new_retry_policy(self.config.max_green_retries);
        let green = executor.execute_green_with_retry(&mut cycle, task, &mut policy).await?;

        let refactor = executor.execute_refactor(&mut cycle, task).await?;
        if refactor.reverted {
            info!(task_id = %task.id, "refactor stage reverted to the GREEN implementation");
        }

        let code = tokio::fs::read_to_string(&green.impl_path)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to read final implementation: {e}")))?;

        Ok((code, green.test_output))
    }

    async fn run_qa_gate(&self, task: &Task, workspace: &Workspace, code: &str, test_output: &str) -> Result<()> {
        let Some(gate) = &self.quality_gate else {
            return Ok(());
        };
        let existing = self.run_existing_test_suite(workspace).await;
        let review = gate.review(code, test_output, &task.description, existing.as_deref()).await?;
        if review.verdict != Verdict::Approved {
            return Err(HConductorError::policy(format!(
                "quality gate rejected task '{}': {}",
                task.id, review.summary
            )));
        }
        Ok(())
    }

    async fn run_combined_qa_and_traceability_gate(
        &self,
        task: &Task,
        workspace: &Workspace,
        code: &str,
        test_output: &str,
    ) -> Result<()> {
        let Some(gate) = &self.quality_gate else {
            return self.run_traceability_gate(task);
        };
        let Some(traceability) = &self.traceability_gate else {
            return self.run_qa_gate(task, workspace, code, test_output).await;
        };

        let existing = self.run_existing_test_suite(workspace).await;
        let lineage = traceability.check_task(task);
        let review = gate
            .review_with_dna(code, test_output, &task.description, existing.as_deref(), &lineage)
            .await?;
        if review.verdict != Verdict::Approved {
            return Err(HConductorError::policy(format!(
                "quality gate rejected task '{}': {}",
                task.id, review.summary
            )));
        }
        Ok(())
    }

    /// Runs the project's own pre-existing regression suite, if configured,
    /// to surface regressions the task's own new test can't detect. Best
    /// effort: a failure to even run the suite is logged, not fatal.
    async fn run_existing_test_suite(&self, workspace: &Workspace) -> Option<String> {
        let command = self.config.existing_test_command.as_ref()?;
        let runner = TestRunner::new(
            std::time::Duration::from_secs(self.test_timeout_secs),
            self.test_interpreter.clone(),
        );
        let result = runner.run_suite(&workspace.path, command).await;
        Some(result.combined_output())
    }

    fn run_traceability_gate(&self, task: &Task) -> Result<()> {
        let Some(gate) = &self.traceability_gate else {
            return Ok(());
        };
        let lineage = gate.check_task(task);
        if !lineage.valid {
            return Err(HConductorError::policy(format!(
                "traceability check failed for task '{}': {}",
                task.id, lineage.reason
            )));
        }
        Ok(())
    }

    /// Memory updates never abort the pipeline: a failure here is logged and
    /// swallowed, since the task's code has already merged successfully.
    async fn update_memory_best_effort(&self, task: &Task) {
        let dispatcher = (self.dispatcher_factory)();
        let mut vars = HashMap::new();
        vars.insert(
            "__template__".to_string(),
            "Summarize what changed for future tasks: {description}".to_string(),
        );
        vars.insert("description".to_string(), task.description.clone());

        let dispatch = dispatcher.send_request("memory_update", &vars, 1).await;
        if !dispatch.success {
            error!(
                task_id = %task.id,
                error = ?dispatch.error,
                "memory update failed; continuing, merge already succeeded"
            );
        }
    }
}

pub fn workspace_base_dir(repo_path: &std::path::Path) -> PathBuf {
    repo_path.join(".hconductor-worktrees")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_base_dir_is_scoped_under_repo() {
        let repo = PathBuf::from("/tmp/repo");
        assert_eq!(workspace_base_dir(&repo), PathBuf::from("/tmp/repo/.hconductor-worktrees"));
    }
}
