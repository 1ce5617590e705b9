use tracing::{info, warn};

use crate::circuit::CircuitBreakerManager;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::queue_store::QueueStore;
use crate::selector::TaskSelector;
use crate::task::TaskStatus;
use crate::workspace::WorkspaceManager;

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub completed: Vec<String>,
    pub blocked: Vec<String>,
    pub tasks_run: u32,
}

/// Drives the queue to completion: select a ready task, run it through the
/// pipeline, persist the result, repeat. Recovers orphaned worktrees from a
/// prior crash before its first iteration.
pub struct ExecutionLoop {
    queue_store: QueueStore,
    selector: TaskSelector,
    workspace_manager: WorkspaceManager,
    pipeline: Pipeline,
    circuit_breakers: CircuitBreakerManager,
    max_tasks: Option<u32>,
}

impl ExecutionLoop {
    pub fn new(
        queue_store: QueueStore,
        selector: TaskSelector,
        workspace_manager: WorkspaceManager,
        pipeline: Pipeline,
        max_tasks: Option<u32>,
    ) -> Self {
        Self {
            queue_store,
            selector,
            workspace_manager,
            pipeline,
            circuit_breakers: CircuitBreakerManager::with_default_limits(),
            max_tasks,
        }
    }

    pub async fn run(&mut self) -> Result<LoopOutcome> {
        let orphans = self.workspace_manager.cleanup_orphaned().await?;
        if orphans > 0 {
            info!(orphans, "recovered orphaned worktrees before starting");
        }

        let mut completed = Vec::new();
        let mut blocked = Vec::new();
        let mut tasks_run = 0u32;

        loop {
            if let Some(max) = self.max_tasks {
                if tasks_run >= max {
                    info!(max, "reached max_tasks cap, stopping");
                    break;
                }
            }

            let dev_breaker = self.circuit_breakers.get_or_create("dev");
            if dev_breaker.is_tripped() {
                warn!("dev circuit breaker tripped, stopping execution loop");
                break;
            }

            let queue = self.queue_store.load()?;
            let Some(task) = self.selector.get_next_task(&queue) else {
                info!("no ready tasks remain");
                break;
            };

            self.queue_store.update_task_status(&task.id, TaskStatus::InProgress)?;
            info!(task_id = %task.id, "starting task");

            let result = self.pipeline.run(&task, 1).await;
            tasks_run += 1;

            if result.success {
                self.queue_store.update_task_status(&task.id, TaskStatus::Complete)?;
                completed.push(task.id.clone());
                info!(task_id = %task.id, "task completed");
            } else {
                self.queue_store.update_task_status(&task.id, TaskStatus::Blocked)?;
                blocked.push(task.id.clone());
                self.circuit_breakers.get_or_create("dev").record_failure();
                warn!(
                    task_id = %task.id,
                    stage = ?result.stage_reached,
                    error = ?result.error,
                    "task blocked"
                );
            }
        }

        Ok(LoopOutcome {
            completed,
            blocked,
            tasks_run,
        })
    }
}
