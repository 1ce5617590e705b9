use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::dispatch::{DispatchResult, ModelDispatcher};
use crate::task::{Queue, Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    High,
    Med,
    Low,
}

#[derive(Debug, Clone)]
pub struct TicketIssue {
    pub severity: Severity,
    pub dimension: String,
    pub issue: String,
}

#[derive(Debug, Clone, Default)]
pub struct TicketValidationResult {
    pub issues: Vec<TicketIssue>,
}

impl TicketValidationResult {
    pub fn high_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::High).count()
    }

    pub fn med_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Med).count()
    }

    pub fn low_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Low).count()
    }

    /// Whether execution may proceed without operator intervention.
    pub fn proceed(&self) -> bool {
        self.high_count() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub task: Option<Task>,
    pub validation_result: Option<TicketValidationResult>,
    pub skipped_validation: bool,
}

#[derive(Serialize)]
struct ValidationLogEntry<'a> {
    timestamp: String,
    task_id: &'a str,
    high: usize,
    med: usize,
    low: usize,
}

/// Picks the next ready task from a queue by dependency closure and priority,
/// with an optional ticket-validation preflight.
pub struct TaskSelector {
    validate_tickets: bool,
    strict_tickets: bool,
}

impl TaskSelector {
    pub fn new(validate_tickets: bool, strict_tickets: bool) -> Self {
        Self {
            validate_tickets,
            strict_tickets,
        }
    }

    /// Status is `open` and every dependency resolves to a `complete` task.
    /// Among ready tasks, lowest priority number wins, ties broken by queue order.
    pub fn get_next_task(&self, queue: &Queue) -> Option<Task> {
        let complete_ids: HashSet<&str> = queue
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .map(|t| t.id.as_str())
            .collect();

        queue
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open)
            .filter(|t| t.dependencies.iter().all(|d| complete_ids.contains(d.as_str())))
            .min_by_key(|t| t.priority)
            .cloned()
    }

    pub async fn select_with_validation(
        &self,
        queue: &Queue,
        dispatcher: &ModelDispatcher,
        log_path: Option<&Path>,
    ) -> SelectionResult {
        let Some(task) = self.get_next_task(queue) else {
            return SelectionResult {
                task: None,
                validation_result: None,
                skipped_validation: true,
            };
        };

        if !self.validate_tickets {
            return SelectionResult {
                task: Some(task),
                validation_result: None,
                skipped_validation: true,
            };
        }

        let result = Self::validate_ticket(&task, dispatcher).await;

        if !result.issues.is_empty() {
            info!(
                task_id = %task.id,
                high = result.high_count(),
                med = result.med_count(),
                low = result.low_count(),
                "ticket validation"
            );
            for issue in &result.issues {
                match issue.severity {
                    Severity::High => warn!(dimension = %issue.dimension, "{}", issue.issue),
                    _ => info!(dimension = %issue.dimension, "{}", issue.issue),
                }
            }
        }

        if let Some(path) = log_path {
            Self::append_validation_log(path, &task.id, &result);
        }

        if self.strict_tickets && !result.proceed() {
            warn!(task_id = %task.id, "blocked by ticket validation (strict mode)");
        } else if !result.proceed() {
            warn!(task_id = %task.id, "ticket has HIGH issues but proceeding (non-strict mode)");
        }

        SelectionResult {
            task: Some(task),
            validation_result: Some(result),
            skipped_validation: false,
        }
    }

    async fn validate_ticket(task: &Task, dispatcher: &ModelDispatcher) -> TicketValidationResult {
        let prompt_vars = [
            (
                "__template__".to_string(),
                "Review this ticket for clarity, scope, and testability before work begins:\n{task_description}\n\n\
                 Respond with one finding per line:\n- HIGH|MED|LOW: dimension: issue"
                    .to_string(),
            ),
            ("task_description".to_string(), task.description.clone()),
        ]
        .into();
        let dispatch = dispatcher.send_request("ticket_validation", &prompt_vars, 2).await;
        Self::parse_ticket_response(&dispatch)
    }

    fn parse_ticket_response(dispatch: &DispatchResult) -> TicketValidationResult {
        if !dispatch.success {
            return TicketValidationResult::default();
        }

        let mut issues = Vec::new();
        for line in dispatch.response.lines() {
            let line = line.trim();
            let Some(rest) = line.strip_prefix('-') else {
                continue;
            };
            let rest = rest.trim();
            let Some((sev, rest)) = rest.split_once(':') else {
                continue;
            };
            let severity = match sev.trim().to_uppercase().as_str() {
                "HIGH" => Severity::High,
                "MED" | "MEDIUM" => Severity::Med,
                "LOW" => Severity::Low,
                _ => continue,
            };
            let rest = rest.trim();
            let (dimension, issue_text) = rest.split_once(':').unwrap_or(("general", rest));
            issues.push(TicketIssue {
                severity,
                dimension: dimension.trim().to_string(),
                issue: issue_text.trim().to_string(),
            });
        }
        TicketValidationResult { issues }
    }

    fn append_validation_log(path: &Path, task_id: &str, result: &TicketValidationResult) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let entry = ValidationLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            task_id,
            high: result.high_count(),
            med: result.med_count(),
            low: result.low_count(),
        };
        if let Ok(line) = serde_json::to_string(&entry) {
            use std::io::Write;
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(f, "{line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn task(id: &str, status: TaskStatus, priority: i64, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            status,
            priority,
            description: "d".into(),
            northstar_goal: "goal_1".into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            success_definition: String::new(),
            files: vec![],
            source_file: None,
            source_hash: None,
        }
    }

    #[test]
    fn picks_lowest_priority_ready_task() {
        let queue = Queue {
            tasks: vec![
                task("a", TaskStatus::Open, 10, &[]),
                task("b", TaskStatus::Open, 5, &[]),
            ],
        };
        let selector = TaskSelector::new(false, false);
        let picked = selector.get_next_task(&queue).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn skips_tasks_with_incomplete_dependencies() {
        let queue = Queue {
            tasks: vec![
                task("a", TaskStatus::Open, 0, &["b"]),
                task("b", TaskStatus::InProgress, 0, &[]),
            ],
        };
        let selector = TaskSelector::new(false, false);
        assert!(selector.get_next_task(&queue).is_none());
    }

    #[test]
    fn selects_task_once_dependency_completes() {
        let queue = Queue {
            tasks: vec![
                task("a", TaskStatus::Open, 0, &["b"]),
                task("b", TaskStatus::Complete, 0, &[]),
            ],
        };
        let selector = TaskSelector::new(false, false);
        assert_eq!(selector.get_next_task(&queue).unwrap().id, "a");
    }
}
