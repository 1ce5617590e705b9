use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::warn;

use crate::task::{Queue, Task};

const STOPWORDS: &[&str] = &["the", "a", "an", "and", "or", "to", "in", "for", "goal"];

#[derive(Debug, Clone)]
pub struct LineageResult {
    pub valid: bool,
    pub matched_goal_id: Option<String>,
    pub reason: String,
    pub borderline: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueueLineageResult {
    pub valid: bool,
    pub orphan_tasks: Vec<String>,
    pub valid_tasks: Vec<String>,
}

fn goal_heading_re() -> Regex {
    Regex::new(r"(?i)^goal\s+(\d+)\s*:\s*(.+)$").expect("static pattern compiles")
}

/// Turns a free-text goal heading into a stable id: `"Goal 3: Ship the CLI"`
/// becomes `goal_3`; anything else is snake_cased from its punctuation-stripped
/// words.
fn normalize_goal(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(caps) = goal_heading_re().captures(trimmed) {
        return format!("goal_{}", &caps[1]);
    }

    let cleaned: String = trimmed
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

fn tokenize(text: &str) -> HashSet<String> {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Validates that a task's declared north-star goal resolves to a known goal,
/// either by exact id or by fuzzy token overlap against the goal's own text
/// when no exact id is registered (e.g. free-text NorthStar files).
pub struct TraceabilityGate {
    goals: HashMap<String, String>,
}

impl TraceabilityGate {
    /// `goals` maps a goal id (e.g. `goal_1`) to its descriptive text.
    pub fn new(goals: HashMap<String, String>) -> Self {
        Self { goals }
    }

    pub fn check_task(&self, task: &Task) -> LineageResult {
        self.check_goal_ref(&task.northstar_goal)
    }

    pub fn check_goal_ref(&self, goal_ref: &str) -> LineageResult {
        let normalized = normalize_goal(goal_ref);

        if self.goals.contains_key(&normalized) {
            return LineageResult {
                valid: true,
                matched_goal_id: Some(normalized),
                reason: "exact match".to_string(),
                borderline: false,
            };
        }

        let ref_tokens = tokenize(goal_ref);
        if ref_tokens.is_empty() {
            return LineageResult {
                valid: false,
                matched_goal_id: None,
                reason: "goal reference has no meaningful tokens".to_string(),
                borderline: false,
            };
        }

        let mut best: Option<(String, usize, f64)> = None;
        for (goal_id, goal_text) in &self.goals {
            let goal_tokens = tokenize(goal_text);
            let overlap = ref_tokens.intersection(&goal_tokens).count();
            if overlap == 0 {
                continue;
            }
            let fraction = overlap as f64 / ref_tokens.len() as f64;
            if best.as_ref().map(|(_, o, _)| overlap > *o).unwrap_or(true) {
                best = Some((goal_id.clone(), overlap, fraction));
            }
        }

        match best {
            Some((goal_id, overlap, fraction)) if overlap >= 2 || fraction >= 0.5 => {
                warn!(
                    goal_ref,
                    matched = %goal_id,
                    overlap,
                    fraction,
                    "traceability match resolved by fuzzy token overlap, not exact id"
                );
                LineageResult {
                    valid: true,
                    matched_goal_id: Some(goal_id),
                    reason: format!("fuzzy match (overlap={overlap}, fraction={fraction:.2})"),
                    borderline: true,
                }
            }
            _ => LineageResult {
                valid: false,
                matched_goal_id: None,
                reason: format!("no registered goal matches '{goal_ref}'"),
                borderline: false,
            },
        }
    }

    /// Checks every task in the queue; a task whose goal does not resolve is
    /// an orphan. Never mutates the queue.
    pub fn check_queue(&self, queue: &Queue) -> QueueLineageResult {
        let mut orphan_tasks = Vec::new();
        let mut valid_tasks = Vec::new();

        for task in &queue.tasks {
            let lineage = self.check_task(task);
            if lineage.valid {
                valid_tasks.push(task.id.clone());
            } else {
                orphan_tasks.push(task.id.clone());
            }
        }

        QueueLineageResult {
            valid: orphan_tasks.is_empty(),
            orphan_tasks,
            valid_tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn task(goal: &str) -> Task {
        Task {
            id: "t1".to_string(),
            status: TaskStatus::Open,
            priority: 0,
            description: "d".to_string(),
            northstar_goal: goal.to_string(),
            dependencies: vec![],
            success_definition: String::new(),
            files: vec![],
            source_file: None,
            source_hash: None,
        }
    }

    fn goals() -> HashMap<String, String> {
        [
            ("goal_1".to_string(), "Ship the command line interface".to_string()),
            ("goal_2".to_string(), "Improve test coverage across the repo".to_string()),
        ]
        .into()
    }

    #[test]
    fn normalizes_goal_heading_to_id() {
        assert_eq!(normalize_goal("Goal 1: Ship the CLI"), "goal_1");
    }

    #[test]
    fn normalizes_free_text_to_snake_case() {
        assert_eq!(normalize_goal("Ship The CLI!"), "ship_the_cli");
    }

    #[test]
    fn exact_id_match_is_valid_and_not_borderline() {
        let gate = TraceabilityGate::new(goals());
        let result = gate.check_task(&task("goal_1"));
        assert!(result.valid);
        assert!(!result.borderline);
    }

    #[test]
    fn fuzzy_overlap_match_is_valid_but_borderline() {
        let gate = TraceabilityGate::new(goals());
        let result = gate.check_task(&task("Ship command line tooling"));
        assert!(result.valid);
        assert!(result.borderline);
        assert_eq!(result.matched_goal_id, Some("goal_1".to_string()));
    }

    #[test]
    fn unrelated_goal_reference_is_an_orphan() {
        let gate = TraceabilityGate::new(goals());
        let result = gate.check_task(&task("completely unrelated nonsense"));
        assert!(!result.valid);
    }

    #[test]
    fn queue_wide_check_separates_orphans_from_valid() {
        let gate = TraceabilityGate::new(goals());
        let queue = Queue {
            tasks: vec![task("goal_1"), task("nothing matches this at all")],
        };
        let result = gate.check_queue(&queue);
        assert!(!result.valid);
        assert_eq!(result.valid_tasks.len(), 1);
        assert_eq!(result.orphan_tasks.len(), 1);
    }
}
