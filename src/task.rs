use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{HConductorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Complete,
    Blocked,
    Cancelled,
    PendingReplan,
    PendingParent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub description: String,
    pub northstar_goal: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub success_definition: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub source_hash: Option<String>,
}

impl Task {
    /// The canonical implementation file: the first entry of `files`, if any.
    pub fn target_file(&self) -> Option<&str> {
        self.files.first().map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Queue {
    pub tasks: Vec<Task>,
}

impl Queue {
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let queue = Self { tasks };
        queue.validate()?;
        Ok(queue)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Enforces I1 (unique ids), I2 (dependencies resolve), I3 (acyclic).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(HConductorError::policy(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(HConductorError::policy(format!(
                        "task '{}' depends on non-existent task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        self.check_acyclic(&ids)
    }

    fn check_acyclic(&self, ids: &HashSet<&str>) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Visited,
        }

        let dep_map: HashMap<&str, &[String]> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
            .collect();

        let mut state: HashMap<&str, Mark> =
            ids.iter().map(|id| (*id, Mark::Unvisited)).collect();

        fn dfs<'a>(
            id: &'a str,
            dep_map: &HashMap<&'a str, &'a [String]>,
            state: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<()> {
            match state.get(id) {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.push(id);
                    return Err(HConductorError::policy(format!(
                        "circular dependency detected: {}",
                        cycle.join(" -> ")
                    )));
                }
                Some(Mark::Visited) => return Ok(()),
                _ => {}
            }

            state.insert(id, Mark::Visiting);
            path.push(id);

            if let Some(deps) = dep_map.get(id) {
                for dep in deps.iter() {
                    if dep_map.contains_key(dep.as_str()) {
                        dfs(dep.as_str(), dep_map, state, path)?;
                    }
                }
            }

            path.pop();
            state.insert(id, Mark::Visited);
            Ok(())
        }

        let mut ids_sorted: Vec<&str> = ids.iter().copied().collect();
        ids_sorted.sort_unstable();
        for id in ids_sorted {
            if matches!(state.get(id), Some(Mark::Unvisited)) {
                dfs(id, &dep_map, &mut state, &mut Vec::new())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            status: TaskStatus::Open,
            priority: 0,
            description: "d".to_string(),
            northstar_goal: "goal_1".to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            success_definition: String::new(),
            files: vec![],
            source_file: None,
            source_hash: None,
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = Queue::new(vec![task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, HConductorError::Policy { .. }));
    }

    #[test]
    fn rejects_orphan_dependency() {
        let err = Queue::new(vec![task("a", &["missing"])]).unwrap_err();
        assert!(matches!(err, HConductorError::Policy { .. }));
    }

    #[test]
    fn rejects_cycles() {
        let err = Queue::new(vec![task("a", &["b"]), task("b", &["a"])]).unwrap_err();
        assert!(matches!(err, HConductorError::Policy { .. }));
    }

    #[test]
    fn accepts_valid_dag() {
        let queue = Queue::new(vec![task("a", &[]), task("b", &["a"])]).unwrap();
        assert_eq!(queue.tasks.len(), 2);
    }
}
