//! Integration tests for the task queue: persistence, selection, traceability.

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use hconductor::queue_store::QueueStore;
use hconductor::selector::TaskSelector;
use hconductor::task::{Queue, Task, TaskStatus};
use hconductor::traceability::TraceabilityGate;

fn task(id: &str, status: TaskStatus, priority: i64, deps: &[&str], goal: &str) -> Task {
    Task {
        id: id.to_string(),
        status,
        priority,
        description: format!("implement {id}"),
        northstar_goal: goal.to_string(),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        success_definition: format!("{id} works"),
        files: vec![format!("{id}.py")],
        source_file: None,
        source_hash: None,
    }
}

#[test]
fn queue_round_trips_through_store_and_selects_ready_work() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let store = QueueStore::new(&path);

    let queue = Queue::new(vec![
        task("setup", TaskStatus::Open, 1, &[], "goal_1"),
        task("feature", TaskStatus::Open, 2, &["setup"], "goal_1"),
    ])
    .unwrap();
    store.save(&queue).unwrap();

    let loaded = store.load().unwrap();
    let selector = TaskSelector::new(false, false);

    let first = selector.get_next_task(&loaded).unwrap();
    assert_eq!(first.id, "setup", "feature is blocked until setup completes");

    store.update_task_status("setup", TaskStatus::Complete).unwrap();
    let reloaded = store.load().unwrap();

    let second = selector.get_next_task(&reloaded).unwrap();
    assert_eq!(second.id, "feature");
}

#[test]
fn queue_with_cycle_is_rejected_before_it_ever_reaches_disk() {
    let result = Queue::new(vec![
        task("a", TaskStatus::Open, 0, &["b"], "goal_1"),
        task("b", TaskStatus::Open, 0, &["a"], "goal_1"),
    ]);
    assert!(result.is_err());
}

#[test]
fn traceability_gate_flags_orphaned_tasks_queue_wide() {
    let goals: HashMap<String, String> = [("goal_1".to_string(), "Ship the CLI".to_string())].into();
    let gate = TraceabilityGate::new(goals);

    let queue = Queue {
        tasks: vec![
            task("a", TaskStatus::Open, 0, &[], "goal_1"),
            task("b", TaskStatus::Open, 0, &[], "goal_nonexistent"),
        ],
    };

    let result = gate.check_queue(&queue);
    assert!(!result.valid);
    assert_eq!(result.valid_tasks, vec!["a".to_string()]);
    assert_eq!(result.orphan_tasks, vec!["b".to_string()]);
}
