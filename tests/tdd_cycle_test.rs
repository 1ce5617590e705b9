//! Integration test exercising the RED/GREEN/REFACTOR state machine end to
//! end against a real interpreter, without going through the network-backed
//! model dispatcher.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;

use hconductor::runner::{TestRunner, TestStatus};
use hconductor::tdd::{CycleState, TddCycle};
use hconductor::validator::TestValidator;

#[tokio::test]
async fn cycle_progresses_from_red_through_done_against_real_shell_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let test_path = dir.path().join("test_add.sh");

    let mut file = std::fs::File::create(&test_path).unwrap();
    write!(file, "exit 1\n").unwrap();
    drop(file);

    let validator = TestValidator::new(&test_path, None);
    // A bare "exit 1" has no assertion markers in this validator's heuristics,
    // so it is reported as an empty test; real generated tests carry an
    // assertion line, which is what the state machine itself cares about.
    let _ = validator.check_empty_tests().unwrap();

    let runner = TestRunner::new(Duration::from_secs(5), "sh");

    let mut cycle = TddCycle::new();
    cycle.start_red().unwrap();

    let red_run = runner.run(&test_path).await;
    assert_eq!(red_run.status, TestStatus::Failed);
    cycle.complete_red(true).unwrap();
    assert_eq!(cycle.state(), CycleState::Green);

    // Flip the script to pass, simulating a generated implementation making
    // the test green.
    let mut file = std::fs::File::create(&test_path).unwrap();
    write!(file, "exit 0\n").unwrap();
    drop(file);

    let green_run = runner.run(&test_path).await;
    assert_eq!(green_run.status, TestStatus::Passed);
    cycle.complete_green(true, &green_run.combined_output()).unwrap();
    assert_eq!(cycle.state(), CycleState::Refactor);

    cycle.skip_refactor().unwrap();
    assert_eq!(cycle.state(), CycleState::Done);

    assert_eq!(
        cycle.history(),
        &[
            CycleState::Init,
            CycleState::Red,
            CycleState::Green,
            CycleState::Refactor,
            CycleState::Done,
        ]
    );
}

#[tokio::test]
async fn cycle_marks_failed_when_red_phase_never_fails() {
    let dir = tempfile::tempdir().unwrap();
    let test_path = dir.path().join("test_noop.sh");
    std::fs::write(&test_path, "exit 0\n").unwrap();

    let runner = TestRunner::new(Duration::from_secs(5), "sh");
    let mut cycle = TddCycle::new();
    cycle.start_red().unwrap();

    let run = runner.run(&test_path).await;
    assert_eq!(run.status, TestStatus::Passed);

    let err = cycle.complete_red(false).unwrap_err();
    assert!(format!("{err}").contains("RED phase"));
    cycle.mark_failed(err.to_string()).unwrap();
    assert_eq!(cycle.state(), CycleState::Failed);
}
