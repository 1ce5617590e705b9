use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use crate::dispatch::{ModelDispatcher, ResponseFormat};
use crate::error::{HConductorError, Result};
use crate::retry::RetryPolicy;
use crate::runner::{TestRunner, TestStatus};
use crate::task::Task;
use crate::validator::TestValidator;

use super::cycle::{CycleResult, CycleState, GreenResult, RedResult, RefactorResult, TddCycle};

fn code_block_re() -> Regex {
    Regex::new(r"```(?:\w+)?\n([\s\S]*?)```").expect("static pattern compiles")
}

/// Extracts the first fenced code block from a model response, falling back
/// to the raw response if there is no fence.
fn extract_code(raw: &str) -> String {
    code_block_re()
        .captures(raw)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Derives a same-language sibling test filename for a target implementation
/// file: `add.py` -> `test_add.py`, `add.rs` -> `add_test.rs`.
fn derive_test_filename(target_file: &str) -> String {
    let path = Path::new(target_file);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("py");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("module");

    match ext {
        "rs" => format!("{stem}_test.{ext}"),
        _ => format!("test_{stem}.{ext}"),
    }
}

/// Drives a single task through RED -> GREEN -> REFACTOR, generating code via
/// a dispatched model and running it with a real interpreter at each phase.
pub struct TddCycleExecutor {
    dispatcher: ModelDispatcher,
    runner: TestRunner,
    working_dir: PathBuf,
    max_green_retries: u32,
}

impl TddCycleExecutor {
    pub fn new(
        dispatcher: ModelDispatcher,
        runner: TestRunner,
        working_dir: PathBuf,
        max_green_retries: u32,
    ) -> Self {
        Self {
            dispatcher,
            runner,
            working_dir,
            max_green_retries,
        }
    }

    /// Generates a failing test for the task, runs it, and confirms it fails
    /// for the right reason. A test that passes or fails to even parse is
    /// rejected: the cycle never advances past RED on a non-test.
    pub async fn execute_red(&self, cycle: &mut TddCycle, task: &Task) -> Result<RedResult> {
        cycle.start_red().map_err(|e| HConductorError::workflow(e.to_string()))?;

        let target_file = task
            .target_file()
            .ok_or_else(|| HConductorError::contract(format!("task '{}' has no target file", task.id)))?;
        let test_filename = derive_test_filename(target_file);
        let test_path = self.working_dir.join(&test_filename);

        let mut vars = HashMap::new();
        vars.insert(
            "__template__".to_string(),
            "Write a failing test for: {description}\nSuccess definition: {success_definition}\nTarget file: {target_file}"
                .to_string(),
        );
        vars.insert("description".to_string(), task.description.clone());
        vars.insert("success_definition".to_string(), task.success_definition.clone());
        vars.insert("target_file".to_string(), target_file.to_string());

        let dispatch = self.dispatcher.send_request("tdd_worker", &vars, 2).await;
        if !dispatch.success {
            let reason = dispatch.error.unwrap_or_else(|| "unknown dispatch failure".to_string());
            cycle.mark_failed(reason.clone()).map_err(|e| HConductorError::workflow(e.to_string()))?;
            return Err(HConductorError::workflow(format!("RED generation failed: {reason}")));
        }

        let parsed = self
            .dispatcher
            .parse_response(&dispatch.response, ResponseFormat::Code)?;
        let test_code = extract_code(&parsed.content);
        tokio::fs::write(&test_path, &test_code)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to write test file: {e}")))?;

        let run = self.runner.run(&test_path).await;
        let test_failed = matches!(run.status, TestStatus::Failed | TestStatus::Error);

        let validator = TestValidator::new(&test_path, Some(target_file.to_string()));

        if test_failed {
            let classification = validator.classify_failure(&run.combined_output());
            if !classification.expected {
                cycle
                    .mark_failed(format!(
                        "RED phase failed for an unacceptable reason ({:?}): {}",
                        classification.kind,
                        run.combined_output()
                    ))
                    .map_err(|e| HConductorError::workflow(e.to_string()))?;
                return Err(HConductorError::workflow(format!(
                    "RED phase failure is not an acceptable kind ({:?}); test likely doesn't even parse",
                    classification.kind
                )));
            }
        }

        let validation = validator.validate()?;
        if !validation.valid {
            let reasons = validation.errors.join("; ");
            cycle
                .mark_failed(format!("generated test is invalid: {reasons}"))
                .map_err(|e| HConductorError::workflow(e.to_string()))?;
            return Err(HConductorError::workflow(format!(
                "RED phase rejected the generated test: {reasons}"
            )));
        }

        if let Err(e) = cycle.complete_red(test_failed) {
            cycle
                .mark_failed(format!("RED phase did not fail as expected: {e}"))
                .map_err(|e| HConductorError::workflow(e.to_string()))?;
            return Err(HConductorError::workflow(e.to_string()));
        }

        let result = RedResult {
            test_path: test_path.to_string_lossy().into_owned(),
            test_output: run.combined_output(),
            test_failed,
        };
        cycle.set_red_result(result.clone());
        info!(task_id = %task.id, test_path = %result.test_path, "RED phase complete");
        Ok(result)
    }

    /// Generates an implementation against the RED test and runs it once,
    /// without retrying. Callers that want self-repair use
    /// `execute_green_with_retry`.
    pub async fn execute_green(&self, cycle: &mut TddCycle, task: &Task, previous_error: Option<&str>) -> Result<GreenResult> {
        let red = cycle
            .result()
            .red_result
            .clone()
            .ok_or_else(|| HConductorError::workflow("execute_green called before execute_red"))?;

        let target_file = task
            .target_file()
            .ok_or_else(|| HConductorError::contract(format!("task '{}' has no target file", task.id)))?;
        let impl_path = self.working_dir.join(target_file);

        let mut vars = HashMap::new();
        let template = if let Some(err) = previous_error {
            vars.insert("previous_error".to_string(), err.to_string());
            "Fix the implementation so the test passes.\nDescription: {description}\nTest output:\n{test_output}\nPrevious attempt failed with:\n{previous_error}"
        } else {
            "Write an implementation that makes this test pass.\nDescription: {description}\nTest output:\n{test_output}"
        };
        vars.insert("__template__".to_string(), template.to_string());
        vars.insert("description".to_string(), task.description.clone());
        vars.insert("test_output".to_string(), red.test_output.clone());

        let dispatch = self.dispatcher.send_request("tdd_worker", &vars, 2).await;
        if !dispatch.success {
            return Err(HConductorError::workflow(format!(
                "GREEN generation failed: {}",
                dispatch.error.unwrap_or_default()
            )));
        }

        let parsed = self
            .dispatcher
            .parse_response(&dispatch.response, ResponseFormat::Code)?;
        let impl_code = extract_code(&parsed.content);
        tokio::fs::write(&impl_path, &impl_code)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to write implementation file: {e}")))?;

        let run = self.runner.run(Path::new(&red.test_path)).await;
        let test_passed = matches!(run.status, TestStatus::Passed);

        let result = GreenResult {
            impl_path: impl_path.to_string_lossy().into_owned(),
            test_output: run.combined_output(),
            test_passed,
        };

        match cycle.complete_green(test_passed, &result.test_output) {
            Ok(()) => {
                cycle.set_green_result(result.clone());
                info!(task_id = %task.id, "GREEN phase complete");
                Ok(result)
            }
            Err(e) => {
                cycle.set_green_result(result.clone());
                Err(HConductorError::workflow(e.to_string()))
            }
        }
    }

    /// Loops `execute_green` through a `RetryPolicy`, feeding the previous
    /// failure back into the next prompt. Raises `MaxRetriesExceeded`-shaped
    /// workflow error once the policy is exhausted.
    pub async fn execute_green_with_retry(
        &self,
        cycle: &mut TddCycle,
        task: &Task,
        policy: &mut RetryPolicy,
    ) -> Result<GreenResult> {
        let mut last_error: Option<String> = None;

        while policy.should_retry() {
            if policy.attempt_count() > 0 {
                tokio::time::sleep(policy.backoff_delay()).await;
            }

            match self.execute_green(cycle, task, last_error.as_deref()).await {
                Ok(result) if result.test_passed => {
                    policy.record_attempt(true, None);
                    return Ok(result);
                }
                Ok(result) => {
                    let truncated: String = result.test_output.chars().take(500).collect();
                    policy.record_attempt(false, Some(truncated.clone()));
                    cycle.increment_retry();
                    last_error = Some(truncated);
                }
                Err(e) => {
                    policy.record_attempt(false, Some(e.to_string()));
                    cycle.increment_retry();
                    last_error = Some(e.to_string());
                }
            }
        }

        let attempts = policy.attempt_count();
        let history = policy.error_history().to_vec();
        cycle
            .mark_failed(format!("GREEN phase exhausted {attempts} attempts"))
            .map_err(|e| HConductorError::workflow(e.to_string()))?;

        warn!(task_id = %task.id, attempts, "GREEN phase retries exhausted");
        Err(HConductorError::policy(format!(
            "max retries ({attempts}) exceeded for task '{}'; last error: {}",
            task.id,
            history.last().cloned().unwrap_or_default()
        )))
    }

    /// Best-effort cleanup pass over already-green code. A regression here
    /// reverts to the GREEN implementation rather than failing the task.
    pub async fn execute_refactor(&self, cycle: &mut TddCycle, task: &Task) -> Result<RefactorResult> {
        let green = cycle
            .result()
            .green_result
            .clone()
            .ok_or_else(|| HConductorError::workflow("execute_refactor called before execute_green"))?;
        let red = cycle
            .result()
            .red_result
            .clone()
            .ok_or_else(|| HConductorError::workflow("execute_refactor called before execute_red"))?;

        let original_code = tokio::fs::read_to_string(&green.impl_path)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to read implementation for refactor: {e}")))?;

        let mut vars = HashMap::new();
        vars.insert(
            "__template__".to_string(),
            "Refactor this implementation for clarity without changing behavior:\n{code}".to_string(),
        );
        vars.insert("code".to_string(), original_code.clone());

        let dispatch = self.dispatcher.send_request("tdd_worker", &vars, 1).await;
        let refactored_code = match dispatch.success {
            true => {
                let parsed = self.dispatcher.parse_response(&dispatch.response, ResponseFormat::Code)?;
                extract_code(&parsed.content)
            }
            false => {
                warn!(task_id = %task.id, "refactor dispatch failed, skipping refactor");
                cycle
                    .complete_refactor(true)
                    .map_err(|e| HConductorError::workflow(e.to_string()))?;
                let result = RefactorResult {
                    impl_path: green.impl_path.clone(),
                    test_output: green.test_output.clone(),
                    test_passed: true,
                    reverted: false,
                };
                cycle.set_refactor_result(result.clone());
                return Ok(result);
            }
        };

        tokio::fs::write(&green.impl_path, &refactored_code)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to write refactored implementation: {e}")))?;

        let run = self.runner.run(Path::new(&red.test_path)).await;
        let test_passed = matches!(run.status, TestStatus::Passed);

        let (final_code, reverted) = if test_passed {
            (refactored_code, false)
        } else {
            warn!(task_id = %task.id, "refactor broke the test, reverting");
            (original_code, true)
        };

        tokio::fs::write(&green.impl_path, &final_code)
            .await
            .map_err(|e| HConductorError::resource(format!("failed to restore implementation: {e}")))?;

        cycle
            .complete_refactor(true)
            .map_err(|e| HConductorError::workflow(e.to_string()))?;

        let result = RefactorResult {
            impl_path: green.impl_path.clone(),
            test_output: run.combined_output(),
            test_passed: true,
            reverted,
        };
        cycle.set_refactor_result(result.clone());
        info!(task_id = %task.id, reverted, "REFACTOR phase complete");
        Ok(result)
    }

    pub fn max_green_retries(&self) -> u32 {
        self.max_green_retries
    }
}

pub fn new_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(1), Duration::from_secs(30))
}

pub fn is_cycle_done(result: &CycleResult) -> bool {
    matches!(result.state, CycleState::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_code_block() {
        let raw = "Here is the code:\n```python\ndef add(a, b):\n    return a + b\n```\nThat's it.";
        let code = extract_code(raw);
        assert_eq!(code.trim(), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn falls_back_to_raw_when_no_fence() {
        let raw = "def add(a, b):\n    return a + b";
        assert_eq!(extract_code(raw), raw);
    }

    #[test]
    fn derives_python_test_filename() {
        assert_eq!(derive_test_filename("calculator/add.py"), "test_add.py");
    }

    #[test]
    fn derives_rust_test_filename() {
        assert_eq!(derive_test_filename("src/add.rs"), "add_test.rs");
    }
}
