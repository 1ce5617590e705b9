use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub status: TestStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl TestRunResult {
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs a single test file in a subprocess with a wall-clock timeout. Never
/// propagates an error across this boundary: every outcome, including a
/// failure to even spawn the process, becomes a structured `TestRunResult`.
pub struct TestRunner {
    timeout: Duration,
    interpreter: String,
}

impl TestRunner {
    pub fn new(timeout: Duration, interpreter: impl Into<String>) -> Self {
        Self {
            timeout,
            interpreter: interpreter.into(),
        }
    }

    pub async fn run(&self, test_path: &Path) -> TestRunResult {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(test_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.spawn_and_wait(command).await
    }

    /// Runs an arbitrary shell command (an existing regression suite, e.g.
    /// `pytest tests/`) in `dir` rather than a single generated test file.
    pub async fn run_suite(&self, dir: &Path, command: &str) -> TestRunResult {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.spawn_and_wait(cmd).await
    }

    async fn spawn_and_wait(&self, mut command: Command) -> TestRunResult {
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return TestRunResult {
                    status: TestStatus::Error,
                    stdout: String::new(),
                    stderr: format!("failed to spawn test process: {e}"),
                    exit_code: None,
                }
            }
        };

        let pid = child.id();

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                let status = match exit_code {
                    Some(0) => TestStatus::Passed,
                    Some(1) => TestStatus::Failed,
                    _ => TestStatus::Error,
                };
                TestRunResult {
                    status,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                }
            }
            Ok(Err(e)) => TestRunResult {
                status: TestStatus::Error,
                stdout: String::new(),
                stderr: format!("error waiting for test process: {e}"),
                exit_code: None,
            },
            Err(_) => {
                Self::kill_process_group(pid);
                TestRunResult {
                    status: TestStatus::Timeout,
                    stdout: String::new(),
                    stderr: format!("test timed out after {:?}", self.timeout),
                    exit_code: None,
                }
            }
        }
    }

    #[cfg(unix)]
    fn kill_process_group(pid: Option<u32>) {
        let Some(pid) = pid else { return };
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
            warn!("failed to kill process group {pid}: {e}");
        }
    }

    #[cfg(not(unix))]
    fn kill_process_group(_pid: Option<u32>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn script(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn passing_script_reports_passed() {
        let file = script("exit 0\n");
        let runner = TestRunner::new(Duration::from_secs(5), "sh");
        let result = runner.run(file.path()).await;
        assert_eq!(result.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn failing_script_reports_failed() {
        let file = script("exit 1\n");
        let runner = TestRunner::new(Duration::from_secs(5), "sh");
        let result = runner.run(file.path()).await;
        assert_eq!(result.status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn long_running_script_times_out() {
        let file = script("sleep 5\n");
        let runner = TestRunner::new(Duration::from_millis(100), "sh");
        let result = runner.run(file.path()).await;
        assert_eq!(result.status, TestStatus::Timeout);
    }

    #[tokio::test]
    async fn run_suite_executes_command_string_in_given_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(Duration::from_secs(5), "sh");
        let result = runner.run_suite(dir.path(), "pwd; exit 0").await;
        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.stdout.trim().ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn run_suite_reports_failure_from_command_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(Duration::from_secs(5), "sh");
        let result = runner.run_suite(dir.path(), "echo '1 failed'; exit 1").await;
        assert_eq!(result.status, TestStatus::Failed);
        assert!(result.stdout.contains("1 failed"));
    }
}
