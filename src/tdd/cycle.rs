use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Init,
    Red,
    Green,
    Refactor,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RedResult {
    pub test_path: String,
    pub test_output: String,
    pub test_failed: bool,
}

#[derive(Debug, Clone)]
pub struct GreenResult {
    pub impl_path: String,
    pub test_output: String,
    pub test_passed: bool,
}

#[derive(Debug, Clone)]
pub struct RefactorResult {
    pub impl_path: String,
    pub test_output: String,
    pub test_passed: bool,
    pub reverted: bool,
}

#[derive(Debug, Clone)]
pub struct CycleResult {
    pub state: CycleState,
    pub red_result: Option<RedResult>,
    pub green_result: Option<GreenResult>,
    pub refactor_result: Option<RefactorResult>,
    pub retry_count: u32,
    pub failure_reason: Option<String>,
}

/// Errors raised by invalid use of the cycle, switched on by the retry loop
/// rather than caught by class.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    #[error("cannot perform this action from state {current:?}; allowed: {allowed:?}")]
    InvalidTransition {
        current: CycleState,
        allowed: Vec<CycleState>,
    },

    #[error("test passed in RED phase: the test doesn't test anything")]
    InvalidTest { reasons: Vec<String> },

    #[error("test still fails in GREEN phase: implementation incomplete")]
    NeedsRetry { truncated_output: String },

    #[error("max retries ({retry_count}) exceeded; last error: {}", error_history.last().map(|s| s.as_str()).unwrap_or("unknown"))]
    MaxRetriesExceeded {
        retry_count: u32,
        error_history: Vec<String>,
    },
}

/// Red/Green/Refactor state machine. Transitions out of an allowed state
/// raise `CycleError::InvalidTransition` and do not mutate state.
#[derive(Debug)]
pub struct TddCycle {
    state: CycleState,
    history: Vec<CycleState>,
    failure_reason: Option<String>,
    red_result: Option<RedResult>,
    green_result: Option<GreenResult>,
    refactor_result: Option<RefactorResult>,
    retry_count: u32,
}

impl Default for TddCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TddCycle {
    pub fn new() -> Self {
        Self {
            state: CycleState::Init,
            history: vec![CycleState::Init],
            failure_reason: None,
            red_result: None,
            green_result: None,
            refactor_result: None,
            retry_count: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn history(&self) -> &[CycleState] {
        &self.history
    }

    fn transition(&mut self, new_state: CycleState) {
        info!(from = ?self.state, to = ?new_state, "tdd cycle transition");
        self.state = new_state;
        self.history.push(new_state);
    }

    fn require_state(&self, allowed: &[CycleState]) -> Result<(), CycleError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CycleError::InvalidTransition {
                current: self.state,
                allowed: allowed.to_vec(),
            })
        }
    }

    pub fn start_red(&mut self) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Init])?;
        self.transition(CycleState::Red);
        Ok(())
    }

    pub fn complete_red(&mut self, test_failed: bool) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Red])?;
        if !test_failed {
            return Err(CycleError::InvalidTest {
                reasons: vec!["test passed in RED phase".to_string()],
            });
        }
        self.transition(CycleState::Green);
        Ok(())
    }

    pub fn complete_green(&mut self, test_passed: bool, output: &str) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Green])?;
        if !test_passed {
            return Err(CycleError::NeedsRetry {
                truncated_output: output.chars().take(500).collect(),
            });
        }
        self.transition(CycleState::Refactor);
        Ok(())
    }

    pub fn skip_refactor(&mut self) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Refactor])?;
        self.transition(CycleState::Done);
        Ok(())
    }

    pub fn complete_refactor(&mut self, _test_passed: bool) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Refactor])?;
        self.transition(CycleState::Done);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), CycleError> {
        self.require_state(&[CycleState::Red, CycleState::Green, CycleState::Refactor])?;
        self.failure_reason = Some(reason.into());
        self.transition(CycleState::Failed);
        Ok(())
    }

    pub fn set_red_result(&mut self, result: RedResult) {
        self.red_result = Some(result);
    }

    pub fn set_green_result(&mut self, result: GreenResult) {
        self.green_result = Some(result);
    }

    pub fn set_refactor_result(&mut self, result: RefactorResult) {
        self.refactor_result = Some(result);
    }

    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub fn result(&self) -> CycleResult {
        CycleResult {
            state: self.state,
            red_result: self.red_result.clone(),
            green_result: self.green_result.clone(),
            refactor_result: self.refactor_result.clone(),
            retry_count: self.retry_count,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn happy_path_reaches_done() {
        let mut cycle = TddCycle::new();
        cycle.start_red().unwrap();
        cycle.complete_red(true).unwrap();
        cycle.complete_green(true, "ok").unwrap();
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

    #[test]
    fn red_phase_requires_failure() {
        let mut cycle = TddCycle::new();
        cycle.start_red().unwrap();
        let err = cycle.complete_red(false).unwrap_err();
        assert!(matches!(err, CycleError::InvalidTest { .. }));
        assert_eq!(cycle.state(), CycleState::Red, "invalid transition must not mutate state");
    }

    #[test]
    fn green_phase_requires_pass() {
        let mut cycle = TddCycle::new();
        cycle.start_red().unwrap();
        cycle.complete_red(true).unwrap();
        let err = cycle.complete_green(false, "boom").unwrap_err();
        assert!(matches!(err, CycleError::NeedsRetry { .. }));
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut cycle = TddCycle::new();
        let err = cycle.complete_red(true).unwrap_err();
        assert!(matches!(err, CycleError::InvalidTransition { .. }));
        assert_eq!(cycle.state(), CycleState::Init);
    }

    #[test]
    fn mark_failed_from_any_active_phase() {
        let mut cycle = TddCycle::new();
        cycle.start_red().unwrap();
        cycle.mark_failed("disk full").unwrap();
        assert_eq!(cycle.state(), CycleState::Failed);
    }
}
