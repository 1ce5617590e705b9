use std::time::Duration;

use tracing::info;

/// Bounded-attempt retry policy with exponential backoff, mirroring the
/// self-repair loop driving the GREEN phase of a TDD cycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    attempt_count: u32,
    error_history: Vec<String>,
    is_complete: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            attempt_count: 0,
            error_history: Vec::new(),
            is_complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error_history.last().map(|s| s.as_str())
    }

    pub fn should_retry(&self) -> bool {
        !self.is_complete && self.attempt_count < self.max_attempts
    }

    pub fn record_attempt(&mut self, success: bool, error: Option<String>) {
        self.attempt_count += 1;
        if success {
            self.is_complete = true;
            info!(attempt = self.attempt_count, "attempt succeeded");
        } else {
            if let Some(err) = error {
                self.error_history.push(err);
            }
            info!(
                attempt = self.attempt_count,
                max = self.max_attempts,
                "attempt failed"
            );
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn error_history(&self) -> &[String] {
        &self.error_history
    }

    /// `min(base_delay * 2^(attempt_count-1), max_delay)`, zero before the first attempt.
    pub fn backoff_delay(&self) -> Duration {
        if self.attempt_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(self.attempt_count - 1).unwrap_or(u64::MAX);
        let delay = self.base_delay.saturating_mul(factor as u32);
        delay.min(self.max_delay)
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.error_history.clear();
        self.is_complete = false;
        info!("retry policy reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn should_retry_until_max_attempts() {
        let mut policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30));
        assert!(policy.should_retry());
        policy.record_attempt(false, Some("e1".into()));
        assert!(policy.should_retry());
        policy.record_attempt(false, Some("e2".into()));
        assert!(!policy.should_retry());
        assert_eq!(policy.error_history(), ["e1", "e2"]);
    }

    #[test]
    fn stops_retrying_once_complete() {
        let mut policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));
        policy.record_attempt(true, None);
        assert!(!policy.should_retry());
        assert!(policy.is_complete());
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let mut policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(8));
        let mut delays = Vec::new();
        for _ in 0..6 {
            policy.record_attempt(false, None);
            delays.push(policy.backoff_delay());
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn reset_clears_state() {
        let mut policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        policy.record_attempt(false, Some("e".into()));
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.error_history().is_empty());
        assert_eq!(policy.backoff_delay(), Duration::ZERO);
    }
}
