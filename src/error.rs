use thiserror::Error;

/// Structured error type covering every abstract kind in the taxonomy:
/// resource, transport, contract, workflow, policy, and recoverable-internal.
#[derive(Error, Debug)]
pub enum HConductorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Disk exhausted, missing file, permissions.
    #[error("resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connect failure, timeout, non-2xx from a model backend.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unknown task type, unknown prompt template, missing prompt variable, parse failure.
    #[error("contract error: {message}")]
    Contract {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid TDD transition, invalid/trivial test, test still failing after green.
    #[error("workflow error: {message}")]
    Workflow {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Max retries exceeded, circuit breaker tripped, quality gate rejection,
    /// traceability drift, merge non-fast-forward.
    #[error("policy error: {message}")]
    Policy {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cleanup failures and similar: logged, swallowed, never fatal to a caller
    /// that chooses to ignore them.
    #[error("internal error (recoverable): {message}")]
    RecoverableInternal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T> = std::result::Result<T, HConductorError>;

/// Attach context to a foreign error, boxing it as the `#[source]`.
pub trait ErrorContext<T> {
    fn context_workflow<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    fn context_resource<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_workflow<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| HConductorError::Workflow {
            message: f(),
            source: Some(Box::new(e)),
        })
    }

    fn context_resource<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| HConductorError::Resource {
            message: f(),
            source: Some(Box::new(e)),
        })
    }
}

impl HConductorError {
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn contract<S: Into<String>>(message: S) -> Self {
        Self::Contract {
            message: message.into(),
            source: None,
        }
    }

    pub fn workflow<S: Into<String>>(message: S) -> Self {
        Self::Workflow {
            message: message.into(),
            source: None,
        }
    }

    pub fn policy<S: Into<String>>(message: S) -> Self {
        Self::Policy {
            message: message.into(),
            source: None,
        }
    }

    pub fn recoverable<S: Into<String>>(message: S) -> Self {
        Self::RecoverableInternal {
            message: message.into(),
            source: None,
        }
    }

    /// Whether a caller may safely log-and-continue rather than abort the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RecoverableInternal { .. })
    }

    /// Classifies this error for monitoring and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Policy { .. } => ErrorSeverity::Critical,
            Self::Workflow { .. } | Self::Contract { .. } => ErrorSeverity::High,
            Self::Resource { .. } | Self::Transport { .. } => ErrorSeverity::Medium,
            Self::Io(_) | Self::SerdeJson(_) => ErrorSeverity::Medium,
            Self::RecoverableInternal { .. } => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels for monitoring and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_are_critical() {
        assert_eq!(HConductorError::policy("merge conflict").severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn recoverable_internal_errors_are_low_severity() {
        assert_eq!(HConductorError::recoverable("cleanup warning").severity(), ErrorSeverity::Low);
    }

    #[test]
    fn severity_is_ordered_low_to_critical() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Critical);
    }
}
