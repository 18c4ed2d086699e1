use thiserror::Error;

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Failures a decision cycle can run into.
///
/// Safety overrides (pause, emergency, alarms, storms) are not errors; they
/// are recorded as regular actions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    /// Upstream timeout or 5xx. Retried naturally on the next cycle.
    #[error("transient upstream failure in {service}: {message}")]
    TransientUpstream { service: String, message: String },

    /// Upstream rejected the request or returned something unparseable.
    #[error("upstream error in {service}: {message}")]
    Upstream { service: String, message: String },

    /// Credentials expired and the single re-login attempt failed.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Settings failed validation; the cycle aborts before any hardware call.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The cycle deadline elapsed while a stage was still running.
    #[error("cycle deadline of {seconds}s exceeded during {stage}")]
    DeadlineExceeded { stage: String, seconds: u64 },

    /// Optimistic concurrency check failed on a versioned write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ControlError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a later cycle may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientUpstream { .. } | Self::DeadlineExceeded { .. } | Self::Conflict(_)
        )
    }

    /// Short machine-friendly kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientUpstream { .. } => "transient_upstream",
            Self::Upstream { .. } => "upstream",
            Self::AuthExpired(_) => "auth_expired",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<validator::ValidationErrors> for ControlError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ControlError::ConfigInvalid(errors.to_string())
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(error: serde_json::Error) -> Self {
        ControlError::Storage(format!("serialization failed: {error}"))
    }
}
