use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

// ─── Error codes ─────────────────────────────────────────────────────────────

/// Closed set of failure classes every kernel component reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    GateDenied,
    StanceViolation,
    WriteDenied,
    ConflictDetected,
    EscalationRequired,
    StrategyFailed,
    AgentViolation,
    AgentTimeout,
    ValidationFailed,
    Internal,
}

impl ErrorCode {
    /// Whether callers may fall back to a more conservative action.
    #[must_use]
    pub const fn default_recoverable(self) -> bool {
        match self {
            Self::GateDenied
            | Self::WriteDenied
            | Self::ConflictDetected
            | Self::AgentTimeout
            | Self::EscalationRequired
            | Self::StrategyFailed => true,
            Self::StanceViolation
            | Self::AgentViolation
            | Self::ValidationFailed
            | Self::Internal => false,
        }
    }
}

// ─── Kernel error ────────────────────────────────────────────────────────────

/// Single error type for the governance kernel.
///
/// Recoverable errors (gate denials, write denials, conflicts) are expected to
/// be handled by the caller with a more conservative action. Non-recoverable
/// ones abort the current unit of work and must be surfaced.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct KernelError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl KernelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.default_recoverable(),
            context: None,
        }
    }

    pub fn gate_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GateDenied, message)
    }

    pub fn stance_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StanceViolation, message)
    }

    pub fn write_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WriteDenied, message)
    }

    pub fn conflict_detected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConflictDetected, message)
    }

    pub fn escalation_required(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EscalationRequired, message)
    }

    pub fn strategy_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StrategyFailed, message)
    }

    pub fn agent_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AgentViolation, message)
    }

    pub fn agent_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AgentTimeout, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Timeouts are the only class a caller may retry (with its own backoff).
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::AgentTimeout
    }
}

impl From<anyhow::Error> for KernelError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{error:#}"))
    }
}

impl From<sqlx::Error> for KernelError {
    fn from(error: sqlx::Error) -> Self {
        Self::internal(format!("sqlx: {error}"))
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_denied_is_recoverable_and_displays_code() {
        let err = KernelError::gate_denied("framing incomplete");
        assert!(err.recoverable);
        assert_eq!(err.to_string(), "gate_denied: framing incomplete");
    }

    #[test]
    fn agent_violation_is_not_recoverable() {
        let err = KernelError::agent_violation("decision marker in output");
        assert!(!err.recoverable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(KernelError::agent_timeout("slow").is_retryable());
        assert!(!KernelError::write_denied("nope").is_retryable());
    }

    #[test]
    fn anyhow_interop_maps_to_internal() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: KernelError = anyhow_err.into();
        assert_eq!(err.code, ErrorCode::Internal);
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn context_round_trips_through_serde() {
        let err = KernelError::validation_failed("weights")
            .with_context(serde_json::json!({ "sum": 0.9 }));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "validation_failed");
        assert_eq!(json["context"]["sum"], 0.9);
    }
}
