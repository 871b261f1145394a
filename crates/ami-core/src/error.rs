//! Error types for the manager-interface gateway

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type for gateway operations
pub type AmiResult<T> = Result<T, AmiError>;

/// One failed step of a multi-section configuration operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// Short name of the step (e.g. "create auth section")
    pub step: String,
    /// Message reported by the switch, verbatim
    pub message: String,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Errors produced by the correlation engine and the configuration
/// transaction manager.
///
/// Parsers never produce these; they substitute defaults instead.
#[derive(Debug, Clone, Error)]
pub enum AmiError {
    /// No reply arrived before the deadline. Retryable by resubmitting.
    #[error("No reply to {action} within {timeout_ms} ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// The connection dropped or is not established. In-flight actions are
    /// not retried automatically.
    #[error("Link down: {reason}")]
    LinkDown { reason: String },

    /// The switch answered with a failure record
    #[error("{action} failed: {message}")]
    Protocol { action: String, message: String },

    /// The target entity does not exist
    #[error("{entity} not found")]
    NotFound { entity: String },

    /// Some steps of a multi-section operation failed while others succeeded
    #[error("{}", describe_partial(.completed, .failed))]
    PartialFailure {
        completed: Vec<String>,
        failed: Vec<StepFailure>,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn describe_partial(completed: &[String], failed: &[StepFailure]) -> String {
    let failures: Vec<String> = failed.iter().map(|f| f.to_string()).collect();
    format!(
        "{} step(s) failed after {} completed: {}",
        failed.len(),
        completed.len(),
        failures.join("; ")
    )
}

impl AmiError {
    pub fn timeout(action: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            action: action.into(),
            timeout_ms,
        }
    }

    pub fn link_down(reason: impl Into<String>) -> Self {
        Self::LinkDown {
            reason: reason.into(),
        }
    }

    pub fn protocol(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether resubmitting the same action may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::LinkDown { .. })
    }

    /// Short category name used in structured logs
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::LinkDown { .. } => "link_down",
            Self::Protocol { .. } => "protocol",
            Self::NotFound { .. } => "not_found",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Config { .. } => "config",
        }
    }

    /// The message a caller should show: the switch's own text for protocol
    /// failures and the first failed step's text for partial failures.
    pub fn user_message(&self) -> String {
        match self {
            Self::Protocol { message, .. } => message.clone(),
            Self::PartialFailure { failed, .. } if failed.len() == 1 => failed[0].message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for AmiError {
    fn from(err: std::io::Error) -> Self {
        Self::link_down(err.to_string())
    }
}
