//! Structured results handed to front ends such as the CLI

use std::fmt;

use serde::Serialize;

use ispbx_ami_core::AmiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    NotFound,
    NoChanges,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::NoChanges => "no_changes",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result of one gateway call: a status, a human readable message and, on
/// success, the typed payload.
///
/// Errors never cross the gateway boundary as `Err`; they are folded into
/// an `Outcome` with [`OutcomeStatus::Error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    /// Error category for failures (`timeout`, `link_down`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl<T> Outcome<T> {
    pub fn success(message: impl Into<String>, payload: T) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            payload: Some(payload),
            error_kind: None,
        }
    }

    /// Success without a payload
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            payload: None,
            error_kind: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::NotFound,
            message: message.into(),
            payload: None,
            error_kind: Some("not_found"),
        }
    }

    pub fn no_changes(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::NoChanges,
            message: message.into(),
            payload: None,
            error_kind: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            payload: None,
            error_kind: None,
        }
    }

    pub fn with_payload(mut self, payload: T) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Map a gateway error: `NotFound` keeps its own status, everything else
    /// is an error carrying the user-facing message.
    pub fn from_error(error: &AmiError) -> Self {
        match error {
            AmiError::NotFound { .. } => Self::not_found(error.to_string()),
            other => Self {
                status: OutcomeStatus::Error,
                message: other.user_message(),
                payload: None,
                error_kind: Some(other.category()),
            },
        }
    }

    pub fn from_result(result: Result<T, AmiError>, message: impl Into<String>) -> Self {
        match result {
            Ok(payload) => Self::success(message, payload),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ispbx_ami_core::StepFailure;

    #[test]
    fn not_found_is_not_an_error() {
        let outcome: Outcome<()> = Outcome::from_error(&AmiError::not_found("endpoint 999"));
        assert_eq!(outcome.status, OutcomeStatus::NotFound);
        assert!(!outcome.is_error());
        assert_eq!(outcome.message, "endpoint 999 not found");
    }

    #[test]
    fn partial_failure_keeps_switch_message() {
        let error = AmiError::PartialFailure {
            completed: vec!["create endpoint section".into()],
            failed: vec![StepFailure::new("create auth section", "Failed to create category")],
        };
        let outcome: Outcome<()> = Outcome::from_error(&error);
        assert!(outcome.is_error());
        assert_eq!(outcome.message, "Failed to create category");
        assert_eq!(outcome.error_kind, Some("partial_failure"));
    }

    #[test]
    fn serializes_without_empty_payload() {
        let json = serde_json::to_value(Outcome::<u32>::no_changes("No fields to update")).unwrap();
        assert_eq!(json["status"], "no_changes");
        assert!(json.get("payload").is_none());

        let json = serde_json::to_value(Outcome::success("ok", 3u32)).unwrap();
        assert_eq!(json["payload"], 3);
    }
}
