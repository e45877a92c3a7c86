//! Error taxonomy for the operation core.
//!
//! Every variant is recoverable at the request level: the session and its
//! history are left untouched whenever one of these is returned.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::engine::Engine;

/// A single invalid parameter, so callers can highlight the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum WrangleError {
    #[error("Invalid parameters: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("{kind} is not supported by the {engine} engine{}", .reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    UnsupportedCombination {
        kind: String,
        engine: Engine,
        reason: Option<String>,
    },

    #[error("Cannot compile {kind} for the {engine} engine: {message}")]
    Compile {
        kind: String,
        engine: Engine,
        message: String,
    },

    #[error("Execution failed on the {engine} engine: {message}")]
    Execution {
        engine: Engine,
        message: String,
        fragment: String,
    },

    #[error("Execution on the {engine} engine exceeded {} ms", .limit.as_millis())]
    Timeout {
        engine: Engine,
        limit: Duration,
        fragment: String,
    },

    #[error("Dataset '{0}' is busy with another action")]
    Busy(String),

    #[error("Dataset '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WrangleError>;

/// Discriminant of [`WrangleError`], for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnsupportedCombination,
    Compile,
    Execution,
    Timeout,
    Busy,
    NotFound,
    InvalidState,
    Internal,
}

/// Serializable error shape handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

impl WrangleError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, reason)])
    }

    pub fn compile(kind: impl Into<String>, engine: Engine, message: impl Into<String>) -> Self {
        Self::Compile {
            kind: kind.into(),
            engine,
            message: message.into(),
        }
    }

    /// Registry and compiler disagree. Loud in development builds.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "internal invariant violated: {}", message);
        Self::Internal(message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnsupportedCombination { .. } => ErrorKind::UnsupportedCombination,
            Self::Compile { .. } => ErrorKind::Compile,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Busy(_) => ErrorKind::Busy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Field-level detail for validation failures; empty for other kinds.
    pub fn fields(&self) -> &[FieldError] {
        match self {
            Self::Validation(fields) => fields,
            _ => &[],
        }
    }

    /// Source text of the fragment that failed, when execution got that far.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Execution { fragment, .. } | Self::Timeout { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            fields: self.fields().to_vec(),
            fragment: self.fragment().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_fields() {
        let err = WrangleError::Validation(vec![
            FieldError::new("column", "is required"),
            FieldError::new("offset", "must be at least 1"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("column: is required"), "got: {}", msg);
        assert!(msg.contains("offset: must be at least 1"), "got: {}", msg);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.fields().len(), 2);
    }

    #[test]
    fn test_report_carries_fragment() {
        let err = WrangleError::Execution {
            engine: Engine::Relational,
            message: "column not found".to_string(),
            fragment: "SELECT \"x\" FROM \"t\"".to_string(),
        };
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::Execution);
        assert_eq!(report.fragment.as_deref(), Some("SELECT \"x\" FROM \"t\""));
        assert!(report.fields.is_empty());
    }

    #[test]
    fn test_timeout_is_distinct_kind() {
        let err = WrangleError::Timeout {
            engine: Engine::Lazy,
            limit: Duration::from_millis(250),
            fragment: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("250 ms"));
    }

    #[test]
    fn test_unsupported_message_includes_reason() {
        let err = WrangleError::UnsupportedCombination {
            kind: "join".to_string(),
            engine: Engine::Relational,
            reason: Some("not supported for chaining".to_string()),
        };
        assert!(err.to_string().contains("not supported for chaining"));
    }
}
