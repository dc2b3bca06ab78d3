//! Error types for converge

use crate::types::Diagnostics;
use std::fmt;

/// Lifecycle operation an error was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Plan,
    Create,
    Read,
    Update,
    Delete,
    Drain,
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Plan => "planning",
            Operation::Create => "creating",
            Operation::Read => "reading",
            Operation::Update => "updating",
            Operation::Delete => "deleting",
            Operation::Drain => "emptying",
            Operation::Import => "importing",
        };
        f.write_str(name)
    }
}

/// Why the remote side refused a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// A container still holds objects
    NotEmpty,
    Other(String),
}

/// Errors reported by a control-plane client
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {message}")]
    Conflict {
        reason: ConflictReason,
        message: String,
    },

    /// Network or throttling failure the client already retried
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_not_empty(&self) -> bool {
        matches!(
            self,
            RemoteError::Conflict {
                reason: ConflictReason::NotEmpty,
                ..
            }
        )
    }
}

/// Error type for converge operations
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("invalid configuration: {0}")]
    Validation(Diagnostics),

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("{resource_type} ({identity}) must be replaced: {} require replacement", .attributes.join(", "))]
    ReplacementRequired {
        resource_type: String,
        identity: String,
        attributes: Vec<String>,
    },

    #[error("change set was planned against {planned:?} but the managed object is {actual:?}")]
    StaleChangeSet {
        planned: Option<String>,
        actual: Option<String>,
    },

    #[error("cannot start {operation} {resource_type} while it is {state}")]
    InvalidTransition {
        resource_type: String,
        operation: Operation,
        state: String,
    },

    #[error("{operation} {resource_type} ({identity}): {source}")]
    Remote {
        operation: Operation,
        resource_type: String,
        identity: String,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} {resource_type} ({identity}) cancelled{}", progress_suffix(.completed))]
    Cancelled {
        operation: Operation,
        resource_type: String,
        identity: String,
        completed: Vec<String>,
    },

    #[error("{operation} {resource_type} ({identity}) timed out{}", progress_suffix(.completed))]
    Timeout {
        operation: Operation,
        resource_type: String,
        identity: String,
        completed: Vec<String>,
    },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}

fn progress_suffix(completed: &[String]) -> String {
    if completed.is_empty() {
        String::new()
    } else {
        format!(" after: {}", completed.join(", "))
    }
}

impl ConvergeError {
    /// The remote error behind this failure, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ConvergeError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ConvergeError::Validation(_))
    }
}

/// Result type alias for converge operations
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl From<String> for ConvergeError {
    fn from(s: String) -> Self {
        ConvergeError::Custom(s)
    }
}

impl From<&str> for ConvergeError {
    fn from(s: &str) -> Self {
        ConvergeError::Custom(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_carries_operation_and_identity() {
        let err = ConvergeError::Remote {
            operation: Operation::Delete,
            resource_type: "aws_s3_directory_bucket".to_string(),
            identity: "b--usw2-az2--x-s3".to_string(),
            source: RemoteError::Fatal("access denied".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "deleting aws_s3_directory_bucket (b--usw2-az2--x-s3): access denied"
        );
        assert!(err.remote().is_some());
    }

    #[test]
    fn cancelled_lists_completed_steps() {
        let err = ConvergeError::Cancelled {
            operation: Operation::Delete,
            resource_type: "bucket".to_string(),
            identity: "b".to_string(),
            completed: vec!["drain".to_string()],
        };
        assert_eq!(err.to_string(), "deleting bucket (b) cancelled after: drain");
    }

    #[test]
    fn conflict_reason_classification() {
        let err = RemoteError::Conflict {
            reason: ConflictReason::NotEmpty,
            message: "bucket not empty".to_string(),
        };
        assert!(err.is_not_empty());
        assert!(!err.is_not_found());
    }
}
