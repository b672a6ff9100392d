//! # Structured Error Handling
//!
//! Crate-wide error taxonomy for the orchestration kernel. Errors are split
//! along the boundaries they cross: admission errors are rejected before any
//! work is scheduled, dependency and backend errors surface through
//! completion/flow failure paths, and internal faults are converted into a
//! generic reply at the service boundary so a caller always gets an answer.

use std::collections::BTreeSet;

use crate::resource::{CommandKind, ResourceState};

/// Top-level error type for orchestration operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationError {
    /// The resource's current state does not admit the command
    #[error("current resource state [{current}] doesn't allow command [{command}], allowed states are {allowed:?}")]
    OperationNotAllowed {
        command: CommandKind,
        current: ResourceState,
        allowed: BTreeSet<ResourceState>,
    },

    /// Malformed or inconsistent input to a command
    #[error("validation error: {0}")]
    Validation(String),

    /// A dependent resource vetoed or failed an operation during cascade
    #[error("dependent resource error while cascading for issuer [{issuer}]: {detail}")]
    Dependency { issuer: String, detail: String },

    /// An external backend reported failure through its completion
    #[error("backend operation [{operation}] failed: {detail}")]
    Backend { operation: String, detail: String },

    /// Lookup of a resource record that no longer exists
    #[error("resource [{id}] not found")]
    ResourceNotFound { id: uuid::Uuid },

    /// An extension vetoed the operation before any side effect
    #[error("extension [{extension}] vetoed the operation: {reason}")]
    Vetoed { extension: String, reason: String },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected fault caught at the message-handling boundary
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Wrap a lower-level error with the name of the operation it aborted
    pub fn backend(operation: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// Whether this error means the target resource simply no longer exists.
    /// Cascade phases treat this as "already satisfied" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_not_allowed_message_names_states() {
        let err = OrchestrationError::OperationNotAllowed {
            command: CommandKind::Start,
            current: ResourceState::Running,
            allowed: [ResourceState::Stopped].into_iter().collect(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[running]"));
        assert!(msg.contains("[start]"));
        // allowed set renders via Debug
        assert!(msg.contains("Stopped"));
    }

    #[test]
    fn test_not_found_detection() {
        let err = OrchestrationError::ResourceNotFound {
            id: uuid::Uuid::new_v4(),
        };
        assert!(err.is_not_found());
        assert!(!OrchestrationError::Internal("boom".into()).is_not_found());
    }
}
