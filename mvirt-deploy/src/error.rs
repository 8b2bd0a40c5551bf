//! Error types for mvirt-deploy.

use std::time::Duration;

use thiserror::Error;

use crate::model::TaskKey;

/// Error codes the provider uses when the caller lacks permission.
const UNAUTHORIZED_CODES: &[&str] = &[
    "UnauthorizedOperation",
    "AccessDenied",
    "AccessDeniedException",
];

/// An error returned by a provider API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A "no such object" error, as returned by by-ID lookups.
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("NotFound")
            || self.code == "NoSuchEntity"
            || self.code.starts_with("NoSuch")
            || self.code == "ResourceNotFoundException"
    }

    pub fn is_unauthorized(&self) -> bool {
        UNAUTHORIZED_CODES.contains(&self.code.as_str())
    }

    /// Whether the provider rejected a request because an object it created
    /// moments earlier is not visible yet.
    pub fn is_propagation(&self) -> bool {
        match self.code.as_str() {
            "ValidationError" | "InvalidParameterValue" | "InvalidParameterCombination" => {
                self.message.contains("Invalid IamInstanceProfile")
                    || self.message.contains("not yet available")
                    || self.message.contains("does not exist")
            }
            "DependencyViolation" | "IncorrectState" | "ResourceInUse" => true,
            _ => false,
        }
    }
}

/// Errors that can occur while reconciling or rendering a task set.
#[derive(Debug, Error)]
pub enum Error {
    /// A desired record lacks a field that cannot be defaulted.
    #[error("{key}: required field {field} is missing")]
    RequiredFieldMissing { key: TaskKey, field: &'static str },

    /// The diff proposes changing a field that is immutable once created.
    #[error("{key}: cannot change field {field}")]
    CannotChange { key: TaskKey, field: &'static str },

    /// More than one provider object matches a single task.
    #[error("{key}: found {count} matching resources, expected at most one")]
    AmbiguousFind { key: TaskKey, count: usize },

    /// A lifecycle=shared resource does not exist in the account.
    #[error("{key}: shared resource was not found")]
    SharedNotFound { key: TaskKey },

    /// A lifecycle=exists-only resource does not exist in the account.
    #[error("{key}: resource is required to exist but was not found")]
    RequiredResourceMissing { key: TaskKey },

    /// The provider has not yet observed an object it created earlier.
    #[error("not yet consistent: {0}")]
    Propagation(String),

    /// The resource exists but is not yet usable.
    #[error("not yet available: {0}")]
    NotYetAvailable(String),

    /// The caller is not permitted to perform the operation.
    #[error("not authorized: {0}")]
    Unauthorized(ProviderError),

    /// Any other provider failure.
    #[error("provider error: {0}")]
    Provider(ProviderError),

    /// The desired record is malformed.
    #[error("{key}: invalid record: {message}")]
    InvalidRecord { key: TaskKey, message: String },

    /// A task references a task that is not in the task set.
    #[error("{key}: references unknown task {dependency}")]
    UnknownDependency { key: TaskKey, dependency: TaskKey },

    /// Two tasks share the same key.
    #[error("duplicate task {0}")]
    DuplicateTask(TaskKey),

    /// The dependency graph is not acyclic.
    #[error("dependency cycle involving {}", format_keys(.0))]
    DependencyCycle(Vec<TaskKey>),

    /// A referenced task has not published the attribute a dependent needs.
    #[error("{key}: attribute {attribute} is not available")]
    MissingAttribute { key: TaskKey, attribute: &'static str },

    /// A task failed; wraps the underlying cause.
    #[error("{key}: {source}")]
    TaskFailed {
        key: TaskKey,
        #[source]
        source: Box<Error>,
    },

    /// The run did not complete before `max_task_duration`.
    #[error("tasks not complete after {elapsed:?}: {}", format_pending(.pending))]
    Deadline {
        elapsed: Duration,
        pending: Vec<(TaskKey, String)>,
    },

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// Stopped because another task in the same wave failed fatally.
    #[error("aborted after a fatal error in the same wave")]
    Aborted,

    /// A manifest could not be rendered.
    #[error("render error: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the scheduler should retry the task later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Propagation(_) | Error::NotYetAvailable(_) => true,
            Error::TaskFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error invalidates the whole run rather than a single task.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::AmbiguousFind { .. }
            | Error::Unauthorized(_)
            | Error::InvalidRecord { .. }
            | Error::UnknownDependency { .. }
            | Error::DuplicateTask(_)
            | Error::DependencyCycle(_)
            | Error::Cancelled => true,
            Error::TaskFailed { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// The innermost error, looking through `TaskFailed` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn task(key: TaskKey, source: Error) -> Self {
        match source {
            already @ Error::TaskFailed { .. } => already,
            source => Error::TaskFailed {
                key,
                source: Box::new(source),
            },
        }
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        if e.is_unauthorized() {
            Error::Unauthorized(e)
        } else if e.is_propagation() {
            Error::Propagation(e.to_string())
        } else {
            Error::Provider(e)
        }
    }
}

fn format_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_pending(pending: &[(TaskKey, String)]) -> String {
    pending
        .iter()
        .map(|(key, reason)| format!("{key} ({reason})"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for mvirt-deploy operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;

    #[test]
    fn test_instance_profile_lag_is_retryable() {
        let e: Error = ProviderError::new(
            "ValidationError",
            "Invalid IamInstanceProfile: nodes.example.com",
        )
        .into();
        assert!(matches!(e, Error::Propagation(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn test_access_denied_is_fatal() {
        let e: Error = ProviderError::new("AccessDenied", "no").into();
        assert!(matches!(e, Error::Unauthorized(_)));
        assert!(e.is_fatal());
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_task_failed_does_not_double_wrap() {
        let key = TaskKey::new(Kind::Subnet, "a");
        let inner = Error::task(key.clone(), Error::Propagation("x".into()));
        let outer = Error::task(TaskKey::new(Kind::Vpc, "b"), inner);
        match &outer {
            Error::TaskFailed { key: k, .. } => assert_eq!(k, &key),
            other => panic!("Unexpected error: {:?}", other),
        }
        assert!(outer.is_retryable());
    }
}
