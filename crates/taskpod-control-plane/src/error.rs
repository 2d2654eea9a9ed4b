//! Control plane errors.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use taskpod_core::{RunId, RunState, TaskId, TypeValidationError, ValidationCode};

/// Failure of the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure on one storage or entry.
    #[error("Failed to {operation} '{entry}': {source}")]
    Io {
        operation: &'static str,
        entry: String,
        #[source]
        source: std::io::Error,
    },

    /// The storage does not exist.
    #[error("Storage not found: {0}")]
    StorageNotFound(String),

    /// The requested entry does not exist in the storage.
    #[error("Entry '{entry}' not found in storage '{storage_id}'")]
    EntryNotFound { storage_id: String, entry: String },

    /// A storage id or node name that is not a single path segment.
    #[error("Invalid path segment '{0}'")]
    InvalidSegment(String),
}

impl StorageError {
    pub(crate) fn io(operation: &'static str, entry: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            entry: entry.into(),
            source,
        }
    }

    /// Name of the storage or entry the failure is about.
    pub fn entry(&self) -> &str {
        match self {
            Self::Io { entry, .. } | Self::EntryNotFound { entry, .. } => entry,
            Self::StorageNotFound(storage_id) | Self::InvalidSegment(storage_id) => storage_id,
        }
    }
}

/// Failure of the scheduler collaborator.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// The dispatch queue has no consumer any more.
    #[error("Scheduler queue is closed")]
    QueueClosed,
}

/// Failure of the persistence collaborator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// Run not found.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A task with the same namespace and version is already registered.
    #[error("Task {namespace}:{version} already exists")]
    TaskAlreadyExists { namespace: String, version: String },

    /// A guarded state update found the run in a state its guard rejects.
    #[error("Run {run_id} is {current}, refusing transition to {requested}")]
    StateConflict {
        run_id: RunId,
        current: RunState,
        requested: RunState,
    },
}

/// Stable error codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    RunNotFound,
    TaskNotFound,
    TaskHasNoInputs,
    ParameterDoesNotExist,
    ParameterValidation(ValidationCode),
    JsonProcessing,
    InvalidTaskRunState,
    NotProvisioned,
    ProvisionsNotFound,
    UnknownState,
    UnknownOutput,
    MissingOutputs,
    InvalidArchive,
    StorageStoringFailed,
    StorageReadingFailed,
    SchedulingFailed,
    Batch,
    Internal,
}

impl ErrorCode {
    /// Wire code, e.g. `APPE-internal-run-not-found`.
    pub fn code(&self) -> String {
        let code = match self {
            Self::RunNotFound => "internal-run-not-found",
            Self::TaskNotFound => "internal-task-not-found",
            Self::TaskHasNoInputs => "internal-task-has-no-inputs",
            Self::ParameterDoesNotExist => "internal-parameter-does-not-exist",
            Self::ParameterValidation(code) => {
                return format!("APPE-internal-parameter-{}-validation-error", code.as_str())
            }
            Self::JsonProcessing => "internal-json-processing-error",
            Self::InvalidTaskRunState => "internal-invalid-task-run-state",
            Self::NotProvisioned => "internal-not-provisioned",
            Self::ProvisionsNotFound => "internal-provisions-not-found",
            Self::UnknownState => "internal-unknown-state",
            Self::UnknownOutput => "internal-unknown-output",
            Self::MissingOutputs => "internal-missing-outputs",
            Self::InvalidArchive => "internal-invalid-archive",
            Self::StorageStoringFailed => "storage-storing-input-failed",
            Self::StorageReadingFailed => "storage-reading-file-failed",
            Self::SchedulingFailed => "scheduler-scheduling-failed",
            Self::Batch => "internal-request-validation-error",
            Self::Internal => "internal-server-error",
        };
        format!("APPE-{code}")
    }

    /// Default human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::RunNotFound => "task run not found",
            Self::TaskNotFound => "task not found",
            Self::TaskHasNoInputs => "task has no inputs to provision",
            Self::ParameterDoesNotExist => "parameter not found in the task descriptor",
            Self::ParameterValidation(_) => "parameter value failed validation",
            Self::JsonProcessing => "provision could not be processed",
            Self::InvalidTaskRunState => "task run is not in a valid state for this operation",
            Self::NotProvisioned => "task run is not provisioned",
            Self::ProvisionsNotFound => "no provisions found for the task run",
            Self::UnknownState => "unknown desired state",
            Self::UnknownOutput => "unexpected output, does not match any declared output",
            Self::MissingOutputs => "some declared outputs are missing",
            Self::InvalidArchive => "archive could not be read",
            Self::StorageStoringFailed => "failed to store parameter in storage",
            Self::StorageReadingFailed => "failed to read parameter from storage",
            Self::SchedulingFailed => "failed to schedule the task run",
            Self::Batch => "one or more provisions are invalid",
            Self::Internal => "internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

/// Parameter an error is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterError {
    pub param_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Error body reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("[{error_code}] {message}")]
pub struct AppError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ParameterError>,
}

impl AppError {
    pub fn new(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            message: error_code.message().to_string(),
            details: None,
        }
    }

    /// An error scoped to one parameter.
    pub fn for_parameter(
        error_code: ErrorCode,
        param_name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            details: Some(ParameterError {
                param_name: param_name.into(),
                description,
            }),
            ..Self::new(error_code)
        }
    }

    /// A rejected value of `param_name`.
    pub fn validation(param_name: impl Into<String>, error: &TypeValidationError) -> Self {
        let error_code = match error.code {
            ValidationCode::ParameterNotFound => ErrorCode::ParameterDoesNotExist,
            code => ErrorCode::ParameterValidation(code),
        };
        Self::for_parameter(error_code, param_name, Some(error.message.clone()))
    }

    /// Parameter this error is about, if any.
    pub fn parameter(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.param_name.as_str())
    }
}

/// Error of a provisioning, retrieval or state-change call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    /// One error.
    #[error("{0}")]
    Single(AppError),

    /// Every failing item of a batch call.
    #[error("{} provision(s) failed", .0.len())]
    Batch(Vec<AppError>),
}

impl ProvisioningError {
    /// Code of the error; `Batch` for batch errors.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Single(error) => error.error_code,
            Self::Batch(_) => ErrorCode::Batch,
        }
    }

    /// Individual errors, one for a single error.
    pub fn errors(&self) -> &[AppError] {
        match self {
            Self::Single(error) => std::slice::from_ref(error),
            Self::Batch(errors) => errors,
        }
    }
}

impl From<AppError> for ProvisioningError {
    fn from(error: AppError) -> Self {
        Self::Single(error)
    }
}

impl From<ErrorCode> for ProvisioningError {
    fn from(code: ErrorCode) -> Self {
        Self::Single(AppError::new(code))
    }
}

impl From<PersistenceError> for ProvisioningError {
    fn from(error: PersistenceError) -> Self {
        let code = match error {
            PersistenceError::RunNotFound(_) => ErrorCode::RunNotFound,
            PersistenceError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            PersistenceError::StateConflict { .. } => ErrorCode::InvalidTaskRunState,
            PersistenceError::TaskAlreadyExists { .. } => ErrorCode::Internal,
        };
        Self::Single(AppError {
            message: error.to_string(),
            ..AppError::new(code)
        })
    }
}

impl From<SchedulingError> for ProvisioningError {
    fn from(error: SchedulingError) -> Self {
        Self::Single(AppError {
            message: error.to_string(),
            ..AppError::new(ErrorCode::SchedulingFailed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ErrorCode::RunNotFound.code(), "APPE-internal-run-not-found");
        assert_eq!(
            ErrorCode::ParameterValidation(ValidationCode::Gt).code(),
            "APPE-internal-parameter-gt-validation-error"
        );
    }

    #[test]
    fn test_validation_error_is_parameter_scoped() {
        let error = AppError::validation(
            "threshold",
            &TypeValidationError::new(ValidationCode::Geq, "too small"),
        );
        assert_eq!(error.parameter(), Some("threshold"));
        assert_eq!(error.error_code, ErrorCode::ParameterValidation(ValidationCode::Geq));

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["error_code"], "APPE-internal-parameter-geq-validation-error");
        assert_eq!(json["details"]["param_name"], "threshold");
    }

    #[test]
    fn test_persistence_error_mapping() {
        let error: ProvisioningError = PersistenceError::RunNotFound(RunId::new("r")).into();
        assert_eq!(error.code(), ErrorCode::RunNotFound);
        assert_eq!(error.errors().len(), 1);
    }
}
