//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TaskPod.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A state-change request named a state that cannot be requested.
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// Two parameters of the same direction share a name.
    #[error("Duplicate parameter name: {0}")]
    DuplicateParameter(String),

    /// An output declared `derived_from` an input that does not exist.
    #[error("Output '{output}' is derived from unknown input '{input}'")]
    UnresolvedDerivedFrom { output: String, input: String },

    /// A child was attached to a file node of a storage tree.
    #[error("Storage entry '{0}' is not a directory")]
    NotADirectory(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
