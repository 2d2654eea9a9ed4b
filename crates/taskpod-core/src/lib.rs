//! TaskPod Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! It holds the task and run model, the run state machine, the parameter
//! type system and the storage data tree used to move parameter payloads
//! between the wire, object storage and persistence.

pub mod charset;
pub mod error;
pub mod formats;
pub mod ids;
pub mod run;
pub mod state;
pub mod storage;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use charset::Charset;
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use run::{Run, StateGuard};
pub use state::{DesiredState, ParameterDirection, RunState};
pub use storage::{EntryId, StorageData, StorageDataEntry, StorageDataType};
pub use task::{Author, Parameter, Task, TaskBuilder, TaskDescription};
pub use types::{
    ParameterType, ParameterValue, PersistedValue, Provision, RawValue, TypePersistence,
    TypeValidationError, TypedValue, ValidationCode, ValueType,
};
