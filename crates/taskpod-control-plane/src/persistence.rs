//! Persistence collaborator.
//!
//! The repositories are the source of truth for tasks, runs and parameter
//! values. Run state changes go through [`RunRepository::update_state`], which
//! checks its guard and applies the change as one read-modify-write.

use async_trait::async_trait;

use taskpod_core::{
    ParameterDirection, Run, RunId, RunState, StateGuard, Task, TaskId, TypePersistence,
};

use crate::error::PersistenceError;

/// Registered tasks.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a task. Namespace and version must be unique.
    async fn save_task(&self, task: Task) -> Result<(), PersistenceError>;

    async fn find_task(&self, id: &TaskId) -> Result<Option<Task>, PersistenceError>;

    async fn find_task_by_namespace_and_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Option<Task>, PersistenceError>;
}

/// Task runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn save_run(&self, run: Run) -> Result<(), PersistenceError>;

    async fn find_run(&self, id: &RunId) -> Result<Option<Run>, PersistenceError>;

    /// Move the run to `to` if `guard` allows its current state.
    ///
    /// Fails with [`PersistenceError::StateConflict`] when the guard rejects it.
    async fn update_state(
        &self,
        id: &RunId,
        guard: StateGuard,
        to: RunState,
    ) -> Result<Run, PersistenceError>;
}

/// Persisted parameter values, one row per (run, parameter, direction).
#[async_trait]
pub trait TypePersistenceRepository: Send + Sync {
    async fn find_parameter(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
    ) -> Result<Option<TypePersistence>, PersistenceError>;

    /// Insert the row, or replace the existing one with the same key.
    async fn upsert_parameter(&self, record: TypePersistence) -> Result<(), PersistenceError>;

    /// Rows of one direction for a run, ordered by parameter name.
    async fn find_parameters(
        &self,
        run_id: &RunId,
        direction: ParameterDirection,
    ) -> Result<Vec<TypePersistence>, PersistenceError>;
}
