//! In-memory persistence store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use taskpod_core::{
    ParameterDirection, Run, RunId, RunState, StateGuard, Task, TaskId, TypePersistence,
};

use crate::error::PersistenceError;
use crate::persistence::{RunRepository, TaskRepository, TypePersistenceRepository};

/// Key of a persisted parameter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ParameterKey {
    run_id: RunId,
    parameter_name: String,
    direction: ParameterDirection,
}

impl ParameterKey {
    fn new(run_id: &RunId, parameter_name: &str, direction: ParameterDirection) -> Self {
        Self {
            run_id: run_id.clone(),
            parameter_name: parameter_name.to_string(),
            direction,
        }
    }
}

/// Shared application state backing every repository.
pub struct AppState {
    /// Tasks indexed by TaskId.
    pub tasks: RwLock<HashMap<TaskId, Task>>,

    /// Runs indexed by RunId.
    pub runs: RwLock<HashMap<RunId, Run>>,

    /// Parameter rows indexed by (run, name, direction).
    parameters: RwLock<HashMap<ParameterKey, TypePersistence>>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get the number of registered tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Count runs in each state.
    pub async fn run_counts(&self) -> HashMap<RunState, u64> {
        let runs = self.runs.read().await;
        let mut counts = HashMap::new();
        for run in runs.values() {
            *counts.entry(run.state).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            parameters: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TaskRepository for AppState {
    async fn save_task(&self, task: Task) -> Result<(), PersistenceError> {
        let mut tasks = self.tasks.write().await;
        let duplicate = tasks.values().any(|existing| {
            existing.id != task.id
                && existing.namespace == task.namespace
                && existing.version == task.version
        });
        if duplicate {
            return Err(PersistenceError::TaskAlreadyExists {
                namespace: task.namespace,
                version: task.version,
            });
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<Task>, PersistenceError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_task_by_namespace_and_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Option<Task>, PersistenceError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .find(|task| task.namespace == namespace && task.version == version)
            .cloned())
    }
}

#[async_trait]
impl RunRepository for AppState {
    async fn save_run(&self, run: Run) -> Result<(), PersistenceError> {
        self.runs.write().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn find_run(&self, id: &RunId) -> Result<Option<Run>, PersistenceError> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn update_state(
        &self,
        id: &RunId,
        guard: StateGuard,
        to: RunState,
    ) -> Result<Run, PersistenceError> {
        // The write lock is held across the check and the update.
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(id)
            .ok_or_else(|| PersistenceError::RunNotFound(id.clone()))?;
        if !guard.allows(run.state) {
            return Err(PersistenceError::StateConflict {
                run_id: id.clone(),
                current: run.state,
                requested: to,
            });
        }
        run.transition(to);
        Ok(run.clone())
    }
}

#[async_trait]
impl TypePersistenceRepository for AppState {
    async fn find_parameter(
        &self,
        run_id: &RunId,
        parameter_name: &str,
        direction: ParameterDirection,
    ) -> Result<Option<TypePersistence>, PersistenceError> {
        let key = ParameterKey::new(run_id, parameter_name, direction);
        Ok(self.parameters.read().await.get(&key).cloned())
    }

    async fn upsert_parameter(&self, mut record: TypePersistence) -> Result<(), PersistenceError> {
        let key = ParameterKey::new(&record.run_id, &record.parameter_name, record.direction);
        record.updated_at = Utc::now();
        self.parameters.write().await.insert(key, record);
        Ok(())
    }

    async fn find_parameters(
        &self,
        run_id: &RunId,
        direction: ParameterDirection,
    ) -> Result<Vec<TypePersistence>, PersistenceError> {
        let parameters = self.parameters.read().await;
        let mut rows: Vec<TypePersistence> = parameters
            .values()
            .filter(|row| &row.run_id == run_id && row.direction == direction)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.parameter_name.cmp(&b.parameter_name));
        Ok(rows)
    }
}
