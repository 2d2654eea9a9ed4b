//! Task registry and run creation.

use std::sync::Arc;

use tracing::{error, info};

use taskpod_core::{Run, Task, TaskId};

use crate::error::{AppError, ErrorCode, PersistenceError, ProvisioningError};
use crate::persistence::{RunRepository, TaskRepository};
use crate::service::TaskRunResponse;
use crate::storage::FileStorageHandler;

/// Registers tasks and creates their runs.
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    runs: Arc<dyn RunRepository>,
    storage: Arc<dyn FileStorageHandler>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        runs: Arc<dyn RunRepository>,
        storage: Arc<dyn FileStorageHandler>,
    ) -> Self {
        Self {
            tasks,
            runs,
            storage,
        }
    }

    /// Register a built task.
    pub async fn register_task(&self, task: Task) -> Result<Task, PersistenceError> {
        self.tasks.save_task(task.clone()).await?;
        info!(
            task_id = %task.id,
            namespace = %task.namespace,
            version = %task.version,
            "Task registered"
        );
        Ok(task)
    }

    pub async fn find_task(&self, id: &TaskId) -> Result<Task, ProvisioningError> {
        self.tasks
            .find_task(id)
            .await?
            .ok_or_else(|| ErrorCode::TaskNotFound.into())
    }

    pub async fn find_task_by_namespace_and_version(
        &self,
        namespace: &str,
        version: &str,
    ) -> Result<Task, ProvisioningError> {
        self.tasks
            .find_task_by_namespace_and_version(namespace, version)
            .await?
            .ok_or_else(|| ErrorCode::TaskNotFound.into())
    }

    /// Create a CREATED run of `task_id` with empty input and output storages.
    pub async fn create_run(&self, task_id: &TaskId) -> Result<TaskRunResponse, ProvisioningError> {
        let task = self.find_task(task_id).await?;
        if task.inputs.is_empty() {
            return Err(ErrorCode::TaskHasNoInputs.into());
        }

        let run = Run::new(task.id.clone());
        self.runs.save_run(run.clone()).await?;

        for storage_id in [run.id.inputs_storage_id(), run.id.outputs_storage_id()] {
            if let Err(e) = self.storage.create_storage(&storage_id).await {
                error!(run_id = %run.id, storage = %storage_id, error = %e, "Failed to create storage");
                return Err(AppError {
                    message: e.to_string(),
                    ..AppError::new(ErrorCode::StorageStoringFailed)
                }
                .into());
            }
        }

        info!(run_id = %run.id, task_id = %task.id, "Run created");
        Ok(TaskRunResponse::new(&run, &task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::storage::FileSystemStorage;
    use taskpod_core::{Parameter, ParameterType, RunState};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> (Arc<AppState>, Arc<FileSystemStorage>, TaskService) {
        let state = AppState::new();
        let storage = Arc::new(FileSystemStorage::new(dir.path()));
        let service = TaskService::new(state.clone(), state.clone(), storage.clone());
        (state, storage, service)
    }

    fn task_with_input() -> Task {
        Task::builder("segmentation", "1.0.0")
            .input(Parameter::new(
                "threshold",
                ParameterType::Number(Default::default()),
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_run_creates_storages() {
        let dir = TempDir::new().unwrap();
        let (state, storage, service) = service(&dir);
        let task = service.register_task(task_with_input()).await.unwrap();

        let response = service.create_run(&task.id).await.unwrap();
        assert_eq!(response.state, RunState::Created);
        assert_eq!(response.task.namespace, "segmentation");
        assert!(storage
            .storage_exists(&response.id.inputs_storage_id())
            .await
            .unwrap());
        assert!(storage
            .storage_exists(&response.id.outputs_storage_id())
            .await
            .unwrap());
        assert!(state.find_run(&response.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_task_without_inputs_cannot_run() {
        let dir = TempDir::new().unwrap();
        let (_, _, service) = service(&dir);
        let task = service
            .register_task(Task::builder("empty", "1.0.0").build().unwrap())
            .await
            .unwrap();

        let err = service.create_run(&task.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskHasNoInputs);
    }

    #[tokio::test]
    async fn test_find_task() {
        let dir = TempDir::new().unwrap();
        let (_, _, service) = service(&dir);
        let task = service.register_task(task_with_input()).await.unwrap();

        let found = service
            .find_task_by_namespace_and_version("segmentation", "1.0.0")
            .await
            .unwrap();
        assert_eq!(found.id, task.id);

        let err = service.find_task(&TaskId::new("missing")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
        let err = service.create_run(&TaskId::new("missing")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
    }
}
