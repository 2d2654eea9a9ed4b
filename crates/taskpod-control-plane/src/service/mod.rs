//! Task-run services.

pub mod provisioning;
pub mod task_service;
mod type_context;

use chrono::{DateTime, Utc};
use serde::Serialize;

use taskpod_core::{Run, RunId, RunState, Task, TaskDescription};

pub use provisioning::ProvisioningService;
pub use task_service::TaskService;
pub use type_context::TypeContext;

/// A run as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunResponse {
    pub task: TaskDescription,
    pub id: RunId,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_state_transition_at: DateTime<Utc>,
}

impl TaskRunResponse {
    pub fn new(run: &Run, task: &Task) -> Self {
        Self {
            task: task.description(),
            id: run.id.clone(),
            state: run.state,
            created_at: run.created_at,
            updated_at: run.updated_at,
            last_state_transition_at: run.last_state_transition_at,
        }
    }
}

/// Result of an accepted state-change request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateAction {
    pub status: &'static str,
    pub resource: TaskRunResponse,
}

impl StateAction {
    pub fn success(resource: TaskRunResponse) -> Self {
        Self {
            status: "success",
            resource,
        }
    }
}
