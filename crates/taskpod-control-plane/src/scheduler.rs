//! Scheduler collaborator - hands provisioned runs to the cluster orchestrator.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use taskpod_core::{Run, RunId, Task, TaskId};

use crate::error::SchedulingError;

/// What the orchestrator needs to start a run's pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub image_name: String,
    /// Storage mounted at `input_folder`.
    pub inputs_storage_id: String,
    /// Storage mounted at `output_folder`.
    pub outputs_storage_id: String,
    pub input_folder: String,
    pub output_folder: String,
}

impl Schedule {
    pub fn new(run: &Run, task: &Task) -> Self {
        Self {
            run_id: run.id.clone(),
            task_id: task.id.clone(),
            image_name: task.image_name.clone(),
            inputs_storage_id: run.id.inputs_storage_id(),
            outputs_storage_id: run.id.outputs_storage_id(),
            input_folder: task.input_folder.clone(),
            output_folder: task.output_folder.clone(),
        }
    }
}

/// Fire-and-forget dispatch of a run.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, schedule: Schedule) -> Result<(), SchedulingError>;
}

/// Scheduler that queues dispatches on a channel drained by the orchestrator client.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::Sender<Schedule>,
}

impl ChannelScheduler {
    /// Create a scheduler and the receiving end of its queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Schedule>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
    async fn schedule(&self, schedule: Schedule) -> Result<(), SchedulingError> {
        let run_id = schedule.run_id.clone();
        info!(
            run_id = %run_id,
            task_id = %schedule.task_id,
            image = %schedule.image_name,
            "Scheduling run"
        );
        if self.tx.send(schedule).await.is_err() {
            warn!(run_id = %run_id, "Failed to queue run - orchestrator client gone");
            return Err(SchedulingError::QueueClosed);
        }
        Ok(())
    }
}
