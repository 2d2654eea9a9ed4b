//! Orchestrator event feed.
//!
//! Pod lifecycle events arrive on a channel in no particular order relative to
//! API calls. Each one becomes a guarded state update that never touches a
//! FINISHED or FAILED run and never moves a RUNNING run back to QUEUED.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use taskpod_core::{Run, RunId, RunState, StateGuard};

/// States a run may be in when the orchestrator reports it queued.
const BEFORE_RUNNING: &[RunState] = &[RunState::Queuing, RunState::Queued];

use crate::error::PersistenceError;
use crate::persistence::RunRepository;

/// Kind of pod event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodAction {
    Added,
    /// Pod changed; carries the reported phase.
    Modified { phase: String },
    Deleted,
    Error,
}

/// A pod event labelled with the run it executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEvent {
    pub run_id: RunId,
    pub pod_name: String,
    pub action: PodAction,
}

impl PodEvent {
    /// Run state this event asks for, if it asks for one.
    pub fn target_state(&self) -> Option<RunState> {
        match &self.action {
            PodAction::Added => Some(RunState::Queued),
            PodAction::Modified { phase } => Some(match phase.as_str() {
                "Pending" => RunState::Queued,
                "Running" | "Succeeded" => RunState::Running,
                _ => RunState::Failed,
            }),
            PodAction::Deleted | PodAction::Error => None,
        }
    }
}

/// Precondition for moving a run to `target` on a pod event.
fn guard_for(target: RunState) -> StateGuard {
    match target {
        RunState::Queued => StateGuard::OneOf(BEFORE_RUNNING),
        _ => StateGuard::NotTerminal,
    }
}

/// Applies pod events to runs.
pub struct PodWatcher {
    runs: Arc<dyn RunRepository>,
}

impl PodWatcher {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self { runs }
    }

    /// Apply one event. Returns the updated run, or `None` if nothing changed.
    pub async fn handle(&self, event: PodEvent) -> Option<Run> {
        let Some(state) = event.target_state() else {
            info!(run_id = %event.run_id, action = ?event.action, "Unrecognized pod event");
            return None;
        };

        match self
            .runs
            .update_state(&event.run_id, guard_for(state), state)
            .await
        {
            Ok(run) => {
                info!(
                    run_id = %run.id,
                    pod = %event.pod_name,
                    state = %run.state,
                    "Updated run state from pod event"
                );
                Some(run)
            }
            Err(PersistenceError::StateConflict { current, .. }) => {
                debug!(
                    run_id = %event.run_id,
                    state = %current,
                    pod = %event.pod_name,
                    "Ignoring out-of-order pod event"
                );
                None
            }
            Err(PersistenceError::RunNotFound(run_id)) => {
                error!(run_id = %run_id, pod = %event.pod_name, "Pod event for unknown run");
                None
            }
            Err(e) => {
                warn!(run_id = %event.run_id, error = %e, "Failed to apply pod event");
                None
            }
        }
    }

    /// Consume `rx` until every sender is dropped.
    pub fn spawn(self, rx: mpsc::Receiver<PodEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = ReceiverStream::new(rx);
            while let Some(event) = events.next().await {
                self.handle(event).await;
            }
            info!("Pod event feed closed");
        })
    }
}
