//! Run states and parameter directions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// State of a task run.
///
/// `CREATED → PROVISIONED → QUEUING → QUEUED → RUNNING → {FINISHED | FAILED}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Run created, inputs not (all) provisioned yet.
    #[default]
    Created,
    /// Every required input has a value.
    Provisioned,
    /// Handed to the scheduler, no pod observed yet.
    Queuing,
    /// Pod exists on the cluster but is not running.
    Queued,
    /// Pod is executing the task.
    Running,
    /// Outputs were posted and reconciled.
    Finished,
    /// Run failed.
    Failed,
}

impl RunState {
    /// All states, in lifecycle order.
    pub const ALL: [RunState; 7] = [
        Self::Created,
        Self::Provisioned,
        Self::Queuing,
        Self::Queued,
        Self::Running,
        Self::Finished,
        Self::Failed,
    ];

    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns true while the cluster orchestrator owns the run.
    pub fn is_scheduler_managed(&self) -> bool {
        matches!(self, Self::Queuing | Self::Queued | Self::Running)
    }

    /// Returns true if inputs may still be provisioned.
    pub fn accepts_provisioning(&self) -> bool {
        matches!(self, Self::Created | Self::Provisioned)
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Provisioned => "PROVISIONED",
            Self::Queuing => "QUEUING",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State a caller may explicitly request for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredState {
    Provisioned,
    Running,
}

impl FromStr for DesiredState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROVISIONED" => Ok(Self::Provisioned),
            "RUNNING" => Ok(Self::Running),
            other => Err(CoreError::UnknownState(other.to_string())),
        }
    }
}

/// Whether a parameter is consumed or produced by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterDirection {
    Input,
    Output,
}

impl ParameterDirection {
    /// Storage id holding parameters of this direction for a run.
    pub fn storage_id(&self, run_id: &crate::RunId) -> String {
        match self {
            Self::Input => run_id.inputs_storage_id(),
            Self::Output => run_id.outputs_storage_id(),
        }
    }
}
