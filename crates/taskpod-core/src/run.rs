//! The task run entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, RunState, TaskId};

/// One execution instance of a Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: RunId,

    /// Task this run executes.
    pub task_id: TaskId,

    /// Current state.
    pub state: RunState,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the run record last changed.
    pub updated_at: DateTime<Utc>,

    /// When the state last changed.
    pub last_state_transition_at: DateTime<Utc>,
}

impl Run {
    /// Create a new run in the CREATED state.
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            task_id,
            state: RunState::Created,
            created_at: now,
            updated_at: now,
            last_state_transition_at: now,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: RunId) -> Self {
        self.id = id;
        self
    }

    /// Move to `state`, stamping the transition time.
    pub fn transition(&mut self, state: RunState) {
        let now = Utc::now();
        if self.state != state {
            self.last_state_transition_at = now;
        }
        self.state = state;
        self.updated_at = now;
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Precondition on the current state for a guarded state update.
///
/// A guarded update is evaluated and applied as one read-modify-write by the
/// run repository, so callers never act on a stale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateGuard {
    /// Always apply.
    Any,
    /// Apply unless the run is FINISHED or FAILED.
    NotTerminal,
    /// Apply only from this exact state.
    Exactly(RunState),
    /// Apply only from one of these states.
    OneOf(&'static [RunState]),
}

impl StateGuard {
    /// Returns true if a run in `current` may be updated.
    pub fn allows(&self, current: RunState) -> bool {
        match self {
            Self::Any => true,
            Self::NotTerminal => !current.is_terminal(),
            Self::Exactly(expected) => current == *expected,
            Self::OneOf(states) => states.contains(&current),
        }
    }
}
