//! Events emitted by the generation orchestrator.
//!
//! These mirror what a UI needs to react to: a task started, made
//! progress, produced a result, or failed. Subscribe through
//! [`GenerationOrchestrator::subscribe_events`](crate::orchestrator::GenerationOrchestrator::subscribe_events).

use mediagen_core::history::HistoryEntry;
use mediagen_core::task::TaskRole;
use mediagen_core::types::TaskId;
use serde::Serialize;

/// Broadcast channel capacity for orchestrator events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The backend accepted a job and its channel is being opened.
    TaskStarted { role: TaskRole, task_id: TaskId },

    TaskProgress {
        role: TaskRole,
        task_id: TaskId,
        /// Completion percentage (0-100).
        percentage: u8,
        /// Display message including any step counter.
        message: String,
    },

    /// The job completed and its record was merged into the result state.
    ResultReady {
        role: TaskRole,
        task_id: TaskId,
        entry: HistoryEntry,
    },

    /// The job failed, its channel dropped, or its record could not be
    /// loaded. Result state is left unchanged.
    TaskFailed {
        role: TaskRole,
        task_id: TaskId,
        /// Human-readable error description.
        error: String,
    },
}

impl OrchestratorEvent {
    pub fn role(&self) -> TaskRole {
        match self {
            OrchestratorEvent::TaskStarted { role, .. }
            | OrchestratorEvent::TaskProgress { role, .. }
            | OrchestratorEvent::ResultReady { role, .. }
            | OrchestratorEvent::TaskFailed { role, .. } => *role,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            OrchestratorEvent::TaskStarted { task_id, .. }
            | OrchestratorEvent::TaskProgress { task_id, .. }
            | OrchestratorEvent::ResultReady { task_id, .. }
            | OrchestratorEvent::TaskFailed { task_id, .. } => task_id,
        }
    }

    /// Result or failure: no further events follow for this task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorEvent::ResultReady { .. } | OrchestratorEvent::TaskFailed { .. }
        )
    }
}
