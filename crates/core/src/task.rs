//! Client-side view of one server job.

use serde::Serialize;

use crate::types::{TaskId, Timestamp};

/// Independent pipelines that may each have one task in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    /// Primary "Generate" action.
    Generate,
    /// Regenerating fields of an existing result.
    Regenerate,
    /// Standalone media ingestion.
    Upload,
}

impl TaskRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskRole::Generate => "generate",
            TaskRole::Regenerate => "regenerate",
            TaskRole::Upload => "upload",
        }
    }
}

impl std::fmt::Display for TaskRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub role: TaskRole,
    pub status: TaskStatus,
    /// Completion percentage (0-100).
    pub percentage: u8,
    pub message: String,
    pub started_at: Timestamp,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, role: TaskRole) -> Self {
        Self {
            id: id.into(),
            role,
            status: TaskStatus::Pending,
            percentage: 0,
            message: String::new(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn record_progress(&mut self, percentage: Option<f64>, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::InProgress;
        if let Some(p) = percentage {
            self.percentage = clamp_percentage(p);
        }
        self.message = message.into();
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.percentage = 100;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.percentage = 0;
        self.message = message.into();
    }
}

/// Round and clamp an arbitrary percentage into `0..=100`.
pub fn clamp_percentage(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_moves_to_in_progress() {
        let mut task = Task::new("t1", TaskRole::Generate);
        assert_eq!(task.status, TaskStatus::Pending);
        task.record_progress(Some(41.6), "Sampling");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.percentage, 42);
    }

    #[test]
    fn missing_percentage_keeps_previous_value() {
        let mut task = Task::new("t1", TaskRole::Generate);
        task.record_progress(Some(30.0), "a");
        task.record_progress(None, "b");
        assert_eq!(task.percentage, 30);
        assert_eq!(task.message, "b");
    }

    #[test]
    fn terminal_task_ignores_progress() {
        let mut task = Task::new("t1", TaskRole::Regenerate);
        task.complete();
        task.record_progress(Some(10.0), "late");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.percentage, 100);
    }

    #[test]
    fn percentages_are_clamped() {
        assert_eq!(clamp_percentage(-5.0), 0);
        assert_eq!(clamp_percentage(140.0), 100);
        assert_eq!(clamp_percentage(f64::NAN), 0);
    }
}
