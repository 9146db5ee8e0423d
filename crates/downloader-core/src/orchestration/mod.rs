pub mod scheduler;

pub use scheduler::TransferScheduler;

use serde::Serialize;

use crate::models::{CoreError, CoreErrorKind, Task, TaskId, TaskStatus};

pub type OrchestrationResult<T> = Result<T, CoreError>;

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;
pub const DEFAULT_PROGRESS_STEP: u8 = 10;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchedulerOptions {
    pub concurrency_limit: usize,
    /// Minimum percent increase that is persisted and reported. Reaching
    /// 100 is always reported.
    pub progress_step: u8,
    pub event_buffer: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            progress_step: DEFAULT_PROGRESS_STEP,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SchedulerOptions {
    pub fn validate(&self) -> OrchestrationResult<()> {
        validate_concurrency_limit(self.concurrency_limit)?;
        validate_progress_step(self.progress_step)
    }
}

pub(crate) fn validate_concurrency_limit(limit: usize) -> OrchestrationResult<()> {
    if limit == 0 {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "concurrency limit must be at least 1",
        ));
    }
    Ok(())
}

pub(crate) fn validate_progress_step(step: u8) -> OrchestrationResult<()> {
    if step > 100 {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("progress step {step} exceeds 100"),
        ));
    }
    Ok(())
}

/// Result of one admission attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Started(TaskId),
    /// The native layer refused to start the task; it is now FAILED.
    StartFailed(TaskId),
    NoCapacity,
    NoEligibleTask,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// Forwarded to the native layer; the status changes when it acknowledges.
    Issued,
    Applied,
    NotApplicable { status: TaskStatus },
    /// No free slot; nothing changed.
    Throttled,
    /// The native layer refused. A paused task stays PAUSED and is no longer
    /// resumable; a failed one stays FAILED with `reason`.
    Failed { reason: String },
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub hydrated: usize,
    pub interrupted: Vec<TaskId>,
    pub repaired: Vec<TaskId>,
    pub admitted: Vec<TaskId>,
    pub start_failed: Vec<TaskId>,
}

/// Host-facing notification, keyed by task id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TaskEvent {
    ProgressUpdate {
        task_id: TaskId,
        status: TaskStatus,
        progress: u8,
    },
    StatusUpdate {
        task_id: TaskId,
        status: TaskStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
    },
}

impl TaskEvent {
    pub fn progress(task: &Task) -> Self {
        Self::ProgressUpdate {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
        }
    }

    pub fn status(task: &Task) -> Self {
        Self::StatusUpdate {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            failure_reason: task.failure_reason.clone(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::ProgressUpdate { task_id, .. } | Self::StatusUpdate { task_id, .. } => *task_id,
        }
    }
}
