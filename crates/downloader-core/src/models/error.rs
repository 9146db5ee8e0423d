use serde::Serialize;
use thiserror::Error;

use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreErrorKind {
    StorageUnavailable,
    QueryError,
    DuplicateId,
    TransferError,
    Interrupted,
    InvalidInput,
    NotFound,
    Internal,
}

/// Structured failure shared by every layer and serialized as-is across the
/// host boundary.
#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: CoreErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            task: None,
            message: message.into(),
        }
    }

    pub fn for_task(kind: CoreErrorKind, task: TaskId, message: impl Into<String>) -> Self {
        Self {
            kind,
            task: Some(task),
            message: message.into(),
        }
    }

    /// Attaches `task` unless the error already names one.
    pub fn attributed_to(self, task: TaskId) -> Self {
        Self {
            task: self.task.or(Some(task)),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, CoreErrorKind};
    use crate::models::TaskId;

    #[test]
    fn display_includes_kind_and_message() {
        let error = CoreError::new(CoreErrorKind::QueryError, "near \"SELEC\": syntax error");
        assert_eq!(error.to_string(), "QueryError: near \"SELEC\": syntax error");
    }

    #[test]
    fn attribution_keeps_existing_task() {
        let error = CoreError::for_task(CoreErrorKind::NotFound, TaskId(4), "missing");
        assert_eq!(error.attributed_to(TaskId(9)).task, Some(TaskId(4)));

        let error = CoreError::new(CoreErrorKind::TransferError, "refused");
        assert_eq!(error.attributed_to(TaskId(9)).task, Some(TaskId(9)));
    }

    #[test]
    fn serializes_as_kind_and_message_object() {
        let error = CoreError::new(CoreErrorKind::DuplicateId, "task id 3 already exists");
        let json = serde_json::to_value(&error).expect("error serializes");
        assert_eq!(
            json,
            serde_json::json!({"kind": "duplicate_id", "message": "task id 3 already exists"})
        );
    }
}
