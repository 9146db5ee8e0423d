//! JSON method channel between the host application and the scheduler.
//!
//! Calls look like `{"method": "pause", "args": {"task_id": 3}}`. Replies are
//! `{"ok": <value>}` or `{"error": {"kind": ..., "message": ...}}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::models::{CoreError, CoreErrorKind, NewTask, TaskFilter, TaskId, TaskQuery};
use crate::orchestration::{Admission, OrchestrationResult, TaskEvent, TransferScheduler};

const REPLY_FALLBACK: &str =
    r#"{"error":{"kind":"internal","message":"reply serialization failed"}}"#;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "camelCase")]
pub enum HostMethod {
    Enqueue(NewTask),
    LoadTasks(TaskFilter),
    LoadTasksWithRawQuery(TaskQuery),
    Pause {
        task_id: TaskId,
    },
    Resume {
        task_id: TaskId,
    },
    Cancel {
        task_id: TaskId,
    },
    CancelAll,
    Retry {
        task_id: TaskId,
    },
    Remove {
        task_id: TaskId,
        #[serde(default)]
        should_delete_content: bool,
    },
    /// The callback itself lives on the host side; only the progress step
    /// reaches the core.
    RegisterCallback {
        step: u8,
    },
    SetConcurrencyLimit {
        limit: usize,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum MethodReply {
    Ok(Value),
    Error(CoreError),
}

#[derive(Clone)]
pub struct MethodChannel {
    scheduler: Arc<TransferScheduler>,
}

impl MethodChannel {
    pub fn new(scheduler: Arc<TransferScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn handle(&self, method: HostMethod) -> OrchestrationResult<Value> {
        let scheduler = &self.scheduler;
        match method {
            HostMethod::Enqueue(task) => to_value(scheduler.enqueue(task).await?),
            HostMethod::LoadTasks(filter) => to_value(scheduler.load_tasks(filter).await?),
            HostMethod::LoadTasksWithRawQuery(query) => {
                to_value(scheduler.load_tasks_with_query(query).await?)
            }
            HostMethod::Pause { task_id } => to_value(scheduler.pause(task_id).await?),
            HostMethod::Resume { task_id } => to_value(scheduler.resume(task_id).await?),
            HostMethod::Cancel { task_id } => to_value(scheduler.cancel(task_id).await?),
            HostMethod::CancelAll => Ok(json!({ "canceled": scheduler.cancel_all().await? })),
            HostMethod::Retry { task_id } => to_value(scheduler.retry(task_id).await?),
            HostMethod::Remove {
                task_id,
                should_delete_content,
            } => Ok(json!({
                "removed": scheduler.remove(task_id, should_delete_content).await?
            })),
            HostMethod::RegisterCallback { step } => {
                scheduler.set_progress_step(step).await?;
                Ok(Value::Null)
            }
            HostMethod::SetConcurrencyLimit { limit } => {
                let admitted: Vec<TaskId> = scheduler
                    .set_concurrency_limit(limit)
                    .await?
                    .into_iter()
                    .filter_map(|admission| match admission {
                        Admission::Started(id) => Some(id),
                        _ => None,
                    })
                    .collect();
                Ok(json!({ "admitted": admitted }))
            }
        }
    }

    /// Decodes one call, runs it and encodes the reply. Never fails: every
    /// error becomes an `{"error": ...}` reply.
    pub async fn handle_json(&self, raw: &str) -> String {
        let reply = match serde_json::from_str::<HostMethod>(raw) {
            Ok(method) => self.handle(method).await,
            Err(error) => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid method call: {error}"),
            )),
        };
        encode_reply(reply)
    }
}

pub fn encode_reply(reply: OrchestrationResult<Value>) -> String {
    let reply = match reply {
        Ok(value) => MethodReply::Ok(value),
        Err(error) => {
            tracing::warn!(
                kind = ?error.kind,
                task_id = error.task.map(|task| task.0),
                message = %error.message,
                "host method call failed"
            );
            MethodReply::Error(error)
        }
    };
    serde_json::to_string(&reply).unwrap_or_else(|_| REPLY_FALLBACK.to_string())
}

pub fn encode_event(event: &TaskEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

fn to_value<T: Serialize>(value: T) -> OrchestrationResult<Value> {
    serde_json::to_value(value).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to encode reply: {error}"),
        )
    })
}
