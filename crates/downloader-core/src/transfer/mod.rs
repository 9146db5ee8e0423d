use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{CoreError, CoreErrorKind, Task, TaskHeaders, TaskId, TransferSessionId};

pub type TransferResult<T> = Result<T, CoreError>;

pub type TransferEventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Everything the native layer needs to start or resume one transfer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TransferRequest {
    pub task_id: TaskId,
    pub url: String,
    pub saved_dir: String,
    pub filename: Option<String>,
    pub headers: TaskHeaders,
    pub allow_cellular: bool,
    pub save_in_public_storage: bool,
    pub requires_storage_access: bool,
    pub show_notification: bool,
    /// Continue from partially downloaded data instead of starting over.
    pub resume: bool,
}

impl TransferRequest {
    pub fn for_task(task: &Task, resume: bool) -> Self {
        Self {
            task_id: task.id,
            url: task.url.clone(),
            saved_dir: task.saved_dir.clone(),
            filename: task.filename.clone(),
            headers: task.headers.clone(),
            allow_cellular: task.allow_cellular,
            save_in_public_storage: task.save_in_public_storage,
            requires_storage_access: task.requires_storage_access,
            show_notification: task.show_notification,
            resume,
        }
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.url.trim().is_empty() || self.url.contains('\0') {
            return Err(invalid_request(
                self.task_id,
                "transfer url must be non-empty and must not contain NUL bytes",
            ));
        }

        if self.saved_dir.trim().is_empty() {
            return Err(invalid_request(
                self.task_id,
                "transfer destination directory must not be empty",
            ));
        }

        let forbidden = ['\0', '\r', '\n'];
        if self.headers.iter().any(|(name, value)| {
            name.is_empty() || name.contains(forbidden) || value.contains(forbidden)
        }) {
            return Err(invalid_request(
                self.task_id,
                "header names must be non-empty and headers must not contain NUL or line breaks",
            ));
        }

        Ok(())
    }
}

/// Platform transfer primitives. `start` and `resume` hand back the native
/// handle synchronously; everything after that arrives as [`TransferEvent`]s.
pub trait TransferBackend: Send + Sync {
    fn start(&self, request: &TransferRequest) -> TransferResult<TransferSessionId>;

    fn resume(&self, request: &TransferRequest) -> TransferResult<TransferSessionId>;

    fn pause(&self, session: &TransferSessionId) -> TransferResult<()>;

    fn cancel(&self, session: &TransferSessionId) -> TransferResult<()>;
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    Progress {
        session: TransferSessionId,
        percent: u8,
    },
    Complete {
        session: TransferSessionId,
    },
    Failed {
        session: TransferSessionId,
        reason: String,
        #[serde(default)]
        resumable: bool,
    },
    Paused {
        session: TransferSessionId,
        resumable: bool,
    },
    Canceled {
        session: TransferSessionId,
    },
    Metadata {
        session: TransferSessionId,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        mime_type: Option<String>,
    },
}

impl TransferEvent {
    pub fn session(&self) -> &TransferSessionId {
        match self {
            Self::Progress { session, .. }
            | Self::Complete { session }
            | Self::Failed { session, .. }
            | Self::Paused { session, .. }
            | Self::Canceled { session }
            | Self::Metadata { session, .. } => session,
        }
    }
}

/// Thread-safe entry point for native callbacks. Events are queued and
/// applied in arrival order by the scheduler's event loop.
#[derive(Clone, Debug)]
pub struct TransferEventSink {
    sender: mpsc::UnboundedSender<TransferEvent>,
}

impl TransferEventSink {
    pub fn channel() -> (Self, TransferEventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Returns false once the event loop has shut down.
    pub fn report(&self, event: TransferEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    session = %error.0.session(),
                    "dropped transfer event after event loop shutdown"
                );
                false
            }
        }
    }
}

pub fn transfer_error(task_id: TaskId, message: impl Into<String>) -> CoreError {
    transfer_error_for(Some(task_id), message)
}

/// Control commands only know the session; the scheduler attributes those
/// errors to the task it acted on.
pub fn transfer_error_for(task_id: Option<TaskId>, message: impl Into<String>) -> CoreError {
    let error = CoreError::new(CoreErrorKind::TransferError, message);
    match task_id {
        Some(task_id) => error.attributed_to(task_id),
        None => error,
    }
}

fn invalid_request(task_id: TaskId, message: &str) -> CoreError {
    CoreError::for_task(CoreErrorKind::InvalidInput, task_id, message)
}

#[cfg(test)]
mod tests {
    use super::{TransferEvent, TransferEventSink, TransferRequest};
    use crate::models::{TaskHeaders, TaskId, TransferSessionId};

    fn request() -> TransferRequest {
        TransferRequest {
            task_id: TaskId(1),
            url: "https://example.com/file.zip".to_string(),
            saved_dir: "/tmp/downloads".to_string(),
            filename: None,
            headers: TaskHeaders::new(),
            allow_cellular: true,
            save_in_public_storage: false,
            requires_storage_access: false,
            show_notification: false,
            resume: false,
        }
    }

    #[test]
    fn validate_rejects_header_injection() {
        let mut injected = request();
        injected
            .headers
            .insert("X-Token".to_string(), "a\r\nHost: evil".to_string());
        assert!(request().validate().is_ok());
        assert!(injected.validate().is_err());
    }

    #[test]
    fn events_parse_from_tagged_json() {
        let event: TransferEvent = serde_json::from_str(
            r#"{"type":"failed","session":"native-4","reason":"HTTP 503"}"#,
        )
        .expect("event parses");
        assert_eq!(
            event,
            TransferEvent::Failed {
                session: TransferSessionId::new("native-4"),
                reason: "HTTP 503".to_string(),
                resumable: false,
            }
        );
        assert_eq!(event.session().as_str(), "native-4");
    }

    #[tokio::test]
    async fn sink_reports_until_receiver_drops() {
        let (sink, mut receiver) = TransferEventSink::channel();
        let event = TransferEvent::Complete {
            session: TransferSessionId::new("s-1"),
        };
        assert!(sink.report(event.clone()));
        assert_eq!(receiver.recv().await, Some(event.clone()));

        drop(receiver);
        assert!(!sink.report(event));
    }
}
