use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::unix_millis;

/// Failure reason recorded when a transfer was RUNNING at process death.
pub const INTERRUPTED_REASON: &str = "INTERRUPTED";

pub type TaskHeaders = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle the native transfer layer returns for a started transfer.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferSessionId(String);

impl TransferSessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransferSessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Enqueued,
    Running,
    Complete,
    Failed,
    Canceled,
    Paused,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Enqueued,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Canceled,
        TaskStatus::Paused,
    ];

    /// Persisted integer code. Zero is reserved for "undefined" and never
    /// produced.
    pub const fn code(self) -> i64 {
        match self {
            Self::Enqueued => 1,
            Self::Running => 2,
            Self::Complete => 3,
            Self::Failed => 4,
            Self::Canceled => 5,
            Self::Paused => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Paused => "PAUSED",
        }
    }

    /// Statuses a cancel-all sweep acts on.
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Enqueued | Self::Running | Self::Paused)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown task status '{value}'"))
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    pub url: String,
    pub saved_dir: String,
    pub filename: Option<String>,
    pub headers: TaskHeaders,
    pub status: TaskStatus,
    pub progress: u8,
    pub resumable: bool,
    #[serde(with = "unix_millis")]
    pub time_created: SystemTime,
    pub allow_cellular: bool,
    pub save_in_public_storage: bool,
    pub requires_storage_access: bool,
    pub show_notification: bool,
    pub open_file_from_notification: bool,
    pub mime_type: Option<String>,
    pub native_session_id: Option<TransferSessionId>,
    pub failure_reason: Option<String>,
}

/// A download request as submitted by the host. Everything except the id is
/// fixed for the life of the task.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct NewTask {
    #[serde(default, rename = "task_id")]
    pub id: Option<TaskId>,
    pub url: String,
    pub saved_dir: String,
    #[serde(default, alias = "file_name")]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: TaskHeaders,
    #[serde(default = "default_true")]
    pub allow_cellular: bool,
    #[serde(default)]
    pub save_in_public_storage: bool,
    #[serde(default)]
    pub requires_storage_access: bool,
    #[serde(default)]
    pub show_notification: bool,
    #[serde(default)]
    pub open_file_from_notification: bool,
    #[serde(skip)]
    pub time_created: Option<SystemTime>,
}

fn default_true() -> bool {
    true
}

impl NewTask {
    pub fn new(url: impl Into<String>, saved_dir: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            saved_dir: saved_dir.into(),
            filename: None,
            headers: TaskHeaders::new(),
            allow_cellular: true,
            save_in_public_storage: false,
            requires_storage_access: false,
            show_notification: false,
            open_file_from_notification: false,
            time_created: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Column-level change set applied by the scheduler. `None` leaves a field
/// untouched; the nested options on the nullable columns distinguish "clear"
/// from "leave".
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub resumable: Option<bool>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub native_session_id: Option<Option<TransferSessionId>>,
    pub failure_reason: Option<Option<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_resumable(mut self, resumable: bool) -> Self {
        self.resumable = Some(resumable);
        self
    }

    pub fn with_session(mut self, session: Option<TransferSessionId>) -> Self {
        self.native_session_id = Some(session);
        self
    }

    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = Some(reason);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(resumable) = self.resumable {
            task.resumable = resumable;
        }
        if let Some(filename) = &self.filename {
            task.filename = Some(filename.clone());
        }
        if let Some(mime_type) = &self.mime_type {
            task.mime_type = Some(mime_type.clone());
        }
        if let Some(session) = &self.native_session_id {
            task.native_session_id = session.clone();
        }
        if let Some(reason) = &self.failure_reason {
            task.failure_reason = reason.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn sample_task() -> Task {
        Task {
            id: TaskId(7),
            url: "https://example.com/a.bin".to_string(),
            saved_dir: "/tmp/downloads".to_string(),
            filename: None,
            headers: TaskHeaders::new(),
            status: TaskStatus::Running,
            progress: 40,
            resumable: false,
            time_created: UNIX_EPOCH,
            allow_cellular: true,
            save_in_public_storage: false,
            requires_storage_access: false,
            show_notification: false,
            open_file_from_notification: false,
            mime_type: None,
            native_session_id: Some(TransferSessionId::new("s-7")),
            failure_reason: None,
        }
    }

    #[test]
    fn status_codes_round_trip_and_reject_undefined() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TaskStatus::from_code(0), None);
        assert_eq!(TaskStatus::from_code(7), None);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("paused".parse::<TaskStatus>(), Ok(TaskStatus::Paused));
        assert!("undefined".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn patch_clears_session_and_sets_reason() {
        let mut task = sample_task();
        TaskPatch::status(TaskStatus::Failed)
            .with_session(None)
            .with_failure_reason(Some("timeout".to_string()))
            .apply_to(&mut task);

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.native_session_id, None);
        assert_eq!(task.failure_reason.as_deref(), Some("timeout"));
        assert_eq!(task.progress, 40);
    }

    #[test]
    fn patch_progress_is_clamped() {
        let patch = TaskPatch::default().with_progress(150);
        assert_eq!(patch.progress, Some(100));
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn new_task_defaults_allow_cellular() {
        let parsed: NewTask = serde_json::from_value(serde_json::json!({
            "url": "https://example.com/b.bin",
            "saved_dir": "/tmp",
            "file_name": "b.bin"
        }))
        .expect("new task parses");
        assert!(parsed.allow_cellular);
        assert_eq!(parsed.filename.as_deref(), Some("b.bin"));
        assert_eq!(parsed.id, None);
    }
}
