#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use downloader_core::models::{NewTask, Task, TaskId, TaskStatus, TransferSessionId};
use downloader_core::orchestration::{SchedulerOptions, TransferScheduler};
use downloader_core::persistence::{SqliteTaskRepository, TaskStore};
use downloader_core::registry::TaskRegistry;
use downloader_core::sqlite::SqliteRowStore;
use downloader_core::transfer::{
    TransferBackend, TransferRequest, TransferResult, transfer_error,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    Start(TaskId),
    Resume(TaskId),
    Pause(TransferSessionId),
    Cancel(TransferSessionId),
}

/// Hands out `native-N` sessions and records every call.
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<BackendState>,
}

#[derive(Default)]
struct BackendState {
    next_session: u64,
    calls: Vec<BackendCall>,
    refused_urls: HashSet<String>,
    refuse_resume: bool,
}

impl RecordingBackend {
    pub fn refuse_url(&self, url: &str) {
        self.state
            .lock()
            .expect("backend lock")
            .refused_urls
            .insert(url.to_string());
    }

    pub fn refuse_resume(&self, refuse: bool) {
        self.state.lock().expect("backend lock").refuse_resume = refuse;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().expect("backend lock").calls.clone()
    }

    fn next_session(state: &mut BackendState) -> TransferSessionId {
        state.next_session += 1;
        TransferSessionId::new(format!("native-{}", state.next_session))
    }
}

impl TransferBackend for RecordingBackend {
    fn start(&self, request: &TransferRequest) -> TransferResult<TransferSessionId> {
        let mut state = self.state.lock().expect("backend lock");
        state.calls.push(BackendCall::Start(request.task_id));
        if state.refused_urls.contains(&request.url) {
            return Err(transfer_error(request.task_id, "connection refused"));
        }
        Ok(Self::next_session(&mut state))
    }

    fn resume(&self, request: &TransferRequest) -> TransferResult<TransferSessionId> {
        let mut state = self.state.lock().expect("backend lock");
        state.calls.push(BackendCall::Resume(request.task_id));
        if state.refuse_resume {
            return Err(transfer_error(
                request.task_id,
                "partial download data not found",
            ));
        }
        Ok(Self::next_session(&mut state))
    }

    fn pause(&self, session: &TransferSessionId) -> TransferResult<()> {
        let mut state = self.state.lock().expect("backend lock");
        state.calls.push(BackendCall::Pause(session.clone()));
        Ok(())
    }

    fn cancel(&self, session: &TransferSessionId) -> TransferResult<()> {
        let mut state = self.state.lock().expect("backend lock");
        state.calls.push(BackendCall::Cancel(session.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub scheduler: Arc<TransferScheduler>,
    pub backend: Arc<RecordingBackend>,
    pub repository: Arc<SqliteTaskRepository>,
}

impl Harness {
    pub fn in_memory(concurrency_limit: usize) -> Self {
        let store = SqliteRowStore::open_in_memory().expect("open in-memory store");
        Self::with_repository(
            SqliteTaskRepository::new(Arc::new(store)),
            options(concurrency_limit, 0),
        )
    }

    pub fn on_disk(path: &Path, options: SchedulerOptions) -> Self {
        Self::with_repository(
            SqliteTaskRepository::open(path).expect("open store file"),
            options,
        )
    }

    pub fn with_repository(repository: SqliteTaskRepository, options: SchedulerOptions) -> Self {
        repository.ensure_schema().expect("schema");
        let repository = Arc::new(repository);
        let backend = Arc::new(RecordingBackend::default());
        let scheduler = TransferScheduler::new(
            repository.clone(),
            TaskRegistry::new(),
            backend.clone(),
            options,
        )
        .expect("scheduler options are valid");
        Self {
            scheduler: Arc::new(scheduler),
            backend,
            repository,
        }
    }

    pub async fn enqueue(&self, name: &str) -> Task {
        self.scheduler
            .enqueue(
                NewTask::new(format!("https://example.com/{name}"), "/tmp/downloads")
                    .with_filename(name),
            )
            .await
            .expect("enqueue")
    }

    pub fn status(&self, id: TaskId) -> TaskStatus {
        self.scheduler.task(id).expect("task is registered").status
    }

    pub fn session(&self, id: TaskId) -> TransferSessionId {
        self.scheduler
            .task(id)
            .and_then(|task| task.native_session_id)
            .expect("task has a native session")
    }

    pub fn persisted(&self, id: TaskId) -> Task {
        self.repository
            .find_by_id(id)
            .expect("find")
            .expect("task is persisted")
    }

    /// Registry and store agree, and a session exists exactly for RUNNING
    /// tasks.
    pub fn assert_consistent(&self) {
        for task in self.scheduler.tasks() {
            assert_eq!(task, self.persisted(task.id), "registry diverged from store");
            assert_eq!(
                task.native_session_id.is_some(),
                task.status == TaskStatus::Running,
                "session/status mismatch for task {}",
                task.id
            );
        }
    }
}

pub fn options(concurrency_limit: usize, progress_step: u8) -> SchedulerOptions {
    SchedulerOptions {
        concurrency_limit,
        progress_step,
        ..SchedulerOptions::default()
    }
}

pub fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("downloader-{test_name}-{nanos}.sqlite3"))
}

pub fn remove_db(path: &Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("sqlite3-wal"));
    let _ = std::fs::remove_file(path.with_extension("sqlite3-shm"));
}
