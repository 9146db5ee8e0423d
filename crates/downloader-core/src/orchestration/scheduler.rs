use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::models::{
    CoreError, CoreErrorKind, INTERRUPTED_REASON, NewTask, Task, TaskFilter, TaskId, TaskPatch,
    TaskQuery, TaskStatus, TransferSessionId,
};
use crate::orchestration::{
    Admission, ControlOutcome, OrchestrationResult, ReconcileReport, SchedulerOptions, TaskEvent,
    validate_concurrency_limit, validate_progress_step,
};
use crate::persistence::{PersistenceResult, TaskStore};
use crate::registry::TaskRegistry;
use crate::transfer::{TransferBackend, TransferEvent, TransferEventReceiver, TransferRequest};

/// Admits queued tasks into a bounded pool of native transfers and applies
/// their lifecycle events.
///
/// Every mutation runs under one writer lock and writes through to the task
/// store before the registry. Call [`reconcile`](Self::reconcile) once at
/// startup, before any other mutation, so the registry reflects persisted
/// state.
pub struct TransferScheduler {
    store: Arc<dyn TaskStore>,
    registry: TaskRegistry,
    backend: Arc<dyn TransferBackend>,
    events: broadcast::Sender<TaskEvent>,
    writer: Mutex<WriterState>,
}

#[derive(Debug)]
struct WriterState {
    concurrency_limit: usize,
    progress_step: u8,
}

impl TransferScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
        backend: Arc<dyn TransferBackend>,
        options: SchedulerOptions,
    ) -> OrchestrationResult<Self> {
        options.validate()?;
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        Ok(Self {
            store,
            registry,
            backend,
            events,
            writer: Mutex::new(WriterState {
                concurrency_limit: options.concurrency_limit,
                progress_step: options.progress_step,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.registry.get_all()
    }

    pub fn running_count(&self) -> usize {
        self.registry.count_by_status(TaskStatus::Running)
    }

    pub async fn concurrency_limit(&self) -> usize {
        self.writer.lock().await.concurrency_limit
    }

    pub async fn load_tasks(&self, filter: TaskFilter) -> OrchestrationResult<Vec<Task>> {
        self.with_store("find_all", move |store| store.find_all(&filter))
            .await
    }

    pub async fn load_tasks_with_query(&self, query: TaskQuery) -> OrchestrationResult<Vec<Task>> {
        self.with_store("find_with_query", move |store| store.find_with_query(&query))
            .await
    }

    pub async fn enqueue(&self, task: NewTask) -> OrchestrationResult<Task> {
        validate_new_task(&task)?;
        let state = self.writer.lock().await;

        let inserted = self
            .with_store("insert", move |store| {
                let id = store.insert(&task)?;
                store.find_by_id(id)
            })
            .await?;
        let Some(task) = inserted else {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                "inserted task could not be read back",
            ));
        };

        self.registry.upsert(task.clone());
        tracing::info!(task_id = task.id.0, url = %task.url, "enqueued download task");
        self.emit(TaskEvent::status(&task));
        self.readmit(&state).await;

        Ok(self.registry.get(task.id).unwrap_or(task))
    }

    pub async fn admit_next(&self) -> OrchestrationResult<Admission> {
        let state = self.writer.lock().await;
        self.admit_next_locked(&state).await
    }

    pub async fn admit_until_saturated(&self) -> OrchestrationResult<Vec<Admission>> {
        let state = self.writer.lock().await;
        self.admit_until_saturated_locked(&state).await
    }

    /// Applies a progress report. Stale, regressing and sub-step reports are
    /// dropped; returns whether the report was recorded.
    pub async fn on_progress(
        &self,
        session: &TransferSessionId,
        percent: u8,
    ) -> OrchestrationResult<bool> {
        let state = self.writer.lock().await;
        let Some(task) = self.running_task_for(session, "progress") else {
            return Ok(false);
        };

        let percent = percent.min(100);
        if percent <= task.progress {
            return Ok(false);
        }
        if percent < 100 && percent - task.progress < state.progress_step {
            return Ok(false);
        }

        let task = self
            .commit(task, TaskPatch::default().with_progress(percent))
            .await?;
        self.emit(TaskEvent::progress(&task));
        Ok(true)
    }

    pub async fn on_complete(&self, session: &TransferSessionId) -> OrchestrationResult<bool> {
        let patch = TaskPatch::status(TaskStatus::Complete)
            .with_progress(100)
            .with_failure_reason(None);
        self.settle(session, "complete", patch).await
    }

    pub async fn on_failure(
        &self,
        session: &TransferSessionId,
        reason: impl Into<String>,
        resumable: bool,
    ) -> OrchestrationResult<bool> {
        let patch = TaskPatch::status(TaskStatus::Failed)
            .with_resumable(resumable)
            .with_failure_reason(Some(reason.into()));
        self.settle(session, "failure", patch).await
    }

    /// Native acknowledgment of a pause request.
    pub async fn on_paused(
        &self,
        session: &TransferSessionId,
        resumable: bool,
    ) -> OrchestrationResult<bool> {
        let patch = TaskPatch::status(TaskStatus::Paused).with_resumable(resumable);
        self.settle(session, "paused", patch).await
    }

    /// Native acknowledgment of a cancel request.
    pub async fn on_canceled(&self, session: &TransferSessionId) -> OrchestrationResult<bool> {
        let patch = TaskPatch::status(TaskStatus::Canceled).with_resumable(false);
        self.settle(session, "canceled", patch).await
    }

    /// Records a server-suggested filename (only when none was given) and the
    /// mime type.
    pub async fn on_metadata(
        &self,
        session: &TransferSessionId,
        filename: Option<String>,
        mime_type: Option<String>,
    ) -> OrchestrationResult<bool> {
        let _state = self.writer.lock().await;
        let Some(task) = self.running_task_for(session, "metadata") else {
            return Ok(false);
        };

        let patch = TaskPatch {
            filename: filename.filter(|_| task.filename.is_none()),
            mime_type,
            ..TaskPatch::default()
        };
        if patch.is_empty() {
            return Ok(false);
        }
        self.commit(task, patch).await?;
        Ok(true)
    }

    pub async fn apply_transfer_event(&self, event: TransferEvent) -> OrchestrationResult<bool> {
        match event {
            TransferEvent::Progress { session, percent } => {
                self.on_progress(&session, percent).await
            }
            TransferEvent::Complete { session } => self.on_complete(&session).await,
            TransferEvent::Failed {
                session,
                reason,
                resumable,
            } => self.on_failure(&session, reason, resumable).await,
            TransferEvent::Paused { session, resumable } => {
                self.on_paused(&session, resumable).await
            }
            TransferEvent::Canceled { session } => self.on_canceled(&session).await,
            TransferEvent::Metadata {
                session,
                filename,
                mime_type,
            } => self.on_metadata(&session, filename, mime_type).await,
        }
    }

    /// Drains native callbacks in arrival order until every sink is dropped.
    pub fn spawn_event_loop(self: &Arc<Self>, mut receiver: TransferEventReceiver) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let session = event.session().clone();
                if let Err(error) = scheduler.apply_transfer_event(event).await {
                    tracing::error!(
                        session = %session,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to apply transfer event"
                    );
                }
            }
            tracing::debug!("transfer event loop stopped");
        })
    }

    pub async fn pause(&self, id: TaskId) -> OrchestrationResult<ControlOutcome> {
        let _state = self.writer.lock().await;
        let task = self.require_task(id).await?;

        match (task.status, &task.native_session_id) {
            (TaskStatus::Running, Some(session)) => {
                self.backend
                    .pause(session)
                    .map_err(|error| error.attributed_to(id))?;
                tracing::info!(task_id = id.0, session = %session, "issued pause");
                Ok(ControlOutcome::Issued)
            }
            (status, _) => Ok(ControlOutcome::NotApplicable { status }),
        }
    }

    pub async fn resume(&self, id: TaskId) -> OrchestrationResult<ControlOutcome> {
        let state = self.writer.lock().await;
        let task = self.require_task(id).await?;

        if task.status != TaskStatus::Paused {
            return Ok(ControlOutcome::NotApplicable {
                status: task.status,
            });
        }
        if self.running_count() >= state.concurrency_limit {
            tracing::debug!(task_id = id.0, "resume throttled by concurrency limit");
            return Ok(ControlOutcome::Throttled);
        }
        self.restart_locked(task).await
    }

    pub async fn cancel(&self, id: TaskId) -> OrchestrationResult<ControlOutcome> {
        let _state = self.writer.lock().await;
        let task = self.require_task(id).await?;
        self.cancel_locked(task).await
    }

    /// Cancels every ENQUEUED, PAUSED and RUNNING task. Returns how many were
    /// canceled or had a cancel issued.
    pub async fn cancel_all(&self) -> OrchestrationResult<usize> {
        let _state = self.writer.lock().await;
        let filter = TaskFilter {
            statuses: TaskStatus::ALL
                .into_iter()
                .filter(|status| status.is_cancellable())
                .collect(),
            ..TaskFilter::default()
        };
        let tasks = self
            .with_store("find_all", move |store| store.find_all(&filter))
            .await?;

        let mut affected = 0;
        for task in tasks {
            let id = task.id;
            match self.cancel_locked(task).await {
                Ok(ControlOutcome::Issued | ControlOutcome::Applied) => affected += 1,
                Ok(_) => {}
                Err(error) => tracing::warn!(
                    task_id = id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "cancel-all skipped task"
                ),
            }
        }
        Ok(affected)
    }

    pub async fn retry(&self, id: TaskId) -> OrchestrationResult<ControlOutcome> {
        let state = self.writer.lock().await;
        let task = self.require_task(id).await?;

        match task.status {
            TaskStatus::Failed
                if task.resumable && self.running_count() < state.concurrency_limit =>
            {
                self.restart_locked(task).await
            }
            TaskStatus::Failed => {
                let mut patch =
                    TaskPatch::status(TaskStatus::Enqueued).with_failure_reason(None);
                if !task.resumable {
                    patch = patch.with_progress(0);
                }
                self.requeue_locked(&state, task, patch).await
            }
            TaskStatus::Canceled => {
                let patch = TaskPatch::status(TaskStatus::Enqueued)
                    .with_progress(0)
                    .with_resumable(false)
                    .with_failure_reason(None);
                self.requeue_locked(&state, task, patch).await
            }
            status => Ok(ControlOutcome::NotApplicable { status }),
        }
    }

    /// Deletes the task row, cancelling a running transfer first. With
    /// `delete_content` the downloaded file is removed as well. Returns
    /// whether a task was removed.
    pub async fn remove(&self, id: TaskId, delete_content: bool) -> OrchestrationResult<bool> {
        let state = self.writer.lock().await;
        let Some(task) = self.load_locked(id).await? else {
            return Ok(false);
        };

        if task.status == TaskStatus::Running
            && let Some(session) = &task.native_session_id
            && let Err(error) = self.backend.cancel(session)
        {
            tracing::warn!(
                task_id = id.0,
                session = %session,
                message = %error.message,
                "failed to cancel transfer of removed task"
            );
        }

        let deleted = self
            .with_store("delete", move |store| store.delete(id))
            .await
            .map_err(|error| error.attributed_to(id))?;
        self.registry.remove(id);
        if deleted == 0 {
            return Ok(false);
        }

        if delete_content {
            delete_downloaded_file(&task).await;
        }
        tracing::info!(task_id = id.0, delete_content, "removed download task");

        if task.status == TaskStatus::Running {
            self.readmit(&state).await;
        }
        Ok(true)
    }

    /// Never preempts running transfers; raising the limit admits at once.
    pub async fn set_concurrency_limit(&self, limit: usize) -> OrchestrationResult<Vec<Admission>> {
        validate_concurrency_limit(limit)?;
        let mut state = self.writer.lock().await;
        state.concurrency_limit = limit;
        tracing::info!(limit, "concurrency limit changed");
        self.admit_until_saturated_locked(&state).await
    }

    pub async fn set_progress_step(&self, step: u8) -> OrchestrationResult<()> {
        validate_progress_step(step)?;
        self.writer.lock().await.progress_step = step;
        Ok(())
    }

    /// Startup repair: hydrates the registry, fails transfers that were
    /// RUNNING when the previous process died, clears stray session handles
    /// and refills free slots.
    pub async fn reconcile(&self) -> OrchestrationResult<ReconcileReport> {
        let state = self.writer.lock().await;
        let tasks = self
            .with_store("find_all", |store| store.find_all(&TaskFilter::default()))
            .await?;

        let mut report = ReconcileReport {
            hydrated: tasks.len(),
            ..ReconcileReport::default()
        };
        self.registry.hydrate(tasks.clone());

        for task in tasks {
            let id = task.id;
            if task.status == TaskStatus::Running {
                let patch = TaskPatch::status(TaskStatus::Failed)
                    .with_session(None)
                    .with_failure_reason(Some(INTERRUPTED_REASON.to_string()));
                let task = self.commit(task, patch).await?;
                tracing::warn!(task_id = id.0, "marked interrupted transfer as failed");
                self.emit(TaskEvent::status(&task));
                report.interrupted.push(id);
            } else if task.native_session_id.is_some() {
                self.commit(task, TaskPatch::default().with_session(None))
                    .await?;
                report.repaired.push(id);
            }
        }

        for admission in self.admit_until_saturated_locked(&state).await? {
            match admission {
                Admission::Started(id) => report.admitted.push(id),
                Admission::StartFailed(id) => report.start_failed.push(id),
                Admission::NoCapacity | Admission::NoEligibleTask => {}
            }
        }

        tracing::info!(
            hydrated = report.hydrated,
            interrupted = report.interrupted.len(),
            repaired = report.repaired.len(),
            admitted = report.admitted.len(),
            "reconciled persisted task state"
        );
        Ok(report)
    }

    /// Waits until the task satisfies `predicate` or `wait` elapses.
    pub async fn wait_for(
        &self,
        id: TaskId,
        predicate: impl Fn(&Task) -> bool,
        wait: Duration,
    ) -> Option<Task> {
        let mut receiver = self.subscribe();
        if let Some(task) = self.registry.get(id)
            && predicate(&task)
        {
            return Some(task);
        }

        let matched = tokio::time::timeout(wait, async {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.task_id() != id => {}
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(task) = self.registry.get(id)
                            && predicate(&task)
                        {
                            return Some(task);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;
        matched.ok().flatten()
    }

    async fn admit_next_locked(&self, state: &WriterState) -> OrchestrationResult<Admission> {
        if self.running_count() >= state.concurrency_limit {
            return Ok(Admission::NoCapacity);
        }

        let candidates = self
            .with_store("find_all", |store| {
                store.find_all(&TaskFilter::with_status(TaskStatus::Enqueued).limit(1))
            })
            .await?;
        let Some(task) = candidates.into_iter().next() else {
            return Ok(Admission::NoEligibleTask);
        };

        let id = task.id;
        let request = TransferRequest::for_task(&task, task.resumable);
        let started = request.validate().and_then(|()| {
            if request.resume {
                self.backend.resume(&request)
            } else {
                self.backend.start(&request)
            }
        });

        match started {
            Ok(session) => {
                let patch = TaskPatch::status(TaskStatus::Running)
                    .with_session(Some(session.clone()))
                    .with_failure_reason(None);
                match self.commit(task, patch).await {
                    Ok(task) => {
                        tracing::info!(
                            task_id = id.0,
                            session = %session,
                            resume = request.resume,
                            "admitted download task"
                        );
                        self.emit(TaskEvent::status(&task));
                        Ok(Admission::Started(id))
                    }
                    Err(error) => {
                        if let Err(cancel_error) = self.backend.cancel(&session) {
                            tracing::warn!(
                                task_id = id.0,
                                session = %session,
                                message = %cancel_error.message,
                                "failed to cancel transfer after persistence failure"
                            );
                        }
                        Err(error)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(
                    task_id = id.0,
                    kind = ?error.kind,
                    message = %error.message,
                    "transfer failed to start"
                );
                let patch = TaskPatch::status(TaskStatus::Failed)
                    .with_session(None)
                    .with_failure_reason(Some(error.message));
                let task = self.commit(task, patch).await?;
                self.emit(TaskEvent::status(&task));
                Ok(Admission::StartFailed(id))
            }
        }
    }

    async fn admit_until_saturated_locked(
        &self,
        state: &WriterState,
    ) -> OrchestrationResult<Vec<Admission>> {
        let mut admissions = Vec::new();
        loop {
            match self.admit_next_locked(state).await? {
                admission @ (Admission::Started(_) | Admission::StartFailed(_)) => {
                    admissions.push(admission)
                }
                Admission::NoCapacity | Admission::NoEligibleTask => return Ok(admissions),
            }
        }
    }

    /// Admission after a slot may have freed up. Failures stay with the
    /// triggering operation's log, not its result.
    async fn readmit(&self, state: &WriterState) {
        if let Err(error) = self.admit_until_saturated_locked(state).await {
            tracing::error!(
                kind = ?error.kind,
                message = %error.message,
                "failed to admit queued tasks"
            );
        }
    }

    async fn settle(
        &self,
        session: &TransferSessionId,
        event: &'static str,
        patch: TaskPatch,
    ) -> OrchestrationResult<bool> {
        let state = self.writer.lock().await;
        let Some(task) = self.running_task_for(session, event) else {
            return Ok(false);
        };

        let task = self.commit(task, patch.with_session(None)).await?;
        tracing::info!(
            task_id = task.id.0,
            status = %task.status,
            reason = task.failure_reason.as_deref().unwrap_or(""),
            "transfer settled"
        );
        self.emit(TaskEvent::status(&task));
        self.readmit(&state).await;
        Ok(true)
    }

    /// Restarts a PAUSED or resumable FAILED task, from partial data when the
    /// task is resumable and from scratch otherwise. A refused PAUSED task
    /// stays PAUSED and loses its resumable flag; a refused FAILED task
    /// stays FAILED with the new reason.
    async fn restart_locked(&self, task: Task) -> OrchestrationResult<ControlOutcome> {
        let id = task.id;
        let request = TransferRequest::for_task(&task, task.resumable);
        let restarted = request.validate().and_then(|()| {
            if request.resume {
                self.backend.resume(&request)
            } else {
                self.backend.start(&request)
            }
        });

        match restarted {
            Ok(session) => {
                let mut patch = TaskPatch::status(TaskStatus::Running)
                    .with_session(Some(session.clone()))
                    .with_failure_reason(None);
                if !request.resume {
                    patch = patch.with_progress(0);
                }
                let task = self.commit(task, patch).await?;
                tracing::info!(
                    task_id = id.0,
                    session = %session,
                    resume = request.resume,
                    "restarted transfer"
                );
                self.emit(TaskEvent::status(&task));
                Ok(ControlOutcome::Applied)
            }
            Err(error) => {
                tracing::warn!(
                    task_id = id.0,
                    status = %task.status,
                    message = %error.message,
                    "transfer failed to restart"
                );
                if task.status == TaskStatus::Paused {
                    self.commit(task, TaskPatch::default().with_resumable(false))
                        .await?;
                } else {
                    let patch = TaskPatch::status(TaskStatus::Failed)
                        .with_session(None)
                        .with_failure_reason(Some(error.message.clone()));
                    let task = self.commit(task, patch).await?;
                    self.emit(TaskEvent::status(&task));
                }
                Ok(ControlOutcome::Failed {
                    reason: error.message,
                })
            }
        }
    }

    async fn requeue_locked(
        &self,
        state: &WriterState,
        task: Task,
        patch: TaskPatch,
    ) -> OrchestrationResult<ControlOutcome> {
        let task = self.commit(task, patch).await?;
        tracing::info!(task_id = task.id.0, "requeued download task");
        self.emit(TaskEvent::status(&task));
        self.readmit(state).await;
        Ok(ControlOutcome::Applied)
    }

    async fn cancel_locked(&self, task: Task) -> OrchestrationResult<ControlOutcome> {
        let id = task.id;
        match (task.status, task.native_session_id.clone()) {
            (TaskStatus::Running, Some(session)) => {
                self.backend
                    .cancel(&session)
                    .map_err(|error| error.attributed_to(id))?;
                tracing::info!(task_id = id.0, session = %session, "issued cancel");
                Ok(ControlOutcome::Issued)
            }
            (TaskStatus::Enqueued | TaskStatus::Paused, _) => {
                let patch = TaskPatch::status(TaskStatus::Canceled)
                    .with_resumable(false)
                    .with_session(None);
                let task = self.commit(task, patch).await?;
                tracing::info!(task_id = id.0, "canceled download task");
                self.emit(TaskEvent::status(&task));
                Ok(ControlOutcome::Applied)
            }
            (status, _) => Ok(ControlOutcome::NotApplicable { status }),
        }
    }

    /// Persists `patch`, then mirrors it into the registry. A vanished row
    /// evicts the registry entry.
    async fn commit(&self, mut task: Task, patch: TaskPatch) -> OrchestrationResult<Task> {
        let id = task.id;
        let (updated, patch) = self
            .with_store("update", move |store| {
                store.update(id, &patch).map(|updated| (updated, patch))
            })
            .await
            .map_err(|error| error.attributed_to(id))?;

        if updated == 0 {
            self.registry.remove(id);
            return Err(CoreError::for_task(
                CoreErrorKind::NotFound,
                id,
                format!("task {id} no longer exists"),
            ));
        }

        patch.apply_to(&mut task);
        self.registry.upsert(task.clone());
        Ok(task)
    }

    async fn load_locked(&self, id: TaskId) -> OrchestrationResult<Option<Task>> {
        if let Some(task) = self.registry.get(id) {
            return Ok(Some(task));
        }
        let found = self
            .with_store("find_by_id", move |store| store.find_by_id(id))
            .await?;
        if let Some(task) = &found {
            self.registry.upsert(task.clone());
        }
        Ok(found)
    }

    async fn require_task(&self, id: TaskId) -> OrchestrationResult<Task> {
        self.load_locked(id).await?.ok_or_else(|| {
            CoreError::for_task(CoreErrorKind::NotFound, id, format!("task {id} not found"))
        })
    }

    fn running_task_for(&self, session: &TransferSessionId, event: &'static str) -> Option<Task> {
        match self.registry.find_by_session(session) {
            Some(task) if task.status == TaskStatus::Running => Some(task),
            Some(task) => {
                tracing::debug!(
                    task_id = task.id.0,
                    status = %task.status,
                    event,
                    "ignored transfer event for task that is not running"
                );
                None
            }
            None => {
                tracing::debug!(session = %session, event, "ignored transfer event for unknown session");
                None
            }
        }
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    async fn with_store<T, F>(&self, operation: &'static str, call: F) -> OrchestrationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TaskStore) -> PersistenceResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|join_error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("task store '{operation}' join failure: {join_error}"),
                )
            })?
    }
}

fn validate_new_task(task: &NewTask) -> OrchestrationResult<()> {
    if task.url.trim().is_empty() || task.url.contains('\0') {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "download url must be non-empty and must not contain NUL bytes",
        ));
    }
    if task.saved_dir.trim().is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "saved_dir must not be empty",
        ));
    }
    if task
        .filename
        .as_deref()
        .is_some_and(|name| name.is_empty() || name.contains(['/', '\\', '\0']))
    {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "filename must be a bare, non-empty file name",
        ));
    }
    Ok(())
}

async fn delete_downloaded_file(task: &Task) {
    let Some(filename) = &task.filename else {
        return;
    };
    let path = PathBuf::from(&task.saved_dir).join(filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!(task_id = task.id.0, path = %path.display(), "deleted downloaded file"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(
            task_id = task.id.0,
            path = %path.display(),
            error = %error,
            "failed to delete downloaded file"
        ),
    }
}
