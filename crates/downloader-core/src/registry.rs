use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{Task, TaskId, TaskStatus, TransferSessionId};

/// In-memory mirror of persisted tasks, indexed by id and by native
/// session. Cloning yields another handle to the same entries.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    tasks: HashMap<TaskId, Task>,
    sessions: HashMap<TransferSessionId, TaskId>,
}

impl RegistryState {
    fn unindex(&mut self, task: &Task) {
        if let Some(session) = &task.native_session_id
            && self.sessions.get(session) == Some(&task.id)
        {
            self.sessions.remove(session);
        }
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last writer wins.
    pub fn upsert(&self, task: Task) {
        let mut state = self.write();
        if let Some(previous) = state.tasks.remove(&task.id) {
            state.unindex(&previous);
        }
        if let Some(session) = &task.native_session_id {
            state.sessions.insert(session.clone(), task.id);
        }
        state.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.read().tasks.get(&id).cloned()
    }

    /// Snapshot of all entries ordered by id.
    pub fn get_all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read().tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let mut state = self.write();
        let removed = state.tasks.remove(&id)?;
        state.unindex(&removed);
        Some(removed)
    }

    pub fn find_by_session(&self, session: &TransferSessionId) -> Option<Task> {
        let state = self.read();
        let id = state.sessions.get(session)?;
        state.tasks.get(id).cloned()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.read()
            .tasks
            .values()
            .filter(|task| task.status == status)
            .count()
    }

    /// Replaces every entry with `tasks`.
    pub fn hydrate(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut state = self.write();
        state.tasks.clear();
        state.sessions.clear();
        for task in tasks {
            if let Some(session) = &task.native_session_id {
                state.sessions.insert(session.clone(), task.id);
            }
            state.tasks.insert(task.id, task);
        }
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().tasks.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
