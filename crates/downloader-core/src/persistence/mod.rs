mod task_repository;

pub use task_repository::SqliteTaskRepository;

use crate::models::{CoreError, NewTask, Task, TaskFilter, TaskId, TaskPatch, TaskQuery};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Typed task access. Implementations are synchronous; async callers go
/// through `spawn_blocking`.
pub trait TaskStore: Send + Sync {
    fn ensure_schema(&self) -> PersistenceResult<()>;

    fn insert(&self, task: &NewTask) -> PersistenceResult<TaskId>;

    fn find_by_id(&self, id: TaskId) -> PersistenceResult<Option<Task>>;

    fn find_all(&self, filter: &TaskFilter) -> PersistenceResult<Vec<Task>>;

    fn find_with_query(&self, query: &TaskQuery) -> PersistenceResult<Vec<Task>>;

    /// Returns the number of rows changed; an unknown id yields 0.
    fn update(&self, id: TaskId, patch: &TaskPatch) -> PersistenceResult<usize>;

    fn delete(&self, id: TaskId) -> PersistenceResult<usize>;
}
