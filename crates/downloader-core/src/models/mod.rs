mod error;
mod query;
mod task;
mod time;

pub use error::{CoreError, CoreErrorKind};
pub use query::{QueryParam, TaskFilter, TaskOrder, TaskQuery};
pub use task::{
    INTERRUPTED_REASON, NewTask, Task, TaskHeaders, TaskId, TaskPatch, TaskStatus,
    TransferSessionId,
};
pub use time::{from_unix_millis, to_unix_millis, unix_millis};
