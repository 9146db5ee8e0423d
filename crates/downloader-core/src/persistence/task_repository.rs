use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::models::{
    CoreError, CoreErrorKind, NewTask, QueryParam, Task, TaskFilter, TaskHeaders, TaskId,
    TaskOrder, TaskPatch, TaskQuery, TaskStatus, TransferSessionId, from_unix_millis,
    to_unix_millis,
};
use crate::persistence::{PersistenceResult, TaskStore};
use crate::sqlite::store::bool_to_sqlite;
use crate::sqlite::{SqlRow, SqlValue, SqliteRowStore};

const TASK_COLUMNS: &str = "id, url, status, progress, file_name, saved_dir, headers, \
mime_type, resumable, show_notification, open_file_from_notification, time_created, \
save_in_public_storage, allow_cellular, requires_storage_access, native_session_id, \
failure_reason";

/// Maps `task` rows to [`Task`] records on top of a [`SqliteRowStore`].
pub struct SqliteTaskRepository {
    store: Arc<SqliteRowStore>,
}

impl SqliteTaskRepository {
    pub fn new(store: Arc<SqliteRowStore>) -> Self {
        Self { store }
    }

    pub fn open(database_path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        Ok(Self::new(Arc::new(SqliteRowStore::open(database_path)?)))
    }

    pub fn row_store(&self) -> &Arc<SqliteRowStore> {
        &self.store
    }

    fn select(&self, sql: &str, params: &[SqlValue]) -> PersistenceResult<Vec<Task>> {
        self.store
            .query(sql, params)?
            .iter()
            .map(task_from_row)
            .collect()
    }
}

impl TaskStore for SqliteTaskRepository {
    fn ensure_schema(&self) -> PersistenceResult<()> {
        self.store.migrate_to_latest()
    }

    fn insert(&self, task: &NewTask) -> PersistenceResult<TaskId> {
        let time_created = task.time_created.unwrap_or_else(SystemTime::now);
        let headers = serde_json::to_string(&task.headers).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("task headers are not serializable: {error}"),
            )
        })?;

        let mut columns = vec![
            "url",
            "status",
            "progress",
            "file_name",
            "saved_dir",
            "headers",
            "resumable",
            "show_notification",
            "open_file_from_notification",
            "time_created",
            "save_in_public_storage",
            "allow_cellular",
            "requires_storage_access",
        ];
        let mut values = vec![
            SqlValue::Text(task.url.clone()),
            SqlValue::Integer(TaskStatus::Enqueued.code()),
            SqlValue::Integer(0),
            optional_text(task.filename.as_deref()),
            SqlValue::Text(task.saved_dir.clone()),
            SqlValue::Text(headers),
            SqlValue::Integer(bool_to_sqlite(false)),
            SqlValue::Integer(bool_to_sqlite(task.show_notification)),
            SqlValue::Integer(bool_to_sqlite(task.open_file_from_notification)),
            SqlValue::Integer(millis(time_created)?),
            SqlValue::Integer(bool_to_sqlite(task.save_in_public_storage)),
            SqlValue::Integer(bool_to_sqlite(task.allow_cellular)),
            SqlValue::Integer(bool_to_sqlite(task.requires_storage_access)),
        ];
        if let Some(id) = task.id {
            columns.insert(0, "id");
            values.insert(0, SqlValue::Integer(task_id_to_i64(id)?));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO task ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        let outcome = self.store.execute(&sql, &values).map_err(|error| {
            match (error.kind, task.id) {
                (CoreErrorKind::DuplicateId, Some(id)) => CoreError::for_task(
                    CoreErrorKind::DuplicateId,
                    id,
                    format!("task id {id} already exists"),
                ),
                _ => error,
            }
        })?;
        i64_to_task_id(outcome.last_insert_id)
    }

    fn find_by_id(&self, id: TaskId) -> PersistenceResult<Option<Task>> {
        let tasks = self.select(
            &format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?"),
            &[SqlValue::Integer(task_id_to_i64(id)?)],
        )?;
        Ok(tasks.into_iter().next())
    }

    fn find_all(&self, filter: &TaskFilter) -> PersistenceResult<Vec<Task>> {
        if filter.limit == Some(0) {
            return Ok(Vec::new());
        }
        let (sql, params) = filter_sql(filter)?;
        self.select(&sql, &params)
    }

    fn find_with_query(&self, query: &TaskQuery) -> PersistenceResult<Vec<Task>> {
        let params: Vec<SqlValue> = query.params.iter().map(param_value).collect();
        self.store
            .query_read_only(&query.sql, &params)?
            .iter()
            .map(task_from_row)
            .collect()
    }

    fn update(&self, id: TaskId, patch: &TaskPatch) -> PersistenceResult<usize> {
        let id_value = SqlValue::Integer(task_id_to_i64(id)?);
        let (assignments, mut values) = patch_assignments(patch);

        if assignments.is_empty() {
            let rows = self
                .store
                .query("SELECT COUNT(*) AS matched FROM task WHERE id = ?", &[id_value])?;
            let matched = rows
                .first()
                .map(|row| row.integer("matched"))
                .transpose()?
                .unwrap_or(0);
            return Ok(usize::try_from(matched).unwrap_or(0));
        }

        values.push(id_value);
        let sql = format!("UPDATE task SET {} WHERE id = ?", assignments.join(", "));
        Ok(self.store.execute(&sql, &values)?.affected_rows)
    }

    fn delete(&self, id: TaskId) -> PersistenceResult<usize> {
        let outcome = self.store.execute(
            "DELETE FROM task WHERE id = ?",
            &[SqlValue::Integer(task_id_to_i64(id)?)],
        )?;
        Ok(outcome.affected_rows)
    }
}

fn patch_assignments(patch: &TaskPatch) -> (Vec<&'static str>, Vec<SqlValue>) {
    let mut assignments = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = patch.status {
        assignments.push("status = ?");
        values.push(SqlValue::Integer(status.code()));
    }
    if let Some(progress) = patch.progress {
        assignments.push("progress = ?");
        values.push(SqlValue::Integer(i64::from(progress.min(100))));
    }
    if let Some(resumable) = patch.resumable {
        assignments.push("resumable = ?");
        values.push(SqlValue::Integer(bool_to_sqlite(resumable)));
    }
    if let Some(filename) = &patch.filename {
        assignments.push("file_name = ?");
        values.push(SqlValue::Text(filename.clone()));
    }
    if let Some(mime_type) = &patch.mime_type {
        assignments.push("mime_type = ?");
        values.push(SqlValue::Text(mime_type.clone()));
    }
    if let Some(session) = &patch.native_session_id {
        assignments.push("native_session_id = ?");
        values.push(optional_text(session.as_ref().map(TransferSessionId::as_str)));
    }
    if let Some(reason) = &patch.failure_reason {
        assignments.push("failure_reason = ?");
        values.push(optional_text(reason.as_deref()));
    }

    (assignments, values)
}

fn filter_sql(filter: &TaskFilter) -> PersistenceResult<(String, Vec<SqlValue>)> {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if !filter.statuses.is_empty() {
        conditions.push(format!(
            "status IN ({})",
            vec!["?"; filter.statuses.len()].join(", ")
        ));
        params.extend(
            filter
                .statuses
                .iter()
                .map(|status| SqlValue::Integer(status.code())),
        );
    }
    if let Some(url) = &filter.url {
        conditions.push("url = ?".to_string());
        params.push(SqlValue::Text(url.clone()));
    }
    if let Some(saved_dir) = &filter.saved_dir {
        conditions.push("saved_dir = ?".to_string());
        params.push(SqlValue::Text(saved_dir.clone()));
    }
    if let Some(after) = filter.created_after {
        conditions.push("time_created > ?".to_string());
        params.push(SqlValue::Integer(millis(after)?));
    }
    if let Some(before) = filter.created_before {
        conditions.push("time_created < ?".to_string());
        params.push(SqlValue::Integer(millis(before)?));
    }

    let mut sql = format!("SELECT {TASK_COLUMNS} FROM task");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(match filter.order {
        TaskOrder::OldestFirst => " ORDER BY time_created ASC, id ASC",
        TaskOrder::NewestFirst => " ORDER BY time_created DESC, id DESC",
    });
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    Ok((sql, params))
}

fn task_from_row(row: &SqlRow) -> PersistenceResult<Task> {
    let id = i64_to_task_id(row.integer("id")?)?;
    let row_error = |message: String| CoreError::for_task(CoreErrorKind::QueryError, id, message);

    let status_code = row.integer("status")?;
    let status = TaskStatus::from_code(status_code)
        .ok_or_else(|| row_error(format!("unknown task status code {status_code}")))?;

    let headers = match row.optional_text("headers")?.as_deref().map(str::trim) {
        None | Some("") => TaskHeaders::new(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|error| row_error(format!("task headers are not a json object: {error}")))?,
    };

    let created_millis = row.integer("time_created")?;
    let time_created = from_unix_millis(created_millis)
        .ok_or_else(|| row_error(format!("invalid time_created {created_millis}")))?;

    Ok(Task {
        id,
        url: row.text("url")?,
        saved_dir: row.text("saved_dir")?,
        filename: row.optional_text("file_name")?,
        headers,
        status,
        progress: u8::try_from(row.integer("progress")?.clamp(0, 100)).unwrap_or(100),
        resumable: row.flag("resumable")?,
        time_created,
        allow_cellular: row.flag("allow_cellular")?,
        save_in_public_storage: row.flag("save_in_public_storage")?,
        requires_storage_access: row.flag("requires_storage_access")?,
        show_notification: row.flag("show_notification")?,
        open_file_from_notification: row.flag("open_file_from_notification")?,
        mime_type: row.optional_text("mime_type")?,
        native_session_id: row
            .optional_text("native_session_id")?
            .map(TransferSessionId::new),
        failure_reason: row.optional_text("failure_reason")?,
    })
}

fn param_value(param: &QueryParam) -> SqlValue {
    match param {
        QueryParam::Null => SqlValue::Null,
        QueryParam::Integer(value) => SqlValue::Integer(*value),
        QueryParam::Real(value) => SqlValue::Real(*value),
        QueryParam::Text(value) => SqlValue::Text(value.clone()),
    }
}

fn optional_text(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, |text| SqlValue::Text(text.to_string()))
}

fn millis(value: SystemTime) -> PersistenceResult<i64> {
    to_unix_millis(value).ok_or_else(|| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            "time before unix epoch is not supported",
        )
    })
}

fn task_id_to_i64(value: TaskId) -> PersistenceResult<i64> {
    i64::try_from(value.0).map_err(|_| {
        CoreError::for_task(
            CoreErrorKind::InvalidInput,
            value,
            "task id exceeds i64 range",
        )
    })
}

fn i64_to_task_id(value: i64) -> PersistenceResult<TaskId> {
    u64::try_from(value).map(TaskId).map_err(|_| {
        CoreError::new(
            CoreErrorKind::QueryError,
            format!("negative task id {value} in sqlite record"),
        )
    })
}
