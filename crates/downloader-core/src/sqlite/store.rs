use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params_from_iter};

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "downloader_schema_migrations";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type SqlValue = Value;

/// One result row: column names in select order with their values.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    pub fn integer(&self, column: &str) -> PersistenceResult<i64> {
        match self.get(column) {
            Some(Value::Integer(value)) => Ok(*value),
            other => Err(column_type_error(column, "INTEGER", other)),
        }
    }

    pub fn text(&self, column: &str) -> PersistenceResult<String> {
        match self.get(column) {
            Some(Value::Text(value)) => Ok(value.clone()),
            other => Err(column_type_error(column, "TEXT", other)),
        }
    }

    pub fn optional_text(&self, column: &str) -> PersistenceResult<Option<String>> {
        match self.get(column) {
            Some(Value::Null) => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            other => Err(column_type_error(column, "TEXT or NULL", other)),
        }
    }

    pub fn flag(&self, column: &str) -> PersistenceResult<bool> {
        self.integer(column).map(sqlite_to_bool)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecuteOutcome {
    pub affected_rows: usize,
    pub last_insert_id: i64,
}

/// Single-connection SQLite wrapper. Calls block the caller while the
/// connection lock is held.
pub struct SqliteRowStore {
    database_path: Option<PathBuf>,
    connection: Mutex<Connection>,
}

impl SqliteRowStore {
    pub fn open(database_path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        Self::open_with_busy_timeout(database_path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(
        database_path: impl Into<PathBuf>,
        busy_timeout: Duration,
    ) -> PersistenceResult<Self> {
        let database_path = database_path.into();
        let connection = open_connection(&database_path, busy_timeout).map_err(|error| {
            CoreError::new(
                CoreErrorKind::StorageUnavailable,
                format!(
                    "sqlite store 'open' failed for '{}': {error}",
                    database_path.display()
                ),
            )
        })?;
        tracing::debug!(path = %database_path.display(), "opened sqlite row store");

        Ok(Self {
            database_path: Some(database_path),
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        let connection = Connection::open_in_memory().map_err(|error| {
            CoreError::new(
                CoreErrorKind::StorageUnavailable,
                format!("sqlite store 'open_in_memory' failed: {error}"),
            )
        })?;
        Ok(Self {
            database_path: None,
            connection: Mutex::new(connection),
        })
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    /// Replays every migration up to the recorded marker without touching
    /// it, recreating tables, indexes and columns that went missing. Not part
    /// of the normal startup path.
    pub fn repair_schema(&self) -> PersistenceResult<()> {
        self.with_connection("repair_schema", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;
            for version in 1..=current_version {
                apply_migration_steps(connection, defined_migration(version)?)?;
            }
            tracing::info!(version = current_version, "repaired schema objects");
            Ok(())
        })
    }

    /// Adds `column` to `table` unless `PRAGMA table_info` already lists it.
    /// Returns whether the column was added.
    pub fn ensure_column(
        &self,
        table: &str,
        column: &str,
        sql_type: &str,
        default: Option<&str>,
    ) -> PersistenceResult<bool> {
        self.with_connection("ensure_column", |connection| {
            ensure_column_on(connection, table, column, sql_type, default)
        })
    }

    pub fn query(&self, sql: &str, params: &[SqlValue]) -> PersistenceResult<Vec<SqlRow>> {
        self.with_connection("query", |connection| {
            select_rows(connection, sql, params, false)
        })
    }

    /// Like [`query`](Self::query) but refuses any statement that could write.
    pub fn query_read_only(&self, sql: &str, params: &[SqlValue]) -> PersistenceResult<Vec<SqlRow>> {
        self.with_connection("query_read_only", |connection| {
            select_rows(connection, sql, params, true)
        })
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> PersistenceResult<ExecuteOutcome> {
        self.with_connection("execute", |connection| {
            let affected_rows = connection.execute(sql, params_from_iter(params.iter()))?;
            Ok(ExecuteOutcome {
                affected_rows,
                last_insert_id: connection.last_insert_rowid(),
            })
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteRowStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    let migration = defined_migration(version)?;
                    apply_up_migration(connection, migration)?;
                    tracing::info!(
                        version = migration.version,
                        name = migration.name,
                        "applied schema migration"
                    );
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

fn open_connection(database_path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(busy_timeout)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    Ok(connection)
}

fn select_rows(
    connection: &Connection,
    sql: &str,
    params: &[SqlValue],
    read_only: bool,
) -> rusqlite::Result<Vec<SqlRow>> {
    let mut statement = connection.prepare(sql)?;
    if read_only && !statement.readonly() {
        return Err(storage_error_sqlite("statement is not read-only"));
    }

    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut rows = statement.query(params_from_iter(params.iter()))?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|index| row.get::<_, SqlValue>(index))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collected.push(SqlRow {
            columns: columns.clone(),
            values,
        });
    }
    Ok(collected)
}

fn ensure_column_on(
    connection: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
    default: Option<&str>,
) -> rusqlite::Result<bool> {
    validate_identifier(table)?;
    validate_identifier(column)?;
    validate_sql_type(sql_type)?;

    if column_exists(connection, table, column)? {
        return Ok(false);
    }

    let default_clause = default
        .map(|raw| format!(" DEFAULT {}", sql_literal(raw)))
        .unwrap_or_default();
    connection.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {column} {sql_type}{default_clause};"
    ))?;
    Ok(true)
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = statement.query_map([], |row| row.get::<_, String>("name"))?;
    for name in names {
        if name?.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn validate_identifier(identifier: &str) -> rusqlite::Result<()> {
    let mut chars = identifier.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(storage_error_sqlite(&format!(
            "invalid sql identifier '{identifier}'"
        )))
    }
}

fn validate_sql_type(sql_type: &str) -> rusqlite::Result<()> {
    let valid = !sql_type.trim().is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '(' | ')' | ',' | '_'));
    if valid {
        Ok(())
    } else {
        Err(storage_error_sqlite(&format!(
            "invalid sql column type '{sql_type}'"
        )))
    }
}

fn sql_literal(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.parse::<i64>().is_ok() || trimmed.parse::<f64>().is_ok_and(f64::is_finite) {
        trimmed.to_string()
    } else if trimmed.eq_ignore_ascii_case("null") {
        "NULL".to_string()
    } else {
        format!("'{}'", raw.replace('\'', "''"))
    }
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_migration_steps(
    connection: &Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    if !migration.up_sql.trim().is_empty() {
        connection.execute_batch(migration.up_sql)?;
    }
    for column in migration.columns {
        ensure_column_on(
            connection,
            column.table,
            column.name,
            column.sql_type,
            column.default,
        )?;
    }
    Ok(())
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    apply_migration_steps(&transaction, migration)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn classify_error(error: &rusqlite::Error) -> CoreErrorKind {
    let rusqlite::Error::SqliteFailure(failure, _) = error else {
        return CoreErrorKind::QueryError;
    };
    match failure.code {
        ErrorCode::ConstraintViolation
            if matches!(
                failure.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            ) =>
        {
            CoreErrorKind::DuplicateId
        }
        ErrorCode::CannotOpen
        | ErrorCode::PermissionDenied
        | ErrorCode::ReadOnly
        | ErrorCode::NotADatabase
        | ErrorCode::DatabaseCorrupt
        | ErrorCode::DiskFull
        | ErrorCode::SystemIoFailure
        | ErrorCode::DatabaseBusy
        | ErrorCode::DatabaseLocked => CoreErrorKind::StorageUnavailable,
        _ => CoreErrorKind::QueryError,
    }
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    CoreError::new(
        classify_error(&error),
        format!("sqlite store '{operation}' failed: {error}"),
    )
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::QueryError,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn column_type_error(column: &str, expected: &str, found: Option<&SqlValue>) -> CoreError {
    let found = match found {
        None => "missing column".to_string(),
        Some(value) => format!("{:?}", value.data_type()),
    };
    CoreError::new(
        CoreErrorKind::QueryError,
        format!("column '{column}' expected {expected}, found {found}"),
    )
}

pub(crate) fn bool_to_sqlite(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn sqlite_to_bool(value: i64) -> bool {
    value != 0
}
