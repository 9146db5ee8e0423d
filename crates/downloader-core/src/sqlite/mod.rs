pub mod migrations;
pub mod store;

pub use migrations::{
    ColumnSpec, SqliteMigration, TASK_TABLE, current_schema_version, migration, migrations,
};
pub use store::{DEFAULT_BUSY_TIMEOUT, ExecuteOutcome, SqlRow, SqlValue, SqliteRowStore};
