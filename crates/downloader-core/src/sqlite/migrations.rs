pub const TASK_TABLE: &str = "task";

/// A column added after the table was first created. Applied through
/// `ensure_column`, so re-running a migration never fails on a column that
/// already exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub name: &'static str,
    pub sql_type: &'static str,
    pub default: Option<&'static str>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub columns: &'static [ColumnSpec],
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_task_table",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS task (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0,
    file_name TEXT,
    saved_dir TEXT NOT NULL,
    headers TEXT NOT NULL DEFAULT '{}',
    mime_type VARCHAR(128),
    resumable TINYINT NOT NULL DEFAULT 0,
    show_notification TINYINT NOT NULL DEFAULT 0,
    open_file_from_notification TINYINT NOT NULL DEFAULT 0,
    time_created INTEGER NOT NULL DEFAULT 0
);
"#,
    columns: &[],
    down_sql: r#"
DROP TABLE IF EXISTS task;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_save_in_public_storage",
    up_sql: "",
    columns: &[ColumnSpec {
        table: TASK_TABLE,
        name: "save_in_public_storage",
        sql_type: "TINYINT",
        default: Some("0"),
    }],
    down_sql: r#"
ALTER TABLE task DROP COLUMN save_in_public_storage;
"#,
};

const MIGRATION_0003: SqliteMigration = SqliteMigration {
    version: 3,
    name: "add_allow_cellular",
    up_sql: "",
    columns: &[ColumnSpec {
        table: TASK_TABLE,
        name: "allow_cellular",
        sql_type: "TINYINT",
        default: Some("1"),
    }],
    down_sql: r#"
ALTER TABLE task DROP COLUMN allow_cellular;
"#,
};

const MIGRATION_0004: SqliteMigration = SqliteMigration {
    version: 4,
    name: "add_requires_storage_access",
    up_sql: "",
    columns: &[ColumnSpec {
        table: TASK_TABLE,
        name: "requires_storage_access",
        sql_type: "TINYINT",
        default: Some("0"),
    }],
    down_sql: r#"
ALTER TABLE task DROP COLUMN requires_storage_access;
"#,
};

const MIGRATION_0005: SqliteMigration = SqliteMigration {
    version: 5,
    name: "add_transfer_session_tracking",
    up_sql: r#"
CREATE INDEX IF NOT EXISTS idx_task_status_time_created
    ON task (status, time_created, id);
"#,
    columns: &[
        ColumnSpec {
            table: TASK_TABLE,
            name: "native_session_id",
            sql_type: "TEXT",
            default: None,
        },
        ColumnSpec {
            table: TASK_TABLE,
            name: "failure_reason",
            sql_type: "TEXT",
            default: None,
        },
    ],
    down_sql: r#"
DROP INDEX IF EXISTS idx_task_status_time_created;
ALTER TABLE task DROP COLUMN failure_reason;
ALTER TABLE task DROP COLUMN native_session_id;
"#,
};

const MIGRATIONS: [SqliteMigration; 5] = [
    MIGRATION_0001,
    MIGRATION_0002,
    MIGRATION_0003,
    MIGRATION_0004,
    MIGRATION_0005,
];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
