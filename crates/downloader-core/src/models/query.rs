use std::time::SystemTime;

use serde::Deserialize;

use crate::models::{TaskStatus, unix_millis};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Structured task selection. Empty fields do not constrain the result.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub url: Option<String>,
    pub saved_dir: Option<String>,
    #[serde(with = "unix_millis::option")]
    pub created_after: Option<SystemTime>,
    #[serde(with = "unix_millis::option")]
    pub created_before: Option<SystemTime>,
    pub order: TaskOrder,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Host-supplied read-only SELECT over the `task` table with positional
/// placeholders. Status columns hold the integer codes.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TaskQuery {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl TaskQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }
}
