use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::{
    DEFAULT_CONCURRENCY_LIMIT, DEFAULT_EVENT_BUFFER, DEFAULT_PROGRESS_STEP, SchedulerOptions,
};

pub const MAX_CONCURRENT_ENV: &str = "DOWNLOADER_MAX_CONCURRENT";
pub const DEFAULT_DATABASE_FILE_NAME: &str = "download_tasks.db";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub concurrency_limit: usize,
    pub progress_step: u8,
    pub database_file_name: String,
    pub busy_timeout_ms: u64,
    pub event_buffer: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            progress_step: DEFAULT_PROGRESS_STEP,
            database_file_name: DEFAULT_DATABASE_FILE_NAME.to_string(),
            busy_timeout_ms: 5_000,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl DownloaderConfig {
    /// Parses a JSON object; missing keys keep their defaults and blank input
    /// yields the default config.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid downloader config: {error}"),
            )
        })
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(MAX_CONCURRENT_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(limit) => self.concurrency_limit = limit,
                Err(error) => tracing::warn!(
                    value = %raw,
                    error = %error,
                    "ignoring invalid {MAX_CONCURRENT_ENV}"
                ),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.scheduler_options().validate()?;
        let name = self.database_file_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "database_file_name must be a bare file name",
            ));
        }
        Ok(())
    }

    pub fn database_path(&self, app_data_dir: &Path) -> PathBuf {
        app_data_dir.join(&self.database_file_name)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            concurrency_limit: self.concurrency_limit,
            progress_step: self.progress_step,
            event_buffer: self.event_buffer,
        }
    }
}
