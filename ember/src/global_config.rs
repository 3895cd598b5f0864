// SPDX-License-Identifier: MIT

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::file_logger::time_utils::TimestampFormat;
use crate::job_engine::job::JobType;

/// What happens to jobs that are still queued when the job system shuts down.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicy {
    #[default]
    /// Default: mark queued jobs cancelled and release them
    Cancel,
    /// Run queued jobs on the thread calling shutdown
    Drain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// `n > 0`: exactly n generic workers. `n <= 0`: all hardware threads
    /// minus `|n|` minus one for the main thread.
    pub generic_thread_hint: i32,
    /// Number of category queues; must cover every [`JobType`] used.
    pub category_count: usize,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            generic_thread_hint: -1,
            category_count: JobType::COUNT,
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

impl JobSystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.category_count == 0 || self.category_count > JobType::COUNT {
            return Err(ConfigError::Invalid(format!(
                "category_count must be between 1 and {}, got {}",
                JobType::COUNT,
                self.category_count
            )));
        }
        Ok(())
    }

    /// Resolves the thread-count hint against the machine. Never returns zero.
    pub fn generic_thread_count(&self) -> usize {
        let hint = self.generic_thread_hint;
        if hint > 0 {
            return hint as usize;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);
        (cores + i64::from(hint) - 1).max(1) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggerConfig {
    /// File stem of the active log, `<directory>/<name>.log`.
    pub name: String,
    pub directory: PathBuf,
    /// Older `.log` files kept in `directory` at startup, besides the active log.
    pub max_logs: usize,
    pub line_timestamp: TimestampFormat,
    pub file_timestamp: TimestampFormat,
    /// Lines written per worker cycle before `Logging` jobs get their turn.
    pub max_lines_per_cycle: usize,
    pub copy_on_shutdown: bool,
    /// Append the number of live jobs to the shutdown line.
    pub report_live_jobs: bool,
}

impl Default for FileLoggerConfig {
    fn default() -> Self {
        Self {
            name: "ember".to_string(),
            directory: PathBuf::from("Data/Logs"),
            max_logs: 10,
            line_timestamp: TimestampFormat::line(),
            file_timestamp: TimestampFormat::file_name(),
            max_lines_per_cycle: 64,
            copy_on_shutdown: true,
            report_live_jobs: true,
        }
    }
}

impl FileLoggerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "log name must be a plain file stem, got {:?}",
                self.name
            )));
        }
        if self.max_lines_per_cycle == 0 {
            return Err(ConfigError::Invalid(
                "max_lines_per_cycle must be at least 1".to_string(),
            ));
        }
        self.line_timestamp.compile()?;
        self.file_timestamp.compile()?;
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.name))
    }
}

/// Everything the `ember` binary can be configured with. Loaded from JSON;
/// missing fields fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    pub jobs: JobSystemConfig,
    pub logger: FileLoggerConfig,
}

impl EmberConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EmberConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jobs.validate()?;
        self.logger.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count_resolution() {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let config = |hint| JobSystemConfig {
            generic_thread_hint: hint,
            ..JobSystemConfig::default()
        };
        assert_eq!(config(3).generic_thread_count(), 3);
        assert_eq!(config(0).generic_thread_count(), cores.saturating_sub(1).max(1));
        assert_eq!(config(-1).generic_thread_count(), cores.saturating_sub(2).max(1));
        assert_eq!(config(-1000).generic_thread_count(), 1);
    }

    #[test]
    fn test_category_count_bounds() {
        let mut config = JobSystemConfig::default();
        assert!(config.validate().is_ok());
        config.category_count = 0;
        assert!(config.validate().is_err());
        config.category_count = JobType::COUNT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.json");
        fs::write(
            &path,
            r#"{ "jobs": { "shutdown_policy": "drain" }, "logger": { "name": "editor", "max_logs": 3 } }"#,
        )
        .unwrap();

        let config = EmberConfig::load(&path).unwrap();
        assert_eq!(config.jobs.shutdown_policy, ShutdownPolicy::Drain);
        assert_eq!(config.jobs.category_count, JobType::COUNT);
        assert_eq!(config.logger.name, "editor");
        assert_eq!(config.logger.max_logs, 3);
        assert_eq!(config.logger.log_path(), PathBuf::from("Data/Logs/editor.log"));
    }

    #[test]
    fn test_invalid_log_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.json");
        fs::write(&path, r#"{ "logger": { "name": "../escape" } }"#).unwrap();
        assert!(matches!(EmberConfig::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(EmberConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
