// SPDX-License-Identifier: MIT
//
// ember: job scheduling and asynchronous file logging for the ember engine.

pub mod error;
pub mod file_logger;
pub mod global_config;
pub mod job_engine;
pub(crate) mod sync;

pub use error::{ConfigError, JobError, LoggerError};
pub use file_logger::FileLogger;
pub use global_config::{EmberConfig, FileLoggerConfig, JobSystemConfig, ShutdownPolicy};
pub use job_engine::{Job, JobConsumer, JobSpawner, JobState, JobSystem, JobType, Signal, ThreadSafeQueue};
