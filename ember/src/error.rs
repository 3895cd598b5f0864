// SPDX-License-Identifier: MIT

//! Error types shared by the job engine, the file logger and the configuration layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::job_engine::job::JobType;

/// Errors reported by the job engine.
///
/// Errors raised inside a job (an `Err` returned by the callback or a panic) are
/// captured per job and handed out by [`crate::job_engine::JobSystem::wait`]; they
/// never unwind through a worker thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("category {category:?} is outside the {count} categories of this job system")]
    UnknownCategory { category: JobType, count: usize },

    #[error("job {id} has already been dispatched")]
    AlreadyDispatched { id: u64 },

    #[error("job {id} cannot gain prerequisites after it was dispatched")]
    DependencyAfterDispatch { id: u64 },

    #[error("job {id} cannot depend on itself")]
    SelfDependency { id: u64 },

    #[error("job {id} failed: {message}")]
    Failed { id: u64, message: String },

    #[error("job {id} panicked: {message}")]
    Panicked { id: u64, message: String },

    #[error("job {id} was cancelled before it ran")]
    Cancelled { id: u64 },

    #[error("the job system has been shut down")]
    ShutDown,

    #[error("failed to spawn thread {name}: {message}")]
    Spawn { name: String, message: String },

    #[error("invalid job system configuration: {0}")]
    Config(String),
}

/// Errors reported by the file logger.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("the file logger is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl LoggerError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LoggerError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors reported while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
