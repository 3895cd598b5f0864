// SPDX-License-Identifier: MIT
//! # Design: Category-Routed Job System
//!
//! ## Overview
//! Work is split into categories ([`JobType`]). Each category has its own FIFO
//! queue and an optional wakeup [`Signal`].
//!
//! - Generic worker threads are bound to `Generic` and sleep on its signal.
//! - `Main` has no worker: the main thread drains it once per frame.
//! - `Logging` is drained by the file logger's own thread.
//! - A job may wait on prerequisites; it is enqueued by the last one to finish.
//! - Shutdown cancels (or runs, see [`crate::global_config::ShutdownPolicy`])
//!   whatever is still queued, so no job outlives the system unnoticed.
//!
//! ```text
//!         +--------------------------------------+
//!         |   JobSystem::run / create+dispatch   |
//!         +---+--------------+--------------+----+
//!             |              |              |
//!             v              v              v
//!      +------+-----+  +-----+------+  +----+-------+
//!      |  Generic   |  |  Logging   |  |   Main     |   (Io, Render, ...)
//!      |  queue     |  |  queue     |  |   queue    |
//!      +------+-----+  +-----+------+  +----+-------+
//!             |              |              |
//!      +------v-----+  +-----v------+  +----v-------+
//!      | N workers  |  | FileLogger |  | begin_frame|
//!      | (signal)   |  | thread     |  | main thread|
//!      +------------+  +------------+  +------------+
//! ```

pub mod job;
pub mod job_consumer;
pub mod job_system;
pub mod signal;
pub mod thread_safe_queue;

pub use job::{Job, JobState, JobType};
pub use job_consumer::JobConsumer;
pub use job_system::{JobSpawner, JobSystem};
pub use signal::Signal;
pub use thread_safe_queue::ThreadSafeQueue;
