// SPDX-License-Identifier: MIT

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::Context;
use log::{debug, info, warn};

use crate::error::LoggerError;
use crate::file_logger::rotation;
use crate::file_logger::time_utils::CompiledTimestamp;
use crate::file_logger::writer::FileLogWriter;
use crate::global_config::FileLoggerConfig;
use crate::job_engine::{Job, JobConsumer, JobSpawner, JobSystem, JobType, Signal, ThreadSafeQueue};
use crate::sync::{lock, recover};

pub const TAG_PRINT: &str = "Log";
pub const TAG_WARNING: &str = "Warning";
pub const TAG_ERROR: &str = "Error";

#[derive(Debug, Default)]
struct FlushState {
    requested: u64,
    completed: u64,
    // set by the worker's final pass; later requests are answered directly
    closed: bool,
}

/// State shared between the logger handle, its worker thread, copy jobs and writers.
pub(crate) struct LoggerShared {
    lines: ThreadSafeQueue<String>,
    signal: Arc<Signal>,
    running: AtomicBool,
    flush: Mutex<FlushState>,
    flushed: Condvar,
    // only the worker writes lines; copies and shutdown take the lock too
    output: Mutex<BufWriter<File>>,
    path: PathBuf,
    lines_written: AtomicU64,
}

impl LoggerShared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn enqueue(&self, line: String) {
        if !self.is_running() {
            return;
        }
        self.lines.push(line);
        self.signal.notify_all();
    }

    fn flush_pending(&self) -> bool {
        let flush = lock(&self.flush);
        flush.requested > flush.completed
    }

    /// Writes up to `limit` queued lines.
    fn write_lines(&self, limit: usize) {
        let mut output = lock(&self.output);
        let mut written = 0;
        while written < limit {
            let Some(line) = self.lines.pop() else { break };
            // not log::warn!: the log facade may be routed back into this logger
            if let Err(err) = output.write_all(line.as_bytes()) {
                eprintln!("file logger: failed to write to {}: {err}", self.path.display());
            }
            written += 1;
        }
        self.lines_written.fetch_add(written as u64, Ordering::Relaxed);
    }

    /// Writes everything queued, flushes the stream and releases every
    /// flush request made so far. `close` marks the worker's final pass.
    fn complete_flush(&self, close: bool) {
        let target = {
            let mut flush = lock(&self.flush);
            flush.closed |= close;
            flush.requested
        };
        self.write_lines(usize::MAX);
        if let Err(err) = lock(&self.output).flush() {
            eprintln!("file logger: failed to flush {}: {err}", self.path.display());
        }
        let mut flush = lock(&self.flush);
        flush.completed = flush.completed.max(target);
        drop(flush);
        self.flushed.notify_all();
    }

    fn copy_to(&self, dest: &Path) -> Result<u64, LoggerError> {
        let mut output = lock(&self.output);
        output
            .flush()
            .map_err(|err| LoggerError::io(format!("failed to flush {}", self.path.display()), err))?;
        fs::copy(&self.path, dest).map_err(|err| {
            LoggerError::io(
                format!("failed to copy {} to {}", self.path.display(), dest.display()),
                err,
            )
        })
    }
}

/// Asynchronous file logger.
///
/// Callers on any thread enqueue finished lines; one dedicated thread writes
/// them to `<directory>/<name>.log`. The same thread consumes the `Logging`
/// job category, so subsystems can hand it work that must be serialised with
/// log output.
pub struct FileLogger {
    shared: Arc<LoggerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    spawner: JobSpawner,
    line_stamp: CompiledTimestamp,
    file_stamp: CompiledTimestamp,
    config: FileLoggerConfig,
}

impl std::fmt::Debug for FileLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLogger")
            .field("path", &self.shared.path)
            .field("running", &self.is_running())
            .finish()
    }
}

impl FileLogger {
    /// Prunes old logs, truncates the active log and starts the worker thread.
    pub fn new(jobs: &JobSystem, config: FileLoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        let line_stamp = config.line_timestamp.compile()?;
        let file_stamp = config.file_timestamp.compile()?;

        let dir = &config.directory;
        fs::create_dir_all(dir)
            .map_err(|err| LoggerError::io(format!("failed to create {}", dir.display()), err))?;
        let path = config.log_path();
        let removed = rotation::prune_logs(dir, config.max_logs, &path)
            .map_err(|err| LoggerError::io(format!("failed to scan {}", dir.display()), err))?;
        if !removed.is_empty() {
            info!("removed {} old logs from {}", removed.len(), dir.display());
        }
        let file = File::create(&path)
            .map_err(|err| LoggerError::io(format!("failed to open {}", path.display()), err))?;

        let spawner = jobs.spawner();
        let consumer = spawner.consumer(&[JobType::Logging])?;
        let signal = Arc::new(Signal::new());
        let shared = Arc::new(LoggerShared {
            lines: ThreadSafeQueue::new(),
            signal: signal.clone(),
            running: AtomicBool::new(true),
            flush: Mutex::new(FlushState::default()),
            flushed: Condvar::new(),
            output: Mutex::new(BufWriter::new(file)),
            path: path.clone(),
            lines_written: AtomicU64::new(0),
        });
        spawner.set_category_signal(JobType::Logging, Some(signal))?;

        let worker_shared = shared.clone();
        let max_lines = config.max_lines_per_cycle;
        let worker = thread::Builder::new()
            .name("ember-file-logger".to_string())
            .spawn(move || log_worker(worker_shared, consumer, max_lines))
            .map_err(|err| LoggerError::io("failed to spawn the file logger thread", err))?;

        info!("logging to {}", path.display());
        Ok(Self {
            shared,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            spawner,
            line_stamp,
            file_stamp,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Lines written to the stream so far.
    pub fn lines_written(&self) -> u64 {
        self.shared.lines_written.load(Ordering::Relaxed)
    }

    pub fn log(&self, msg: impl AsRef<str>) {
        self.shared.enqueue(msg.as_ref().to_string());
    }

    pub fn log_line(&self, msg: impl AsRef<str>) {
        self.shared.enqueue(format!("{}\n", msg.as_ref()));
    }

    pub fn log_and_flush(&self, msg: impl AsRef<str>) {
        self.log(msg);
        self.flush();
    }

    pub fn log_line_and_flush(&self, msg: impl AsRef<str>) {
        self.log_line(msg);
        self.flush();
    }

    fn tagged(&self, tag: &str, msg: &str) -> String {
        format!("[{}][{}] {}", self.line_stamp.now(), tag, msg)
    }

    pub fn log_tag(&self, tag: &str, msg: impl AsRef<str>) {
        self.shared.enqueue(self.tagged(tag, msg.as_ref()));
    }

    pub fn log_tag_line(&self, tag: &str, msg: impl AsRef<str>) {
        let mut line = self.tagged(tag, msg.as_ref());
        line.push('\n');
        self.shared.enqueue(line);
    }

    pub fn log_print(&self, msg: impl AsRef<str>) {
        self.log_tag(TAG_PRINT, msg);
    }

    pub fn log_print_line(&self, msg: impl AsRef<str>) {
        self.log_tag_line(TAG_PRINT, msg);
    }

    pub fn log_warn(&self, msg: impl AsRef<str>) {
        self.log_tag(TAG_WARNING, msg);
    }

    pub fn log_warn_line(&self, msg: impl AsRef<str>) {
        self.log_tag_line(TAG_WARNING, msg);
    }

    pub fn log_error(&self, msg: impl AsRef<str>) {
        self.log_tag(TAG_ERROR, msg);
    }

    pub fn log_error_line(&self, msg: impl AsRef<str>) {
        self.log_tag_line(TAG_ERROR, msg);
    }

    /// Blocks until every line enqueued before this call is in the file and
    /// the stream has been flushed.
    pub fn flush(&self) {
        // a Logging job calling flush runs on the worker itself
        if thread::current().id() == self.worker_id {
            self.shared.complete_flush(false);
            return;
        }
        let ticket = {
            let mut flush = lock(&self.shared.flush);
            if flush.closed {
                drop(flush);
                if let Err(err) = lock(&self.shared.output).flush() {
                    warn!("failed to flush {}: {err}", self.shared.path.display());
                }
                return;
            }
            flush.requested += 1;
            flush.requested
        };
        self.shared.signal.notify_all();
        let flush = lock(&self.shared.flush);
        let _flush = recover(
            self.shared
                .flushed
                .wait_while(flush, |flush| flush.completed < ticket),
        );
    }

    /// An [`std::io::Write`] that turns everything written to it into log lines.
    pub fn writer(&self) -> FileLogWriter {
        FileLogWriter::new(self.shared.clone())
    }

    /// Copies the active log to `dest` right now, including every line the
    /// worker has written so far.
    pub fn copy_log(&self, dest: &Path) -> Result<u64, LoggerError> {
        self.shared.copy_to(dest)
    }

    /// Schedules a `Generic` job that copies the active log to
    /// `<name>_<timestamp>.log`. Logging carries on while the copy runs.
    pub fn save_log(&self) -> Result<Job, LoggerError> {
        if !self.is_running() {
            return Err(LoggerError::NotRunning);
        }
        let shared = self.shared.clone();
        let stamp_format = self.file_stamp.clone();
        let job = self.spawner.create(JobType::Generic, move || {
            let dest = rotation::timestamped_copy_path(&shared.path, &stamp_format.now());
            let bytes = shared
                .copy_to(&dest)
                .with_context(|| format!("saving log to {}", dest.display()))?;
            info!("saved log to {} ({bytes} bytes)", dest.display());
            Ok(())
        })?;
        self.spawner.dispatch(&job)?;
        Ok(job)
    }

    /// Stops the worker once it has written every queued line, appends the
    /// shutdown line and, if configured, keeps a timestamped copy of the log.
    /// Returns the copy's path. Later calls do nothing.
    pub fn shutdown(&self) -> Result<Option<PathBuf>, LoggerError> {
        let Some(worker) = lock(&self.worker).take() else {
            return Ok(None);
        };
        self.shared.running.store(false, Ordering::Release);
        self.shared.signal.notify_all();
        if worker.join().is_err() {
            warn!("file logger thread panicked");
        }
        self.spawner
            .clear_category_signal_if(JobType::Logging, &self.shared.signal);

        let mut last_line = self.tagged("Logger", "shutting down");
        if self.config.report_live_jobs {
            last_line.push_str(&format!("; live jobs: {}", self.spawner.live_jobs()));
        }
        last_line.push('\n');
        {
            let mut output = lock(&self.shared.output);
            output
                .write_all(last_line.as_bytes())
                .and_then(|()| output.flush())
                .map_err(|err| LoggerError::io(format!("failed to write {}", self.shared.path.display()), err))?;
        }
        self.shared.lines_written.fetch_add(1, Ordering::Relaxed);

        if !self.config.copy_on_shutdown {
            return Ok(None);
        }
        let dest = rotation::timestamped_copy_path(&self.shared.path, &self.file_stamp.now());
        self.shared.copy_to(&dest)?;
        debug!("final log copied to {}", dest.display());
        Ok(Some(dest))
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("file logger shutdown failed: {err}");
        }
    }
}

/// Body of the logger thread: write lines, answer flush requests, run
/// `Logging` jobs; each bounded per cycle so neither source starves the other.
fn log_worker(shared: Arc<LoggerShared>, consumer: JobConsumer, max_lines: usize) {
    loop {
        shared.signal.wait_until(|| {
            !shared.is_running() || !shared.lines.is_empty() || shared.flush_pending() || consumer.has_work()
        });
        let running = shared.is_running();

        shared.write_lines(max_lines);
        if shared.flush_pending() {
            shared.complete_flush(false);
        }
        consumer.consume_up_to(max_lines);

        if !running {
            break;
        }
    }
    // lines enqueued right before shutdown still make it to the file
    shared.complete_flush(true);
}
