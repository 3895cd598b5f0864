// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::JobError;
use crate::global_config::{JobSystemConfig, ShutdownPolicy};
use crate::job_engine::job::{Job, JobType};
use crate::job_engine::job_consumer::JobConsumer;
use crate::job_engine::signal::Signal;
use crate::job_engine::thread_safe_queue::ThreadSafeQueue;
use crate::sync::{lock, read, write};

/// Queues, signals and bookkeeping shared by the job system, its workers,
/// every consumer and every spawner.
pub(crate) struct JobChannels {
    queues: Vec<ThreadSafeQueue<Job>>,
    signals: RwLock<Vec<Option<Arc<Signal>>>>,
    // readers: a producer between its running check and the push.
    // writer: a change of `running`/`draining` and the final sweep of the queues.
    gate: RwLock<()>,
    running: AtomicBool,
    // set while shutdown runs the leftover jobs itself
    draining: AtomicBool,
    next_id: AtomicU64,
    live_jobs: Arc<AtomicUsize>,
}

impl JobChannels {
    fn new(category_count: usize) -> Self {
        Self {
            queues: (0..category_count).map(|_| ThreadSafeQueue::new()).collect(),
            signals: RwLock::new(vec![None; category_count]),
            gate: RwLock::new(()),
            running: AtomicBool::new(true),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            live_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn category_count(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn check_category(&self, category: JobType) -> Result<(), JobError> {
        if category.index() < self.queues.len() {
            Ok(())
        } else {
            Err(JobError::UnknownCategory {
                category,
                count: self.queues.len(),
            })
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn accepts_work(&self) -> bool {
        self.is_running() || self.draining.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self, category: JobType) -> usize {
        self.queues
            .get(category.index())
            .map_or(0, ThreadSafeQueue::len)
    }

    pub(crate) fn pop(&self, category: JobType) -> Option<Job> {
        self.queues.get(category.index())?.pop()
    }

    fn signal(&self, category: JobType) -> Option<Arc<Signal>> {
        read(&self.signals).get(category.index()).cloned().flatten()
    }

    fn set_signal(&self, category: JobType, signal: Option<Arc<Signal>>) -> Result<(), JobError> {
        self.check_category(category)?;
        write(&self.signals)[category.index()] = signal;
        Ok(())
    }

    fn clear_signal_if(&self, category: JobType, signal: &Arc<Signal>) {
        let mut signals = write(&self.signals);
        if let Some(slot) = signals.get_mut(category.index()) {
            if slot.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, signal)) {
                *slot = None;
            }
        }
    }

    fn notify_all_signals(&self) {
        let signals: Vec<Arc<Signal>> = read(&self.signals).iter().flatten().cloned().collect();
        for signal in signals {
            signal.notify_all();
        }
    }

    fn create(&self, category: JobType, work: super::job::Work) -> Result<Job, JobError> {
        self.check_category(category)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Job::new(id, category, work, self.live_jobs.clone()))
    }

    fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        self.check_category(job.category())?;
        let gate = read(&self.gate);
        if !self.is_running() {
            return Err(JobError::ShutDown);
        }
        if job.mark_dispatched()? {
            let rejected = self.enqueue_gated(job.clone());
            drop(gate);
            if let Err(job) = rejected {
                job.cancel();
            }
        } else {
            debug!("job {} parked until its prerequisites finish", job.id());
        }
        Ok(())
    }

    fn enqueue(&self, job: Job) {
        let rejected = {
            let _gate = read(&self.gate);
            self.enqueue_gated(job)
        };
        if let Err(job) = rejected {
            job.cancel();
        }
    }

    // The caller holds `gate` for reading, so shutdown cannot sweep the
    // queues between the check and the push. A job that may no longer be
    // queued is handed back for the caller to cancel once the gate is released.
    fn enqueue_gated(&self, job: Job) -> Result<(), Job> {
        if !self.accepts_work() {
            debug!("job {} became ready after shutdown, cancelling", job.id());
            return Err(job);
        }
        let category = job.category();
        let Some(queue) = self.queues.get(category.index()) else {
            return Err(job);
        };
        // set before the push: a consumer may pop and run it right away
        job.mark_enqueued();
        queue.push(job);
        if let Some(signal) = self.signal(category) {
            signal.notify_all();
        }
        Ok(())
    }

    /// Runs a popped job and forwards dependents it unblocked to their queues.
    pub(crate) fn execute(&self, job: Job) {
        debug!("running job {} ({})", job.id(), job.category());
        job.execute(|dependent| self.enqueue(dependent));
    }

    /// Sets the running flag under the gate: once this returns, every producer
    /// either finished its push or will observe the new value.
    fn set_running(&self, running: bool) -> bool {
        let _gate = write(&self.gate);
        self.running.swap(running, Ordering::AcqRel)
    }

    fn set_draining(&self, draining: bool) {
        let _gate = write(&self.gate);
        self.draining.store(draining, Ordering::Release);
    }

    /// Stops accepting work for good and cancels everything still queued.
    fn close_and_cancel_queued(&self) -> usize {
        let stranded: Vec<Job> = {
            let _gate = write(&self.gate);
            self.running.store(false, Ordering::Release);
            self.draining.store(false, Ordering::Release);
            self.queues.iter().flat_map(ThreadSafeQueue::drain).collect()
        };
        // outside the gate: dropping a cancelled callback may run arbitrary drops
        for job in &stranded {
            job.cancel();
        }
        stranded.len()
    }
}

/// Cloneable handle for submitting work to a [`JobSystem`] from other subsystems.
#[derive(Clone)]
pub struct JobSpawner {
    channels: Arc<JobChannels>,
}

impl std::fmt::Debug for JobSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpawner")
            .field("categories", &self.channels.category_count())
            .field("running", &self.channels.is_running())
            .finish()
    }
}

impl JobSpawner {
    /// Creates a job without enqueuing it. The returned handle is the creator's reference.
    pub fn create<F>(&self, category: JobType, work: F) -> Result<Job, JobError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.channels.create(category, Box::new(work))
    }

    /// Fire-and-forget: create, dispatch and release in one call.
    pub fn run<F>(&self, category: JobType, work: F) -> Result<(), JobError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let job = self.create(category, work)?;
        self.dispatch_and_release(job)
    }

    /// Hands the job to its category queue. The queue takes its own reference,
    /// so the caller still has to [`release`](JobSpawner::release) its handle.
    pub fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        self.channels.dispatch(job)
    }

    /// Drops the caller's reference. Returns true if that destroyed the job.
    pub fn release(&self, job: Job) -> bool {
        job.release()
    }

    pub fn dispatch_and_release(&self, job: Job) -> Result<(), JobError> {
        let dispatched = self.dispatch(&job);
        job.release();
        dispatched
    }

    pub fn wait(&self, job: &Job) -> Result<(), JobError> {
        job.wait()
    }

    pub fn wait_timeout(&self, job: &Job, timeout: Duration) -> Option<Result<(), JobError>> {
        job.wait_timeout(timeout)
    }

    pub fn wait_and_release(&self, job: Job) -> Result<(), JobError> {
        let outcome = job.wait();
        job.release();
        outcome
    }

    /// Binds, rebinds or (with `None`) clears the signal notified when a job
    /// of `category` is enqueued.
    pub fn set_category_signal(&self, category: JobType, signal: Option<Arc<Signal>>) -> Result<(), JobError> {
        self.channels.set_signal(category, signal)
    }

    /// Clears the signal of `category` only if it is still `signal`.
    pub fn clear_category_signal_if(&self, category: JobType, signal: &Arc<Signal>) {
        self.channels.clear_signal_if(category, signal);
    }

    pub fn consumer(&self, categories: &[JobType]) -> Result<JobConsumer, JobError> {
        JobConsumer::new(self.channels.clone(), categories)
    }

    /// Jobs currently queued in `category`.
    pub fn pending(&self, category: JobType) -> usize {
        self.channels.pending(category)
    }

    /// Jobs created by this system that have not been destroyed yet.
    pub fn live_jobs(&self) -> usize {
        self.channels.live_jobs.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.channels.is_running()
    }
}

/// Category-routed job scheduler.
///
/// Owns one queue and one signal slot per category and a pool of generic
/// worker threads bound to [`JobType::Generic`]. `Main` jobs are run by the
/// thread calling [`JobSystem::begin_frame`]; `Logging` jobs by whoever binds
/// that category (the file logger). Other categories accumulate until a
/// consumer is bound to them.
pub struct JobSystem {
    spawner: JobSpawner,
    generic_signal: Arc<Signal>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
    shutdown_policy: ShutdownPolicy,
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("threads", &self.thread_count)
            .field("categories", &self.category_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl JobSystem {
    /// Starts the generic workers. `main_signal`, if given, is bound to
    /// [`JobType::Main`] so the main thread can sleep until main jobs arrive.
    pub fn new(config: &JobSystemConfig, main_signal: Option<Arc<Signal>>) -> Result<Self, JobError> {
        config
            .validate()
            .map_err(|err| JobError::Config(err.to_string()))?;

        let channels = Arc::new(JobChannels::new(config.category_count));
        let spawner = JobSpawner { channels };
        let generic_signal = Arc::new(Signal::new());
        spawner.set_category_signal(JobType::Generic, Some(generic_signal.clone()))?;
        if let Some(main_signal) = main_signal {
            if spawner.channels.check_category(JobType::Main).is_ok() {
                spawner.set_category_signal(JobType::Main, Some(main_signal))?;
            } else {
                warn!("main signal ignored: the job system has no main category");
            }
        }

        let thread_count = config.generic_thread_count();
        let system = Self {
            spawner,
            generic_signal,
            workers: Mutex::new(Vec::with_capacity(thread_count)),
            thread_count,
            shutdown_policy: config.shutdown_policy,
        };

        for index in 0..thread_count {
            let name = format!("ember-job-{index}");
            let channels = system.spawner.channels.clone();
            let signal = system.generic_signal.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || generic_job_worker(channels, signal));
            match spawned {
                Ok(handle) => lock(&system.workers).push(handle),
                Err(err) => {
                    // stops and joins the workers spawned so far
                    system.shutdown();
                    return Err(JobError::Spawn {
                        name,
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            "job system started with {} generic workers and {} categories",
            thread_count, config.category_count
        );
        Ok(system)
    }

    pub fn spawner(&self) -> JobSpawner {
        self.spawner.clone()
    }

    pub fn generic_thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn category_count(&self) -> usize {
        self.spawner.channels.category_count()
    }

    pub fn create<F>(&self, category: JobType, work: F) -> Result<Job, JobError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.spawner.create(category, work)
    }

    pub fn run<F>(&self, category: JobType, work: F) -> Result<(), JobError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.spawner.run(category, work)
    }

    pub fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        self.spawner.dispatch(job)
    }

    pub fn release(&self, job: Job) -> bool {
        self.spawner.release(job)
    }

    pub fn dispatch_and_release(&self, job: Job) -> Result<(), JobError> {
        self.spawner.dispatch_and_release(job)
    }

    pub fn wait(&self, job: &Job) -> Result<(), JobError> {
        self.spawner.wait(job)
    }

    pub fn wait_timeout(&self, job: &Job, timeout: Duration) -> Option<Result<(), JobError>> {
        self.spawner.wait_timeout(job, timeout)
    }

    pub fn wait_and_release(&self, job: Job) -> Result<(), JobError> {
        self.spawner.wait_and_release(job)
    }

    pub fn set_category_signal(&self, category: JobType, signal: Option<Arc<Signal>>) -> Result<(), JobError> {
        self.spawner.set_category_signal(category, signal)
    }

    pub fn consumer(&self, categories: &[JobType]) -> Result<JobConsumer, JobError> {
        self.spawner.consumer(categories)
    }

    pub fn pending(&self, category: JobType) -> usize {
        self.spawner.pending(category)
    }

    pub fn live_jobs(&self) -> usize {
        self.spawner.live_jobs()
    }

    /// Runs every queued `Main` job on the calling thread. Returns how many ran.
    pub fn begin_frame(&self) -> Result<usize, JobError> {
        Ok(self.consumer(&[JobType::Main])?.consume_all())
    }

    /// Runs queued `Main` jobs until the queue is empty or `budget` elapsed.
    pub fn begin_frame_for(&self, budget: Duration) -> Result<usize, JobError> {
        Ok(self.consumer(&[JobType::Main])?.consume_for(budget))
    }

    pub fn is_running(&self) -> bool {
        self.spawner.is_running()
    }

    /// Sets the running flag and wakes every bound signal so waiting
    /// consumers re-check it. Clearing it stops dispatch and lets the workers
    /// exit; it does not join them, [`JobSystem::shutdown`] does.
    pub fn set_is_running(&self, running: bool) {
        self.spawner.channels.set_running(running);
        self.spawner.channels.notify_all_signals();
    }

    /// Stops the workers and disposes of every job still queued according to
    /// the configured [`ShutdownPolicy`]. Calling it again does nothing.
    pub fn shutdown(&self) {
        let mut workers = std::mem::take(&mut *lock(&self.workers));
        let channels = &self.spawner.channels;
        let was_running = channels.set_running(false);
        if !was_running && workers.is_empty() {
            return;
        }
        info!("shutting down job system");
        channels.notify_all_signals();

        for worker in workers.drain(..) {
            let name = worker.thread().name().unwrap_or("ember-job").to_string();
            if worker.join().is_err() {
                warn!("worker thread {name} panicked");
            }
        }

        if self.shutdown_policy == ShutdownPolicy::Drain {
            channels.set_draining(true);
            let consumer = JobConsumer::new(channels.clone(), &JobType::ALL[..channels.category_count()]);
            let drained = consumer.map_or(0, |consumer| consumer.consume_all());
            info!("ran {drained} queued jobs before shutdown");
        }

        // jobs pushed by other consumers (the logger thread) while draining end up here too
        let cancelled = channels.close_and_cancel_queued();
        if cancelled > 0 {
            info!("cancelled {cancelled} queued jobs");
        }

        write(&channels.signals).iter_mut().for_each(|slot| *slot = None);
        info!("job system stopped");
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of every generic worker thread.
fn generic_job_worker(channels: Arc<JobChannels>, signal: Arc<Signal>) {
    let consumer = match JobConsumer::new(channels.clone(), &[JobType::Generic]) {
        Ok(consumer) => consumer,
        Err(err) => {
            warn!("generic worker cannot start: {err}");
            return;
        }
    };
    debug!("generic worker started");
    loop {
        signal.wait_until(|| !channels.is_running() || consumer.has_work());
        if !channels.is_running() {
            break;
        }
        consumer.consume_all();
    }
    debug!("generic worker stopped");
}
