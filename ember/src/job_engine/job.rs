// SPDX-License-Identifier: MIT

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::JobError;
use crate::sync::{lock, recover};

/// Category of a job. Every category has its own queue and its own wakeup signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Drained by the generic worker threads.
    Generic,
    /// Drained by the file logger's worker thread.
    Logging,
    Io,
    Render,
    /// Drained on the main thread by [`super::JobSystem::begin_frame`].
    Main,
}

impl JobType {
    /// Number of categories.
    pub const COUNT: usize = 5;

    pub const ALL: [JobType; JobType::COUNT] = [
        JobType::Generic,
        JobType::Logging,
        JobType::Io,
        JobType::Render,
        JobType::Main,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobType::Generic => "generic",
            JobType::Logging => "logging",
            JobType::Io => "io",
            JobType::Render => "render",
            JobType::Main => "main",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a job. States only ever move forward; `Finished` and
/// `Cancelled` are both terminal.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    #[default]
    None,
    Created,
    Dispatched,
    Enqueued,
    Running,
    Finished,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self >= JobState::Finished
    }
}

pub(crate) type Work = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Default)]
struct JobStatus {
    state: JobState,
    outcome: Option<Result<(), JobError>>,
}

struct JobInner {
    id: u64,
    category: JobType,
    status: Mutex<JobStatus>,
    state_changed: Condvar,
    // the closure owns the job's user data; dropped once run or on destruction
    work: Mutex<Option<Work>>,
    // one for the outstanding dispatch plus one per unfinished prerequisite
    blockers: AtomicUsize,
    // None once the job is done and its dependents have been handed on
    dependents: Mutex<Option<SmallVec<[Job; 4]>>>,
    live_jobs: Arc<AtomicUsize>,
}

impl Drop for JobInner {
    fn drop(&mut self) {
        self.live_jobs.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared handle to a unit of work.
///
/// Cloning a handle takes another reference; the job and everything its
/// callback captured are destroyed when the last handle goes away. The queue
/// holds one reference while the job is enqueued and a prerequisite holds one
/// for each registered dependent.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("category", &self.inner.category)
            .field("state", &self.state())
            .finish()
    }
}

impl Job {
    pub(crate) fn new(id: u64, category: JobType, work: Work, live_jobs: Arc<AtomicUsize>) -> Self {
        live_jobs.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::new(JobInner {
                id,
                category,
                status: Mutex::new(JobStatus {
                    state: JobState::Created,
                    outcome: None,
                }),
                state_changed: Condvar::new(),
                work: Mutex::new(Some(work)),
                blockers: AtomicUsize::new(1),
                dependents: Mutex::new(Some(SmallVec::new())),
                live_jobs,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn category(&self) -> JobType {
        self.inner.category
    }

    pub fn state(&self) -> JobState {
        lock(&self.inner.status).state
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Number of live handles to this job, the queue's and dependents' included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Outcome of the callback, once the job reached a terminal state.
    pub fn outcome(&self) -> Option<Result<(), JobError>> {
        lock(&self.inner.status).outcome.clone()
    }

    /// Registers `self` as a dependent of `prerequisite`: once dispatched,
    /// `self` is only enqueued after `prerequisite` has finished running.
    ///
    /// A prerequisite that is already done does not hold the job back.
    pub fn depend_on(&self, prerequisite: &Job) -> Result<(), JobError> {
        if Arc::ptr_eq(&self.inner, &prerequisite.inner) {
            return Err(JobError::SelfDependency { id: self.id() });
        }
        // held across the registration so a concurrent dispatch waits for it
        let status = lock(&self.inner.status);
        if status.state != JobState::Created {
            return Err(JobError::DependencyAfterDispatch { id: self.id() });
        }
        let mut dependents = lock(&prerequisite.inner.dependents);
        if let Some(list) = dependents.as_mut() {
            self.inner.blockers.fetch_add(1, Ordering::AcqRel);
            list.push(self.clone());
        }
        drop(dependents);
        drop(status);
        Ok(())
    }

    /// Blocks until the job finished or was cancelled and returns its outcome.
    ///
    /// Waiting on a job that nobody dispatches blocks forever.
    pub fn wait(&self) -> Result<(), JobError> {
        let mut status = lock(&self.inner.status);
        while !status.state.is_terminal() {
            status = recover(self.inner.state_changed.wait(status));
        }
        status.outcome.clone().unwrap_or(Ok(()))
    }

    /// Like [`Job::wait`] but returns `None` if the job is still pending after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), JobError>> {
        let status = lock(&self.inner.status);
        let (status, _) = recover(self.inner.state_changed.wait_timeout_while(
            status,
            timeout,
            |status| !status.state.is_terminal(),
        ));
        if status.state.is_terminal() {
            Some(status.outcome.clone().unwrap_or(Ok(())))
        } else {
            None
        }
    }

    fn advance(&self, to: JobState) {
        let mut status = lock(&self.inner.status);
        if status.state < to {
            status.state = to;
        }
    }

    fn finish(&self, state: JobState, outcome: Result<(), JobError>) {
        let mut status = lock(&self.inner.status);
        if status.state.is_terminal() {
            return;
        }
        status.state = state;
        status.outcome = Some(outcome);
        drop(status);
        self.inner.state_changed.notify_all();
    }

    /// Moves a created job to `Dispatched`. Returns true when nothing holds the
    /// job back any more and the caller must enqueue it.
    pub(crate) fn mark_dispatched(&self) -> Result<bool, JobError> {
        let mut status = lock(&self.inner.status);
        match status.state {
            JobState::Created => status.state = JobState::Dispatched,
            JobState::Cancelled => return Err(JobError::Cancelled { id: self.id() }),
            _ => return Err(JobError::AlreadyDispatched { id: self.id() }),
        }
        drop(status);
        Ok(self.release_blocker())
    }

    fn release_blocker(&self) -> bool {
        self.inner.blockers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn mark_enqueued(&self) {
        self.advance(JobState::Enqueued);
    }

    /// Runs the callback on the calling thread, hands every dependent that is
    /// now unblocked to `on_ready`, then marks the job finished.
    pub(crate) fn execute(&self, mut on_ready: impl FnMut(Job)) {
        self.advance(JobState::Running);
        let work = lock(&self.inner.work).take();
        let outcome = match work {
            Some(work) => run_guarded(self.id(), work),
            None => Ok(()),
        };
        match &outcome {
            Ok(()) => debug!("job {} ({}) finished", self.id(), self.category()),
            Err(err) => warn!("{err}"),
        }

        let dependents = lock(&self.inner.dependents).take().unwrap_or_default();
        for dependent in dependents {
            if dependent.release_blocker() {
                on_ready(dependent);
            }
        }

        self.finish(JobState::Finished, outcome);
    }

    /// Discards a job that will never run, together with every dependent
    /// waiting on it. Waiters observe [`JobError::Cancelled`].
    pub(crate) fn cancel(&self) {
        if self.state() >= JobState::Running {
            return;
        }
        drop(lock(&self.inner.work).take());
        let dependents = lock(&self.inner.dependents).take().unwrap_or_default();
        self.finish(JobState::Cancelled, Err(JobError::Cancelled { id: self.id() }));
        for dependent in dependents {
            dependent.cancel();
        }
    }

    /// Drops this handle. Returns true if it was the last one, i.e. the job was destroyed.
    pub(crate) fn release(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }
}

fn run_guarded(id: u64, work: Work) -> Result<(), JobError> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(JobError::Failed {
            id,
            message: format!("{err:#}"),
        }),
        Err(payload) => Err(JobError::Panicked {
            id,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64, live: &Arc<AtomicUsize>, work: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Job {
        Job::new(id, JobType::Generic, Box::new(work), live.clone())
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(JobState::None < JobState::Created);
        assert!(JobState::Created < JobState::Dispatched);
        assert!(JobState::Dispatched < JobState::Enqueued);
        assert!(JobState::Enqueued < JobState::Running);
        assert!(JobState::Running < JobState::Finished);
        assert!(JobState::Finished.is_terminal() && JobState::Cancelled.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_category_indices_cover_all() {
        for (i, category) in JobType::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
        assert_eq!(JobType::Main.to_string(), "main");
    }

    #[test]
    fn test_execute_captures_error_and_panic() {
        let live = Arc::new(AtomicUsize::new(0));

        let failing = job(1, &live, || anyhow::bail!("disk on fire"));
        failing.execute(|_| {});
        assert_eq!(failing.state(), JobState::Finished);
        match failing.wait() {
            Err(JobError::Failed { id: 1, message }) => assert!(message.contains("disk on fire")),
            other => panic!("unexpected outcome {other:?}"),
        }

        let panicking = job(2, &live, || panic!("boom"));
        panicking.execute(|_| {});
        assert_eq!(
            panicking.wait(),
            Err(JobError::Panicked {
                id: 2,
                message: "boom".to_string()
            })
        );
    }

    #[test]
    fn test_release_reports_destruction() {
        let live = Arc::new(AtomicUsize::new(0));
        let first = job(1, &live, || Ok(()));
        let second = first.clone();
        assert_eq!(live.load(Ordering::Acquire), 1);
        assert_eq!(first.ref_count(), 2);
        assert!(!first.release());
        assert_eq!(live.load(Ordering::Acquire), 1);
        assert!(second.release());
        assert_eq!(live.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_dependents_released_after_prerequisite_runs() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = job(1, &live, || Ok(()));
        let b = job(2, &live, || Ok(()));
        b.depend_on(&a).unwrap();

        // b still waits for a, so dispatching alone does not make it ready
        assert!(a.mark_dispatched().unwrap());
        assert!(!b.mark_dispatched().unwrap());

        let mut ready = Vec::new();
        a.execute(|job| ready.push(job.id()));
        assert_eq!(ready, vec![2]);
    }

    #[test]
    fn test_depend_on_rejected_after_dispatch_or_on_self() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = job(1, &live, || Ok(()));
        let b = job(2, &live, || Ok(()));
        assert_eq!(a.depend_on(&a), Err(JobError::SelfDependency { id: 1 }));
        b.mark_dispatched().unwrap();
        assert_eq!(b.depend_on(&a), Err(JobError::DependencyAfterDispatch { id: 2 }));
        assert_eq!(b.mark_dispatched(), Err(JobError::AlreadyDispatched { id: 2 }));
    }

    #[test]
    fn test_finished_prerequisite_does_not_block() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = job(1, &live, || Ok(()));
        a.execute(|_| {});
        let b = job(2, &live, || Ok(()));
        b.depend_on(&a).unwrap();
        assert!(b.mark_dispatched().unwrap());
    }

    #[test]
    fn test_cancel_cascades_to_dependents() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = job(1, &live, || Ok(()));
        let b = job(2, &live, || Ok(()));
        b.depend_on(&a).unwrap();
        a.cancel();
        assert_eq!(a.wait(), Err(JobError::Cancelled { id: 1 }));
        assert_eq!(b.state(), JobState::Cancelled);
        assert_eq!(b.mark_dispatched(), Err(JobError::Cancelled { id: 2 }));
        assert_eq!(a.wait_timeout(Duration::from_millis(1)), Some(Err(JobError::Cancelled { id: 1 })));
    }
}
