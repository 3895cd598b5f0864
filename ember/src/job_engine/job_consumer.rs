// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::error::JobError;
use crate::job_engine::job::JobType;
use crate::job_engine::job_system::JobChannels;

/// Drains jobs from the category queues it is bound to, on the calling thread.
///
/// A consumer owns none of the queues; it only records which categories the
/// current thread may pull from. Queues are polled in binding order, so the
/// first bound category takes priority.
pub struct JobConsumer {
    channels: Arc<JobChannels>,
    categories: SmallVec<[JobType; 4]>,
}

impl std::fmt::Debug for JobConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConsumer")
            .field("categories", &self.categories)
            .finish()
    }
}

impl JobConsumer {
    pub(crate) fn new(channels: Arc<JobChannels>, categories: &[JobType]) -> Result<Self, JobError> {
        let mut consumer = Self {
            channels,
            categories: SmallVec::new(),
        };
        for &category in categories {
            consumer.bind(category)?;
        }
        Ok(consumer)
    }

    /// Adds a category to pull from. Binding a category twice has no effect.
    pub fn bind(&mut self, category: JobType) -> Result<(), JobError> {
        self.channels.check_category(category)?;
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        Ok(())
    }

    pub fn categories(&self) -> &[JobType] {
        &self.categories
    }

    pub fn has_work(&self) -> bool {
        self.categories
            .iter()
            .any(|&category| self.channels.pending(category) > 0)
    }

    /// Runs at most one job. Returns false if every bound queue was empty.
    pub fn consume_job(&self) -> bool {
        for &category in &self.categories {
            if let Some(job) = self.channels.pop(category) {
                self.channels.execute(job);
                return true;
            }
        }
        false
    }

    /// Runs jobs until every bound queue is empty. Returns how many ran.
    pub fn consume_all(&self) -> usize {
        let mut consumed = 0;
        while self.consume_job() {
            consumed += 1;
        }
        consumed
    }

    /// Runs at most `limit` jobs.
    pub fn consume_up_to(&self, limit: usize) -> usize {
        let mut consumed = 0;
        while consumed < limit && self.consume_job() {
            consumed += 1;
        }
        consumed
    }

    /// Runs jobs until the queues are empty or `budget` has elapsed. A job that
    /// started inside the budget always runs to completion.
    pub fn consume_for(&self, budget: Duration) -> usize {
        let started = Instant::now();
        let mut consumed = 0;
        while started.elapsed() < budget && self.consume_job() {
            consumed += 1;
        }
        consumed
    }
}
