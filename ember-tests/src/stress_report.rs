// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// Printed by `job-stress` as one JSON line on stdout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StressReport {
    pub generic_threads: usize,

    pub jobs_submitted: usize,

    pub jobs_executed: usize,

    /// Jobs whose callback ran more than once.
    pub duplicates: usize,

    /// Jobs whose callback never ran.
    pub missing: usize,

    /// Chain links that ran before the link they depend on.
    pub dependency_violations: usize,

    pub failures_reported: usize,

    pub main_jobs_off_main_thread: usize,

    /// Jobs queued on a category nobody consumes, left for shutdown.
    pub stranded_submitted: usize,

    /// Stranded jobs run by a draining shutdown.
    pub stranded_ran: usize,

    /// Stranded jobs cancelled by shutdown.
    pub stranded_cancelled: usize,

    pub live_jobs_after_shutdown: usize,

    pub elapsed_ms: u128,
}

impl StressReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0
            && self.missing == 0
            && self.dependency_violations == 0
            && self.main_jobs_off_main_thread == 0
            && self.stranded_ran + self.stranded_cancelled == self.stranded_submitted
            && self.live_jobs_after_shutdown == 0
    }
}
