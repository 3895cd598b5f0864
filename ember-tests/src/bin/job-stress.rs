// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use ember::{Job, JobError, JobSystem, JobSystemConfig, JobType, ShutdownPolicy, Signal};
use ember_tests::stress_report::StressReport;
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(about = "Floods the job system and reports what ran")]
struct Args {
    /// Independent jobs spread over the Generic and Main categories
    #[arg(long, default_value_t = 10_000)]
    jobs: usize,

    /// Dependency chains alternating between Generic and Main
    #[arg(long, default_value_t = 50)]
    chains: usize,

    #[arg(long, default_value_t = 8)]
    chain_length: usize,

    /// Every n-th independent job is Main instead of Generic (0: none)
    #[arg(long, default_value_t = 10)]
    main_every: usize,

    /// Every n-th independent job fails (0: none)
    #[arg(long, default_value_t = 0)]
    fail_every: usize,

    /// Jobs left on the unserved Render category for shutdown to dispose of
    #[arg(long, default_value_t = 0)]
    stranded: usize,

    #[arg(long, allow_hyphen_values = true, default_value_t = -1)]
    threads: i32,

    #[arg(long, value_enum, default_value_t)]
    shutdown_policy: ShutdownPolicy,

    /// Give up waiting for outstanding jobs after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

/// What the jobs observed while running.
struct Tally {
    runs: Vec<AtomicU32>,
    done: Vec<AtomicBool>,
    executed: AtomicUsize,
    violations: AtomicUsize,
    off_main: AtomicUsize,
    main_thread: ThreadId,
}

fn tallied_job(
    jobs: &JobSystem,
    tally: &Arc<Tally>,
    slot: usize,
    category: JobType,
    after: Option<usize>,
    fail: bool,
) -> Result<Job, JobError> {
    let tally = tally.clone();
    jobs.create(category, move || {
        tally.runs[slot].fetch_add(1, Ordering::AcqRel);
        if let Some(prev) = after {
            if !tally.done[prev].load(Ordering::Acquire) {
                tally.violations.fetch_add(1, Ordering::AcqRel);
            }
        }
        if category == JobType::Main && thread::current().id() != tally.main_thread {
            tally.off_main.fetch_add(1, Ordering::AcqRel);
        }
        tally.done[slot].store(true, Ordering::Release);
        tally.executed.fetch_add(1, Ordering::AcqRel);
        if fail {
            anyhow::bail!("job in slot {slot} failed on purpose");
        }
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let main_signal = Arc::new(Signal::new());
    let config = JobSystemConfig {
        generic_thread_hint: args.threads,
        shutdown_policy: args.shutdown_policy,
        ..JobSystemConfig::default()
    };
    let jobs = JobSystem::new(&config, Some(main_signal.clone())).context("failed to start the job system")?;

    let submitted = args.jobs + args.chains * args.chain_length;
    let tally = Arc::new(Tally {
        runs: (0..submitted).map(|_| AtomicU32::new(0)).collect(),
        done: (0..submitted).map(|_| AtomicBool::new(false)).collect(),
        executed: AtomicUsize::new(0),
        violations: AtomicUsize::new(0),
        off_main: AtomicUsize::new(0),
        main_thread: thread::current().id(),
    });
    let started = Instant::now();
    let mut handles = Vec::with_capacity(submitted);

    for slot in 0..args.jobs {
        let category = if args.main_every > 0 && slot % args.main_every == 0 {
            JobType::Main
        } else {
            JobType::Generic
        };
        let fail = args.fail_every > 0 && (slot + 1) % args.fail_every == 0;
        let job = tallied_job(&jobs, &tally, slot, category, None, fail)?;
        jobs.dispatch(&job)?;
        handles.push(job);
    }

    for chain in 0..args.chains {
        let first = args.jobs + chain * args.chain_length;
        let links = (0..args.chain_length)
            .map(|link| {
                let category = if link % 2 == 0 { JobType::Generic } else { JobType::Main };
                let after = (link > 0).then(|| first + link - 1);
                tallied_job(&jobs, &tally, first + link, category, after, false)
            })
            .collect::<Result<Vec<_>, _>>()?;
        for pair in links.windows(2) {
            pair[1].depend_on(&pair[0])?;
        }
        for link in &links {
            jobs.dispatch(link)?;
        }
        handles.extend(links);
    }

    let stranded_ran = Arc::new(AtomicUsize::new(0));
    let mut stranded = Vec::with_capacity(args.stranded);
    for _ in 0..args.stranded {
        let ran = stranded_ran.clone();
        let job = jobs.create(JobType::Render, move || {
            ran.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })?;
        jobs.dispatch(&job)?;
        stranded.push(job);
    }
    info!("submitted {submitted} jobs and stranded {}", args.stranded);

    let deadline = started + Duration::from_secs(args.timeout_secs);
    while tally.executed.load(Ordering::Acquire) < submitted && Instant::now() < deadline {
        main_signal.wait_until_timeout(Duration::from_millis(5), || jobs.pending(JobType::Main) > 0);
        jobs.begin_frame()?;
    }

    let mut failures_reported = 0;
    for job in handles {
        match jobs.wait_timeout(&job, Duration::from_secs(1)) {
            Some(Err(JobError::Failed { .. })) => failures_reported += 1,
            Some(Err(err)) => warn!("job {} ended with {err}", job.id()),
            Some(Ok(())) => {}
            None => warn!("job {} did not finish", job.id()),
        }
        jobs.release(job);
    }
    let elapsed_ms = started.elapsed().as_millis();

    let generic_threads = jobs.generic_thread_count();
    jobs.shutdown();

    let mut stranded_cancelled = 0;
    for job in stranded {
        match jobs.wait_timeout(&job, Duration::from_secs(1)) {
            Some(Err(JobError::Cancelled { .. })) => stranded_cancelled += 1,
            Some(Ok(())) => {}
            Some(Err(err)) => warn!("stranded job {} ended with {err}", job.id()),
            None => warn!("stranded job {} outlived shutdown", job.id()),
        }
        jobs.release(job);
    }

    let runs: Vec<u32> = tally.runs.iter().map(|r| r.load(Ordering::Acquire)).collect();
    let report = StressReport {
        generic_threads,
        jobs_submitted: submitted,
        jobs_executed: runs.iter().filter(|&&n| n > 0).count(),
        duplicates: runs.iter().filter(|&&n| n > 1).count(),
        missing: runs.iter().filter(|&&n| n == 0).count(),
        dependency_violations: tally.violations.load(Ordering::Acquire),
        failures_reported,
        main_jobs_off_main_thread: tally.off_main.load(Ordering::Acquire),
        stranded_submitted: args.stranded,
        stranded_ran: stranded_ran.load(Ordering::Acquire),
        stranded_cancelled,
        live_jobs_after_shutdown: jobs.live_jobs(),
        elapsed_ms,
    };

    let serialized = serde_json::to_string(&report).context("failed to serialise the report")?;
    println!("{serialized}");

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
