// SPDX-License-Identifier: MIT
// ember: runs a frame loop on the job system and logs it to a rotating log file.
//
// - Generic workers simulate each frame, a Main job presents it on this thread.
// - The file logger owns the Logging category and optionally receives env_logger output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};

use ember::{EmberConfig, FileLogger, JobSystem, JobType, ShutdownPolicy, Signal};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON configuration file. Command line options override its values.
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Generic worker threads: n > 0 exactly, n <= 0 all cores minus |n| minus one
    #[arg(long, allow_hyphen_values = true)]
    threads: Option<i32>,

    /// File stem of the active log
    #[arg(long)]
    log_name: Option<String>,

    /// Directory holding the active log and older logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Older logs kept at startup
    #[arg(long)]
    max_logs: Option<usize>,

    /// Frames to run before shutting down
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Generic jobs the presenting job of each frame depends on
    #[arg(long, default_value_t = 8)]
    jobs_per_frame: u32,

    /// Target frame time in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// What happens to jobs still queued at shutdown
    #[arg(long, value_enum)]
    shutdown_policy: Option<ShutdownPolicy>,

    #[arg(
        long = "log-to-file",
        help = "Route env_logger output into the log file instead of stderr."
    )]
    log_to_file: bool,

    /// Save a timestamped copy of the log halfway through the run
    #[arg(long)]
    save_log: bool,
}

fn validate_args(args: &Args) -> Result<(), String> {
    if args.frames == 0 {
        return Err("--frames must be at least 1".into());
    }
    if args.jobs_per_frame == 0 {
        return Err("--jobs-per-frame must be at least 1".into());
    }
    if args.frame_ms == 0 {
        return Err("--frame-ms must be at least 1".into());
    }
    if let Some(name) = &args.log_name {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(format!("--log-name must be a plain file name, got {name:?}"));
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<EmberConfig> {
    let mut config = match &args.config {
        Some(path) => EmberConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => EmberConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.jobs.generic_thread_hint = threads;
    }
    if let Some(policy) = args.shutdown_policy {
        config.jobs.shutdown_policy = policy;
    }
    if let Some(name) = &args.log_name {
        config.logger.name = name.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.logger.directory = dir.clone();
    }
    if let Some(max_logs) = args.max_logs {
        config.logger.max_logs = max_logs;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// One frame: `jobs_per_frame` simulate jobs on the generic workers, a present
/// job on the Main category that waits for all of them, and a Logging job that
/// records the frame.
fn run_frame(
    jobs: &JobSystem,
    logger: &Arc<FileLogger>,
    main_signal: &Signal,
    frame: u32,
    args: &Args,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let simulated = Arc::new(AtomicUsize::new(0));

    let present = {
        let simulated = simulated.clone();
        let logger = logger.clone();
        jobs.create(JobType::Main, move || {
            let done = simulated.load(Ordering::Acquire);
            logger.log_print_line(format!("frame {frame}: presented after {done} simulate jobs"));
            Ok(())
        })?
    };

    for part in 0..args.jobs_per_frame {
        let simulated = simulated.clone();
        let simulate = jobs.create(JobType::Generic, move || {
            let mut state = u64::from(frame) << 32 | u64::from(part);
            for _ in 0..10_000 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            }
            std::hint::black_box(state);
            simulated.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })?;
        present.depend_on(&simulate)?;
        jobs.dispatch_and_release(simulate)?;
    }
    jobs.dispatch(&present)?;

    {
        let logger = logger.clone();
        jobs.run(JobType::Logging, move || {
            logger.log_tag_line("Frame", format!("frame {frame} submitted"));
            Ok(())
        })?;
    }

    let frame_time = Duration::from_millis(args.frame_ms);
    while !present.is_finished() {
        main_signal.wait_until_timeout(frame_time, || jobs.pending(JobType::Main) > 0);
        jobs.begin_frame()?;
    }
    if let Err(err) = jobs.wait_and_release(present) {
        warn!("frame {frame} was not presented: {err}");
    }

    let elapsed = started.elapsed();
    debug!("frame {frame} took {elapsed:?}");
    if let Some(rest) = frame_time.checked_sub(elapsed) {
        std::thread::sleep(rest);
    }
    Ok(())
}

/// Where env_logger output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogTarget {
    /// Initialised first, before anything else logs
    Stderr,
    /// Initialised once the file logger exists; the startup lines logged
    /// before that only reach the file through the summary
    File,
}

impl LogTarget {
    fn from_args(args: &Args) -> Self {
        if args.log_to_file {
            LogTarget::File
        } else {
            LogTarget::Stderr
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let target = LogTarget::from_args(&args);
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if target == LogTarget::Stderr {
        builder.init();
    }

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let config = load_config(&args)?;

    let main_signal = Arc::new(Signal::new());
    let jobs = JobSystem::new(&config.jobs, Some(main_signal.clone()))
        .context("failed to start the job system")?;
    let logger = Arc::new(
        FileLogger::new(&jobs, config.logger.clone()).context("failed to start the file logger")?,
    );

    if target == LogTarget::File {
        builder.target(env_logger::Target::Pipe(Box::new(logger.writer())));
        builder.init();
    }

    info!(
        "Starting ember: {} generic workers, {} categories, logging to {}",
        jobs.generic_thread_count(),
        jobs.category_count(),
        logger.path().display()
    );

    for frame in 0..args.frames {
        run_frame(&jobs, &logger, &main_signal, frame, &args)
            .with_context(|| format!("frame {frame} failed"))?;
        if args.save_log && frame == args.frames / 2 {
            let save = logger.save_log().context("failed to schedule a log copy")?;
            if let Err(err) = jobs.wait_and_release(save) {
                warn!("saving the log failed: {err}");
            }
        }
    }

    info!("Stopping ember");
    match logger.shutdown().context("failed to shut down the file logger")? {
        Some(copy) => info!("final log saved to {}", copy.display()),
        None => debug!("no final log copy"),
    }
    jobs.shutdown();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ember").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_negative_thread_hint_parses() {
        let args = parse(&["--threads", "-2", "--frames", "3"]);
        assert_eq!(args.threads, Some(-2));
        assert_eq!(args.frames, 3);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_log_target_follows_log_to_file() {
        assert_eq!(LogTarget::from_args(&parse(&[])), LogTarget::Stderr);
        assert_eq!(LogTarget::from_args(&parse(&["--log-to-file"])), LogTarget::File);
    }

    #[test]
    fn test_validate_args_rejects_bad_values() {
        assert!(validate_args(&parse(&["--frames", "0"])).is_err());
        assert!(validate_args(&parse(&["--jobs-per-frame", "0"])).is_err());
        assert!(validate_args(&parse(&["--log-name", "a/b"])).is_err());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ember.json");
        std::fs::write(&path, r#"{ "logger": { "name": "from-file", "max_logs": 2 } }"#).unwrap();

        let args = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--max-logs",
            "7",
            "--shutdown-policy",
            "drain",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.logger.name, "from-file");
        assert_eq!(config.logger.max_logs, 7);
        assert_eq!(config.jobs.shutdown_policy, ShutdownPolicy::Drain);
    }
}
