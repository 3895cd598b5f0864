use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use super::*;
use crate::global_config::{FileLoggerConfig, JobSystemConfig};
use crate::job_engine::{JobSystem, JobType};

fn job_system() -> JobSystem {
    let config = JobSystemConfig {
        generic_thread_hint: 2,
        ..JobSystemConfig::default()
    };
    JobSystem::new(&config, None).unwrap()
}

fn logger_config(dir: &Path, name: &str) -> FileLoggerConfig {
    FileLoggerConfig {
        name: name.to_string(),
        directory: dir.to_path_buf(),
        ..FileLoggerConfig::default()
    }
}

fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".log"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_lines_keep_their_order() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = FileLogger::new(&jobs, logger_config(dir.path(), "order")).unwrap();

    logger.log_line("A");
    logger.log_line("B");
    logger.log("C");
    logger.log_line_and_flush("D");

    let content = fs::read_to_string(logger.path()).unwrap();
    assert_eq!(content, "A\nB\nCD\n");
    assert_eq!(logger.lines_written(), 4);
}

#[test]
fn test_flush_barrier_reaches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = Arc::new(FileLogger::new(&jobs, logger_config(dir.path(), "flush")).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    logger.log_line(format!("thread {t} line {i}"));
                }
                logger.log_line_and_flush(format!("thread {t} done"));
                let content = fs::read_to_string(logger.path()).unwrap();
                assert!(content.contains(&format!("thread {t} done\n")));
                assert!(content.contains(&format!("thread {t} line 99\n")));
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
}

#[test]
fn test_tagged_lines() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = FileLogger::new(&jobs, logger_config(dir.path(), "tags")).unwrap();

    logger.log_print_line("hello");
    logger.log_warn_line("careful");
    logger.log_error_line("broken");
    logger.log_tag_line("Render", "frame 1");
    logger.flush();

    let content = fs::read_to_string(logger.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with('[') && lines[0].ends_with("][Log] hello"));
    assert!(lines[1].ends_with("][Warning] careful"));
    assert!(lines[2].ends_with("][Error] broken"));
    assert!(lines[3].ends_with("][Render] frame 1"));
}

#[test]
fn test_startup_prunes_old_logs() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..5u64 {
        let file = File::create(dir.path().join(format!("old{i}.log"))).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(600 - i * 100))
            .unwrap();
    }
    fs::write(dir.path().join("game.log"), "stale content").unwrap();

    let jobs = job_system();
    let config = FileLoggerConfig {
        max_logs: 3,
        copy_on_shutdown: false,
        ..logger_config(dir.path(), "game")
    };
    let logger = FileLogger::new(&jobs, config).unwrap();

    assert_eq!(log_files(dir.path()), vec!["game.log", "old2.log", "old3.log", "old4.log"]);
    // the active log starts empty
    assert_eq!(fs::read_to_string(logger.path()).unwrap(), "");
}

#[test]
fn test_save_log_copies_without_stopping() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let config = FileLoggerConfig {
        copy_on_shutdown: false,
        ..logger_config(dir.path(), "save")
    };
    let logger = FileLogger::new(&jobs, config).unwrap();

    logger.log_line_and_flush("before save");
    let job = logger.save_log().unwrap();
    assert_eq!(jobs.wait_and_release(job), Ok(()));
    logger.log_line_and_flush("after save");

    let copies: Vec<String> = log_files(dir.path())
        .into_iter()
        .filter(|name| name.starts_with("save_"))
        .collect();
    assert_eq!(copies.len(), 1);
    let copy = fs::read_to_string(dir.path().join(&copies[0])).unwrap();
    assert_eq!(copy, "before save\n");
    assert_eq!(fs::read_to_string(logger.path()).unwrap(), "before save\nafter save\n");
}

#[test]
fn test_shutdown_writes_final_line_and_copy() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = FileLogger::new(&jobs, logger_config(dir.path(), "final")).unwrap();

    logger.log_line("last words");
    let copy = logger.shutdown().unwrap().expect("a final copy");
    assert!(!logger.is_running());

    let content = fs::read_to_string(logger.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "last words");
    assert!(lines[1].contains("][Logger] shutting down; live jobs: "));
    assert_eq!(fs::read_to_string(&copy).unwrap(), content);

    // further logging is dropped and a second shutdown is a no-op
    logger.log_line_and_flush("ignored");
    assert_eq!(fs::read_to_string(logger.path()).unwrap(), content);
    assert!(logger.shutdown().unwrap().is_none());
    assert!(matches!(logger.save_log(), Err(crate::error::LoggerError::NotRunning)));
}

#[test]
fn test_logging_jobs_run_on_logger_thread() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = Arc::new(FileLogger::new(&jobs, logger_config(dir.path(), "jobs")).unwrap());

    let thread_name = Arc::new(Mutex::new(None));
    let name = thread_name.clone();
    let in_job = logger.clone();
    let job = jobs
        .create(JobType::Logging, move || {
            *name.lock().unwrap() = thread::current().name().map(str::to_string);
            in_job.log_line("from a logging job");
            // flushing from the worker itself must not deadlock
            in_job.flush();
            Ok(())
        })
        .unwrap();
    jobs.dispatch(&job).unwrap();
    assert_eq!(job.wait_timeout(Duration::from_secs(5)), Some(Ok(())));

    assert_eq!(thread_name.lock().unwrap().as_deref(), Some("ember-file-logger"));
    assert_eq!(fs::read_to_string(logger.path()).unwrap(), "from a logging job\n");
}

#[test]
fn test_logging_jobs_not_starved_by_lines() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let config = FileLoggerConfig {
        max_lines_per_cycle: 8,
        ..logger_config(dir.path(), "busy")
    };
    let logger = FileLogger::new(&jobs, config).unwrap();

    for i in 0..20_000 {
        logger.log_line(format!("line {i}"));
    }
    let job = jobs.create(JobType::Logging, || Ok(())).unwrap();
    jobs.dispatch(&job).unwrap();
    assert_eq!(job.wait_timeout(Duration::from_secs(10)), Some(Ok(())));
    logger.flush();
    assert_eq!(logger.lines_written(), 20_000);
}

#[test]
fn test_writer_turns_bytes_into_lines() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = job_system();
    let logger = FileLogger::new(&jobs, logger_config(dir.path(), "pipe")).unwrap();

    let mut writer = logger.writer();
    writer.write_all(b"first li").unwrap();
    writer.write_all(b"ne\nsecond line\nthi").unwrap();
    logger.flush();
    assert_eq!(fs::read_to_string(logger.path()).unwrap(), "first line\nsecond line\n");

    writer.flush().unwrap();
    logger.flush();
    assert_eq!(
        fs::read_to_string(logger.path()).unwrap(),
        "first line\nsecond line\nthi"
    );
}

#[test]
fn test_unwritable_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file in the way").unwrap();

    let jobs = job_system();
    let result = FileLogger::new(&jobs, logger_config(&blocker, "nope"));
    assert!(matches!(result, Err(crate::error::LoggerError::Io { .. })));
}
