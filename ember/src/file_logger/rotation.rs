// SPDX-License-Identifier: MIT

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};

fn is_log_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "log")
}

/// Deletes the oldest `.log` files in `dir` until at most `keep` remain.
/// `active` is never counted nor removed. Returns the removed paths.
///
/// Files that cannot be removed are reported and skipped.
pub fn prune_logs(dir: &Path, keep: usize, active: &Path) -> io::Result<Vec<PathBuf>> {
    let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path == active || !is_log_file(&path) {
            continue;
        }
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        logs.push((modified, path));
    }

    // newest first; name breaks ties so the result is deterministic
    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = Vec::new();
    for (_, path) in logs.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed old log {}", path.display());
                removed.push(path);
            }
            Err(err) => warn!("could not remove old log {}: {err}", path.display()),
        }
    }
    Ok(removed)
}

/// `<dir>/<stem>_<stamp>.log` next to the active log.
pub fn timestamped_copy_path(active: &Path, stamp: &str) -> PathBuf {
    let stem = active
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    active.with_file_name(format!("{stem}_{stamp}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for (i, age) in [500, 400, 300, 200, 100].iter().enumerate() {
            touch(&dir.path().join(format!("old{i}.log")), *age);
        }
        touch(&dir.path().join("notes.txt"), 1000);
        let active = dir.path().join("ember.log");
        touch(&active, 2000);

        let removed = prune_logs(dir.path(), 3, &active).unwrap();
        assert_eq!(removed.len(), 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["ember.log", "notes.txt", "old2.log", "old3.log", "old4.log"]);
    }

    #[test]
    fn test_copy_path() {
        let path = timestamped_copy_path(Path::new("Data/Logs/ember.log"), "2026-10-18_14-03-22-123");
        assert_eq!(path, PathBuf::from("Data/Logs/ember_2026-10-18_14-03-22-123.log"));
    }
}
