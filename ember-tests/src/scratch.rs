// SPDX-License-Identifier: MIT

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ember::FileLoggerConfig;
use tempfile::TempDir;

/// Throwaway log directory, removed when dropped.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("ember-logs-").tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Logger configuration writing `<scratch>/<name>.log`.
    pub fn logger_config(&self, name: &str) -> FileLoggerConfig {
        FileLoggerConfig {
            name: name.to_string(),
            directory: self.path().to_path_buf(),
            ..FileLoggerConfig::default()
        }
    }

    /// Creates `old0.log` .. `old<count-1>.log`, each one a minute newer than the last.
    pub fn seed_logs(&self, count: usize) -> io::Result<Vec<PathBuf>> {
        let now = SystemTime::now();
        (0..count)
            .map(|i| {
                let path = self.path().join(format!("old{i}.log"));
                let file = File::create(&path)?;
                file.set_modified(now - Duration::from_secs(60 * (count - i) as u64))?;
                Ok(path)
            })
            .collect()
    }

    /// Sorted names of the `.log` files in the directory.
    pub fn log_files(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.path())? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".log") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.path().join(name))
    }
}
