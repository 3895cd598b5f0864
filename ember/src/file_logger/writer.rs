// SPDX-License-Identifier: MIT

use std::io::{self, Write};
use std::sync::Arc;

use crate::file_logger::logger::LoggerShared;

/// Byte sink that feeds a [`super::FileLogger`].
///
/// Complete lines are enqueued as soon as their newline arrives; a trailing
/// partial line is held back until it is completed or the writer is flushed.
/// Handing this to `env_logger::Target::Pipe` sends every `log` record of the
/// process into the log file.
pub struct FileLogWriter {
    shared: Arc<LoggerShared>,
    pending: Vec<u8>,
}

impl FileLogWriter {
    pub(crate) fn new(shared: Arc<LoggerShared>) -> Self {
        Self {
            shared,
            pending: Vec::new(),
        }
    }

    fn emit(&self, bytes: &[u8]) {
        self.shared.enqueue(String::from_utf8_lossy(bytes).into_owned());
    }
}

impl Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            for line in complete.split_inclusive(|&b| b == b'\n') {
                self.emit(line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let partial = std::mem::take(&mut self.pending);
            self.emit(&partial);
        }
        Ok(())
    }
}

impl Drop for FileLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
