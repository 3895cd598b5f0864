// SPDX-License-Identifier: MIT

pub mod logger;
pub mod rotation;
pub mod time_utils;
pub mod writer;

pub use logger::{FileLogger, TAG_ERROR, TAG_PRINT, TAG_WARNING};
pub use time_utils::{CompiledTimestamp, TimestampFormat};
pub use writer::FileLogWriter;

#[cfg(test)]
mod tests;
