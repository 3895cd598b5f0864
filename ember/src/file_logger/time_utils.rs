// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use time::format_description::{self, OwnedFormatItem};
use time::OffsetDateTime;

use crate::error::ConfigError;

/// How a date-time stamp is rendered.
///
/// Two presets exist: [`TimestampFormat::line`] for the `[...]` prefix of log
/// lines and [`TimestampFormat::file_name`] for copies of the log, which must
/// not contain characters that are invalid in Windows file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampFormat {
    pub date_separator: char,
    pub date_time_separator: String,
    pub time_separator: char,
    pub twenty_four_hour: bool,
    pub milliseconds: bool,
    pub millisecond_separator: char,
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::line()
    }
}

impl TimestampFormat {
    /// `2026-10-18 14:03:22.123`
    pub fn line() -> Self {
        Self {
            date_separator: '-',
            date_time_separator: " ".to_string(),
            time_separator: ':',
            twenty_four_hour: true,
            milliseconds: true,
            millisecond_separator: '.',
        }
    }

    /// `2026-10-18_14-03-22-123`
    pub fn file_name() -> Self {
        Self {
            date_separator: '-',
            date_time_separator: "_".to_string(),
            time_separator: '-',
            twenty_four_hour: true,
            milliseconds: true,
            millisecond_separator: '-',
        }
    }

    /// The `time` format description these settings stand for, e.g.
    /// `[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]`.
    pub fn description(&self) -> String {
        let d = escape(&self.date_separator.to_string());
        let t = escape(&self.time_separator.to_string());
        let hour = if self.twenty_four_hour { "[hour]" } else { "[hour repr:12]" };
        let mut description = format!(
            "[year]{d}[month]{d}[day]{}{hour}{t}[minute]{t}[second]",
            escape(&self.date_time_separator)
        );
        if self.milliseconds {
            description.push_str(&escape(&self.millisecond_separator.to_string()));
            description.push_str("[subsecond digits:3]");
        }
        if !self.twenty_four_hour {
            description.push_str(" [period]");
        }
        description
    }

    pub fn compile(&self) -> Result<CompiledTimestamp, ConfigError> {
        format_description::parse_owned::<1>(&self.description())
            .map(CompiledTimestamp)
            .map_err(|err| ConfigError::Invalid(format!("invalid timestamp format: {err}")))
    }

    pub fn format(&self, at: OffsetDateTime) -> String {
        match self.compile() {
            Ok(compiled) => compiled.format(at),
            Err(_) => at.to_string(),
        }
    }

    pub fn now(&self) -> String {
        self.format(now())
    }
}

// `[` opens a component; a literal one is written twice
fn escape(literal: &str) -> String {
    literal.replace('[', "[[")
}

/// A [`TimestampFormat`] parsed once, for formatting many stamps.
#[derive(Debug, Clone)]
pub struct CompiledTimestamp(OwnedFormatItem);

impl CompiledTimestamp {
    pub fn format(&self, at: OffsetDateTime) -> String {
        // only fails for components the value lacks, which a full date-time never does
        at.format(&self.0).unwrap_or_else(|_| at.to_string())
    }

    pub fn now(&self) -> String {
        self.format(now())
    }
}

/// Local time if the offset can be determined, UTC otherwise.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Month};

    fn sample(hour: u8) -> OffsetDateTime {
        Date::from_calendar_date(2026, Month::October, 8)
            .unwrap()
            .with_hms_milli(hour, 3, 9, 45)
            .unwrap()
            .assume_utc()
    }

    #[test]
    fn test_line_format() {
        assert_eq!(TimestampFormat::line().format(sample(14)), "2026-10-08 14:03:09.045");
    }

    #[test]
    fn test_file_name_format_has_no_colons() {
        let stamp = TimestampFormat::file_name().format(sample(14));
        assert_eq!(stamp, "2026-10-08_14-03-09-045");
        assert!(!stamp.contains(':'));
    }

    #[test]
    fn test_twelve_hour_clock() {
        let format = TimestampFormat {
            twenty_four_hour: false,
            milliseconds: false,
            ..TimestampFormat::line()
        };
        assert_eq!(format.format(sample(0)), "2026-10-08 12:03:09 AM");
        assert_eq!(format.format(sample(12)), "2026-10-08 12:03:09 PM");
        assert_eq!(format.format(sample(23)), "2026-10-08 11:03:09 PM");
    }

    #[test]
    fn test_description_names_time_components() {
        assert_eq!(
            TimestampFormat::file_name().description(),
            "[year]-[month]-[day]_[hour]-[minute]-[second]-[subsecond digits:3]"
        );
    }

    #[test]
    fn test_bracket_separators_are_literal() {
        let format = TimestampFormat {
            date_separator: '[',
            date_time_separator: "][".to_string(),
            milliseconds: false,
            ..TimestampFormat::line()
        };
        let compiled = format.compile().unwrap();
        assert_eq!(compiled.format(sample(7)), "2026[10[08][07:03:09");
        assert_eq!(format.format(sample(7)), compiled.format(sample(7)));
    }
}
