//! Cron schedule parsing and next-fire computation.
//!
//! Schedules use standard 5-field cron syntax (minute, hour, day-of-month,
//! month, day-of-week) evaluated in UTC, plus the `@hourly`, `@daily`,
//! `@weekly`, `@monthly` and `@yearly` shortcut strings. Second resolution
//! is not supported.

use chrono::{DateTime, Utc};
use cron::Schedule;
use snafu::prelude::*;
use std::str::FromStr;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid cron expression '{expression}': {source}"))]
    Parse {
        expression: String,
        source: cron::error::Error,
    },

    #[snafu(display(
        "Invalid cron expression '{expression}': expected 5 fields, got {fields}"
    ))]
    FieldCount { expression: String, fields: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A parsed cron schedule, keeping the source expression for display.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    inner: Schedule,
}

impl CronSchedule {
    /// Parse a 5-field cron expression or an `@` shortcut string.
    ///
    /// The underlying parser wants a seconds field, so 5-field input is
    /// normalized by pinning seconds to zero.
    ///
    /// # Errors
    /// Returns an error if the expression has the wrong number of fields
    /// or fails to parse.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();

        let normalized = if trimmed.starts_with('@') {
            trimmed.to_string()
        } else {
            let fields = trimmed.split_whitespace().count();
            ensure!(
                fields == 5,
                FieldCountSnafu {
                    expression: trimmed,
                    fields,
                }
            );
            format!("0 {trimmed}")
        };

        let inner = Schedule::from_str(&normalized).context(ParseSnafu {
            expression: trimmed,
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            inner,
        })
    }

    /// The source expression as written in the definition file.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first fire instant strictly after `anchor`.
    ///
    /// Anchoring at the previous next-fire instant (rather than the
    /// current wall clock) preserves cadence across slow firings without
    /// backfilling missed cycles.
    #[must_use]
    pub fn next_after(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&anchor).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_five_field_expression() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "*/5 * * * *");
    }

    #[test]
    fn parses_shortcut_strings() {
        for shortcut in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
            CronSchedule::parse(shortcut).unwrap();
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = CronSchedule::parse("* * * *").unwrap_err();
        assert!(matches!(err, Error::FieldCount { fields: 4, .. }));

        let err = CronSchedule::parse("* * * * * *").unwrap_err();
        assert!(matches!(err, Error::FieldCount { fields: 6, .. }));
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronSchedule::parse("not a cron").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
    }

    #[test]
    fn next_after_is_strictly_later() {
        let schedule = CronSchedule::parse("*/1 * * * *").unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(anchor).unwrap();
        assert!(next > anchor);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn every_minute_steps_by_one_minute() {
        // One fire per wall-clock minute across a 10-minute window.
        let schedule = CronSchedule::parse("*/1 * * * *").unwrap();
        let mut anchor = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        for _ in 0..10 {
            let next = schedule.next_after(anchor).unwrap();
            assert_eq!(next - anchor, chrono::Duration::minutes(1));
            anchor = next;
        }
    }

    #[test]
    fn hourly_fires_on_the_hour() {
        let schedule = CronSchedule::parse("@hourly").unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let next = schedule.next_after(anchor).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap());
    }
}
