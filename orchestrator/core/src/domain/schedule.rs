// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Schedules
//!
//! Next-fire computation for the three trigger kinds a [`Job`](crate::domain::job::Job)
//! can carry. All arithmetic is done in UTC.
//!
//! Cron expressions accept the usual five-field crontab form
//! (`min hour dom month dow`); a seconds column is prepended internally and
//! numeric weekdays (0-7, Sunday as 0 or 7) are rewritten to day names, since
//! the `cron` crate counts Sunday as 1. Six and seven field forms (seconds,
//! optional year) pass through unchanged and use the crate's numbering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Cron expression '{0}' has no future occurrence")]
    NoFutureOccurrence(String),

    #[error("Schedule kind '{kind}' requires {parameter}")]
    MissingParameter {
        kind: ScheduleKind,
        parameter: &'static str,
    },

    #[error("Interval must be at least one second")]
    InvalidInterval,

    #[error("Unknown schedule kind '{0}'")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Once,
    Interval,
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Once => "once",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(ScheduleKind::Once),
            "interval" => Ok(ScheduleKind::Interval),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(ScheduleError::UnknownKind(other.to_string())),
        }
    }
}

/// A validated trigger policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    Once { run_at: DateTime<Utc> },
    Interval { seconds: u64 },
    Cron { expression: String },
}

impl Schedule {
    /// Build a schedule from loose API input. `run_at` is optional for `once`
    /// and falls back to `now + once_default_delay`.
    pub fn from_parts(
        kind: ScheduleKind,
        run_at: Option<DateTime<Utc>>,
        interval_seconds: Option<u64>,
        cron_expression: Option<&str>,
        now: DateTime<Utc>,
        once_default_delay: Duration,
    ) -> Result<Self, ScheduleError> {
        let schedule = match kind {
            ScheduleKind::Once => Schedule::Once {
                run_at: run_at.unwrap_or(now + once_default_delay),
            },
            ScheduleKind::Interval => Schedule::Interval {
                seconds: interval_seconds.ok_or(ScheduleError::MissingParameter {
                    kind,
                    parameter: "interval_seconds",
                })?,
            },
            ScheduleKind::Cron => Schedule::Cron {
                expression: cron_expression
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or(ScheduleError::MissingParameter {
                        kind,
                        parameter: "cron_expression",
                    })?
                    .to_string(),
            },
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            Schedule::Once { .. } => ScheduleKind::Once,
            Schedule::Interval { .. } => ScheduleKind::Interval,
            Schedule::Cron { .. } => ScheduleKind::Cron,
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Once { .. } => Ok(()),
            Schedule::Interval { seconds } if *seconds == 0 => Err(ScheduleError::InvalidInterval),
            Schedule::Interval { .. } => Ok(()),
            Schedule::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    pub fn interval_seconds(&self) -> Option<u64> {
        match self {
            Schedule::Interval { seconds } => Some(*seconds),
            _ => None,
        }
    }

    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Schedule::Cron { expression } => Some(expression),
            _ => None,
        }
    }

    pub fn run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once { run_at } => Some(*run_at),
            _ => None,
        }
    }

    /// Fire time for a freshly created or edited job.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            Schedule::Once { run_at } => Ok(*run_at),
            _ => self.next_after(now).map(|next| next.unwrap_or(now)),
        }
    }

    /// Next fire strictly after `now`. `None` for `once`, which never recurs.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Once { .. } => Ok(None),
            Schedule::Interval { seconds } => {
                let step = i64::try_from(*seconds).map_err(|_| ScheduleError::InvalidInterval)?;
                Ok(Some(now + Duration::seconds(step)))
            }
            Schedule::Cron { expression } => next_cron_fire(expression, now).map(Some),
        }
    }
}

/// Pad five-field crontab syntax to the seconds-first form the `cron` crate
/// expects.
pub fn normalize_cron(expression: &str) -> Result<String, ScheduleError> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week =
                crontab_day_of_week(fields[4]).map_err(|reason| ScheduleError::InvalidCron {
                    expression: expression.to_string(),
                    reason,
                })?;
            Ok(format!("0 {} {day_of_week}", fields[..4].join(" ")))
        }
        6 | 7 => Ok(expression.to_string()),
        count => Err(ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, got {count}"),
        }),
    }
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a crontab day-of-week field to day names. Items that already use
/// names, and the bare `*`/`?` wildcards, are kept as written.
fn crontab_day_of_week(field: &str) -> Result<String, String> {
    let mut days: Vec<String> = Vec::new();
    for item in field.split(',') {
        if item == "*" || item == "?" || item.chars().any(|c| c.is_ascii_alphabetic()) {
            days.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid step in day-of-week '{item}'"))?;
                (range, Some(step))
            }
            None => (item, None),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((a, b)) => (day_number(a)?, day_number(b)?),
            // `n/step` runs from n to the end of the week.
            None if step.is_some() => (day_number(range)?, 6),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{range}' runs backwards"));
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            let name = DAY_NAMES[day % 7].to_string();
            if !days.contains(&name) {
                days.push(name);
            }
        }
    }
    Ok(days.join(","))
}

fn day_number(value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("invalid day of week '{value}'"))
}

pub fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    let normalized = normalize_cron(expression)?;
    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn next_cron_fire(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    parse_cron(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::NoFutureOccurrence(expression.to_string()))
}

/// What to do with a fire whose scheduled instant is already behind us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireDecision {
    Fire,
    Skip { late_by: Duration },
}

/// Grace window for late fires. A fire up to `grace` late still runs; anything
/// later is skipped and the schedule moves on to its next occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MisfirePolicy {
    pub grace: Duration,
}

impl MisfirePolicy {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn evaluate(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> MisfireDecision {
        let late_by = now - scheduled;
        if late_by > self.grace {
            MisfireDecision::Skip { late_by }
        } else {
            MisfireDecision::Fire
        }
    }
}

impl Default for MisfirePolicy {
    fn default() -> Self {
        Self::new(Duration::seconds(300))
    }
}
