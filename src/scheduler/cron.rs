//! Five-field cron grammar and next-fire computation (§6).
//!
//! Hand-rolled: `iteration348_job_scheduler.py::_create_schedule` never
//! implements real cron math (it adds a random offset), so there is nothing
//! to port here — only the five-field shape (minute hour dom month dow) is
//! grounded in the wider corpus's job-scheduler data model. Fields support
//! `*`, lists (`1,2,3`), ranges (`1-5`), and steps (`*/2`, `1-10/2`). `L` on
//! the day-of-month field means "last day of the month", the one modifier
//! SPEC_FULL.md calls out as worth keeping; `W` is not implemented.
//!
//! dom/dow combination follows POSIX cron: if both fields are restricted
//! (neither is `*`), a candidate day matches if it satisfies *either* field;
//! if exactly one is restricted, only that field's constraint applies.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 whitespace-separated fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid field {field:?} in position {position}")]
    InvalidField { field: String, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Last,
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Last => false, // resolved specially by the caller
            Field::Values(v) => v.contains(&value),
        }
    }

    fn is_restricted(&self) -> bool {
        !matches!(self, Field::Any)
    }
}

fn parse_field(raw: &str, min: u32, max: u32, position: usize) -> Result<Field, CronError> {
    if raw == "*" {
        return Ok(Field::Any);
    }
    if raw == "L" {
        return Ok(Field::Last);
    }

    let mut values = Vec::new();
    for part in raw.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (
                r,
                s.parse::<u32>()
                    .map_err(|_| invalid(raw, position))?,
            ),
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid(raw, position))?;
            let b: u32 = b.parse().map_err(|_| invalid(raw, position))?;
            (a, b)
        } else {
            let v: u32 = range_part.parse().map_err(|_| invalid(raw, position))?;
            (v, v)
        };

        if lo > hi || hi > max || lo < min || step == 0 {
            return Err(invalid(raw, position));
        }

        let mut v = lo;
        while v <= hi {
            values.push(v);
            v += step;
        }
    }

    if values.is_empty() {
        return Err(invalid(raw, position));
    }
    Ok(Field::Values(values))
}

fn invalid(raw: &str, position: usize) -> CronError {
    CronError::InvalidField {
        field: raw.to_string(),
        position,
    }
}

/// A parsed five-field cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
    source: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::WrongFieldCount(fields.len()));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, 0)?,
            hour: parse_field(fields[1], 0, 23, 1)?,
            day_of_month: parse_field(fields[2], 1, 31, 2)?,
            month: parse_field(fields[3], 1, 12, 3)?,
            day_of_week: parse_field(fields[4], 0, 6, 4)?,
            source: expr.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, date: DateTime<Utc>) -> bool {
        let dom_restricted = self.day_of_month.is_restricted();
        let dow_restricted = self.day_of_week.is_restricted();

        let dom_matches = match &self.day_of_month {
            Field::Last => is_last_day_of_month(date),
            other => other.matches(date.day()),
        };
        // chrono: Monday=0 in `weekday().num_days_from_monday()`; cron
        // convention uses Sunday=0..Saturday=6.
        let dow_value = date.weekday().num_days_from_sunday();
        let dow_matches = self.day_of_week.matches(dow_value);

        match (dom_restricted, dow_restricted) {
            (true, true) => dom_matches || dow_matches,
            (true, false) => dom_matches,
            (false, true) => dow_matches,
            (false, false) => true,
        }
    }

    /// The next fire time strictly after `after`, at least one second in the
    /// future (§6: next-fire is always `>= now + 1s`).
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let floor = after + chrono::Duration::seconds(1);
        let mut candidate = Utc
            .with_ymd_and_hms(floor.year(), floor.month(), floor.day(), floor.hour(), floor.minute(), 0)
            .single()?
            + chrono::Duration::minutes(1);

        // Bounded search: four years of minutes is well within reach for any
        // valid schedule and guards against an unsatisfiable field set.
        let limit = candidate + chrono::Duration::days(4 * 365);

        while candidate < limit {
            if self.month.matches(candidate.month())
                && self.day_matches(candidate)
                && self.hour.matches(candidate.hour())
                && self.minute.matches(candidate.minute())
            {
                return Some(candidate);
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

fn is_last_day_of_month(date: DateTime<Utc>) -> bool {
    let next_day = date + chrono::Duration::days(1);
    next_day.month() != date.month()
}
