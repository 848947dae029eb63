use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Evaluates five-field cron expressions in one fixed timezone.
///
/// Expressions use the classic crontab layout
/// (`minute hour day-of-month month day-of-week`, Sunday = 0 or 7) plus the
/// `@hourly`/`@daily`/... shorthands. Results are returned in UTC.
#[derive(Debug, Clone, Copy)]
pub struct CronEvaluator {
    tz: Tz,
}

impl CronEvaluator {
    /// Build an evaluator from an IANA zone name such as `Asia/Almaty`.
    pub fn from_name(name: &str) -> Result<Self> {
        let tz = name
            .parse::<Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))?;
        Ok(Self { tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First trigger strictly after `after`.
    pub fn next_trigger(&self, expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        parse(expression)?
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .min()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| malformed(expression, "expression never fires"))
    }

    /// Check that `expression` parses; used before anything is persisted.
    pub fn validate(&self, expression: &str) -> Result<()> {
        parse(expression).map(|_| ())
    }
}

/// One schedule per seconds-first form; see [`to_seconds_forms`].
fn parse(expression: &str) -> Result<Vec<::cron::Schedule>> {
    to_seconds_forms(expression)?
        .iter()
        .map(|form| {
            ::cron::Schedule::from_str(form).map_err(|e| malformed(expression, &e.to_string()))
        })
        .collect()
}

fn malformed(expression: &str, reason: &str) -> SchedulerError {
    SchedulerError::MalformedSchedule {
        expression: expression.to_string(),
        reason: reason.to_string(),
    }
}

/// Rewrite a crontab expression into the `cron` crate's seconds-first form.
///
/// The crate numbers weekdays 1-7 from Sunday, crontab 0-7 (both 0 and 7
/// are Sunday), so numeric weekdays are spelled out as names.
///
/// When both day-of-month and day-of-week are restricted, crontab fires on
/// either match while the crate requires both. Such expressions are split
/// into a day-of-month form and a day-of-week form; the earlier trigger wins.
fn to_seconds_forms(expression: &str) -> Result<Vec<String>> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(vec![trimmed.to_string()]);
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(malformed(
            expression,
            &format!("expected 5 fields, found {}", fields.len()),
        ));
    }
    let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
    let dow = weekday_field(fields[4]).map_err(|reason| malformed(expression, &reason))?;

    let form = |dom: &str, dow: &str| format!("0 {minute} {hour} {dom} {month} {dow}");
    if is_unrestricted(dom) || is_unrestricted(&dow) {
        return Ok(vec![form(dom, &dow)]);
    }
    Ok(vec![form(dom, "*"), form("*", &dow)])
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

fn weekday_field(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: usize = s.parse().map_err(|_| format!("bad step '{s}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (weekday(a)?, weekday(b)?)
        } else {
            let d = weekday(range)?;
            // `3/2` means "from Wednesday every other day".
            (d, if step > 1 { 6 } else { d })
        };
        if lo > hi {
            return Err(format!("descending weekday range '{range}'"));
        }
        for d in (lo..=hi).step_by(step) {
            days[d % 7] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(d, _)| DAY_NAMES[d])
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday(token: &str) -> std::result::Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("weekday {n} out of range 0-7"))
        };
    }
    let upper = token.to_ascii_uppercase();
    DAY_NAMES
        .iter()
        .position(|name| upper.starts_with(name))
        .ok_or_else(|| format!("unknown weekday '{token}'"))
}
