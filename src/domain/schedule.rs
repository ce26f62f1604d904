//! Wall-clock schedules for the backfill job.
//!
//! Expression syntax is `HH:MM DAYS` (UTC), where `DAYS` is `*`, a single
//! day (`SUN`), a range (`MON-FRI`) or a comma separated list of either.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc, Weekday};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSchedule {
    pub name: String,
    pub time: NaiveTime,
    /// Indexed by `Weekday::num_days_from_monday`.
    days: [bool; 7],
    pub lookback_days: u64,
}

fn parse_day(token: &str) -> Result<Weekday, String> {
    token
        .trim()
        .parse::<Weekday>()
        .map_err(|_| format!("unknown day '{token}'"))
}

fn parse_days(spec: &str) -> Result<[bool; 7], String> {
    let mut days = [false; 7];
    if spec.trim() == "*" {
        return Ok([true; 7]);
    }
    for part in spec.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let (mut day, end) = (parse_day(start)?, parse_day(end)?);
                // Ranges may wrap past Sunday, e.g. FRI-MON.
                loop {
                    days[day.num_days_from_monday() as usize] = true;
                    if day == end {
                        break;
                    }
                    day = day.succ();
                }
            }
            None => days[parse_day(part)?.num_days_from_monday() as usize] = true,
        }
    }
    Ok(days)
}

impl BackfillSchedule {
    pub fn parse(name: &str, expr: &str, lookback_days: u64) -> Result<Self, String> {
        let (time, days) = expr
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("expected 'HH:MM DAYS', got '{expr}'"))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|e| format!("bad time '{time}': {e}"))?;
        let days = parse_days(days)?;
        Ok(Self {
            name: name.to_string(),
            time,
            days,
            lookback_days,
        })
    }

    pub fn runs_on(&self, day: Weekday) -> bool {
        self.days[day.num_days_from_monday() as usize]
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.date_naive();
        (0..=7)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .filter(|date| self.runs_on(date.weekday()))
            .map(|date| date.and_time(self.time).and_utc())
            .find(|at| *at > after)
    }

    /// Inclusive `[today - lookback, today]` date range.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = today
            .checked_sub_days(Days::new(self.lookback_days))
            .unwrap_or(NaiveDate::MIN);
        (from, today)
    }
}

impl fmt::Display for BackfillSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<String> = (0..7u8)
            .filter(|i| self.days[*i as usize])
            .filter_map(|i| Weekday::try_from(i).ok())
            .map(|d| d.to_string().to_uppercase())
            .collect();
        write!(
            f,
            "{} at {} on {} (lookback {}d)",
            self.name,
            self.time.format("%H:%M"),
            days.join(","),
            self.lookback_days
        )
    }
}
