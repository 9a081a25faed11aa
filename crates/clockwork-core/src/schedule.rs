//! Schedule strings and next-fire computation.
//!
//! A schedule is `R<count>/<start-rfc3339>/<iso-duration>` (count 0 or
//! absent means unbounded), or the empty string for a job that fires only on
//! parent success. `R1` schedules are one-shots; their duration is ignored.

use chrono::{DateTime, Days, Months, Utc};

use crate::error::Error;

/// ISO-8601 duration subset: `P[nY][nM][nD][T[nH][nM][nS]]` with
/// non-negative integer components. Fractions and week designators are
/// rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoDuration {
    pub years: u32,
    pub months: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl IsoDuration {
    /// Parse an ISO-8601 duration string.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let bad = |msg: &str| Error::BadSchedule(format!("{msg}: {input:?}"));

        let rest = input
            .strip_prefix('P')
            .ok_or_else(|| bad("duration must start with P"))?;
        if rest.is_empty() {
            return Err(bad("empty duration"));
        }

        let mut out = IsoDuration::default();
        let mut in_time = false;
        let mut seen_any = false;
        // Designator order indices: date Y=0 M=1 D=2, time H=0 M=1 S=2.
        let mut last_rank: i32 = -1;
        let mut digits = String::new();

        for ch in rest.chars() {
            match ch {
                '0'..='9' => digits.push(ch),
                'T' => {
                    if in_time || !digits.is_empty() {
                        return Err(bad("misplaced T designator"));
                    }
                    in_time = true;
                    last_rank = -1;
                }
                '.' | ',' => return Err(bad("fractional components are not supported")),
                'Y' | 'M' | 'D' | 'H' | 'S' => {
                    if digits.is_empty() {
                        return Err(bad("designator without a value"));
                    }
                    let value: u32 = digits
                        .parse()
                        .map_err(|_| bad("component out of range"))?;
                    digits.clear();

                    let rank = match (in_time, ch) {
                        (false, 'Y') => 0,
                        (false, 'M') => 1,
                        (false, 'D') => 2,
                        (true, 'H') => 0,
                        (true, 'M') => 1,
                        (true, 'S') => 2,
                        _ => return Err(bad("designator not valid in this position")),
                    };
                    if rank <= last_rank {
                        return Err(bad("designators out of order"));
                    }
                    last_rank = rank;
                    seen_any = true;

                    match (in_time, ch) {
                        (false, 'Y') => out.years = value,
                        (false, 'M') => out.months = value,
                        (false, 'D') => out.days = value,
                        (true, 'H') => out.hours = value,
                        (true, 'M') => out.minutes = value,
                        (true, 'S') => out.seconds = value,
                        _ => unreachable!(),
                    }
                }
                _ => return Err(bad("unexpected character")),
            }
        }

        if !digits.is_empty() {
            return Err(bad("trailing digits without a designator"));
        }
        if !seen_any {
            return Err(bad("duration has no components"));
        }
        Ok(out)
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }

    /// True when the duration has no calendar (year/month) components and can
    /// be treated as a fixed number of seconds.
    pub fn is_fixed(&self) -> bool {
        self.years == 0 && self.months == 0
    }

    /// Fixed-length part as whole seconds (days count as 24h in UTC).
    pub fn fixed_seconds(&self) -> i64 {
        self.days as i64 * 86_400
            + self.hours as i64 * 3_600
            + self.minutes as i64 * 60
            + self.seconds as i64
    }

    /// Add this duration to `t`, calendar components first.
    pub fn add_to(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let months = self.years * 12 + self.months;
        let mut out = t;
        if months > 0 {
            out = out
                .checked_add_months(Months::new(months))
                .unwrap_or(out);
        }
        if self.days > 0 {
            out = out.checked_add_days(Days::new(self.days as u64)).unwrap_or(out);
        }
        out + chrono::Duration::seconds(
            self.hours as i64 * 3_600 + self.minutes as i64 * 60 + self.seconds as i64,
        )
    }

    /// Best-effort std duration for sleep purposes, approximating calendar
    /// components from `from`.
    pub fn sleep_duration(&self, from: DateTime<Utc>) -> std::time::Duration {
        let until = self.add_to(from);
        (until - from).to_std().unwrap_or_default()
    }
}

/// A parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// No timer; fires once per parent-success event.
    Dependent,
    /// `t0, t0 + D, t0 + 2D, …`, at most `count` fires (0 = unbounded).
    Repeating {
        count: u32,
        start: DateTime<Utc>,
        period: IsoDuration,
    },
}

impl Schedule {
    /// Parse a schedule string. The empty string is the dependent form.
    pub fn parse(input: &str) -> Result<Self, Error> {
        if input.is_empty() {
            return Ok(Schedule::Dependent);
        }
        let bad = |msg: &str| Error::BadSchedule(format!("{msg}: {input:?}"));

        let mut parts = input.splitn(3, '/');
        let head = parts.next().unwrap_or_default();
        let start_raw = parts.next().ok_or_else(|| bad("missing start time"))?;
        let period_raw = parts.next().ok_or_else(|| bad("missing duration"))?;

        let count_raw = head
            .strip_prefix('R')
            .ok_or_else(|| bad("schedule must start with R"))?;
        let count: u32 = if count_raw.is_empty() {
            0
        } else {
            count_raw.parse().map_err(|_| bad("invalid repeat count"))?
        };

        let start = DateTime::parse_from_rfc3339(start_raw)
            .map_err(|_| bad("invalid start time"))?
            .with_timezone(&Utc);

        let period = IsoDuration::parse(period_raw)?;
        if period.is_zero() && count != 1 {
            return Err(bad("repeating schedule needs a non-zero period"));
        }

        Ok(Schedule::Repeating {
            count,
            start,
            period,
        })
    }

    /// Fires left when the schedule is first armed; `None` = unbounded.
    pub fn initial_remaining(&self) -> Option<u32> {
        match self {
            Schedule::Dependent => None,
            Schedule::Repeating { count, .. } => (*count > 0).then_some(*count),
        }
    }

    /// Wall time of the next fire, given `remaining` fires left.
    ///
    /// Missed fires of a repeating schedule are skipped without consuming
    /// the remaining count; a one-shot (count 1) past its start fires
    /// immediately. Returns `None` when exhausted or dependent.
    pub fn next_run(&self, now: DateTime<Utc>, remaining: Option<u32>) -> Option<DateTime<Utc>> {
        let Schedule::Repeating {
            count,
            start,
            period,
        } = self
        else {
            return None;
        };
        if remaining == Some(0) {
            return None;
        }

        if *count == 1 {
            return Some(if *start <= now { now } else { *start });
        }
        if *start >= now {
            return Some(*start);
        }

        if period.is_fixed() {
            let step = period.fixed_seconds();
            debug_assert!(step > 0);
            let elapsed = (now - *start).num_seconds();
            let mut k = elapsed / step;
            if *start + chrono::Duration::seconds(k * step) < now {
                k += 1;
            }
            Some(*start + chrono::Duration::seconds(k * step))
        } else {
            // Calendar periods advance by repeated addition; every step is at
            // least a month so this terminates quickly.
            let mut t = *start;
            while t < now {
                let next = period.add_to(t);
                if next <= t {
                    return None;
                }
                t = next;
            }
            Some(t)
        }
    }
}
