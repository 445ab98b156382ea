//! Rate Gate - Decides whether one more message may be sent right now
//!
//! The gate is pure: callers pass the current time, the number of successful
//! sends in the current local day and the time of the run's last successful
//! send. Checks are applied in order: configured windows, daily quota, send
//! window, minimum spacing.

use cadence_common::settings::{DayMinute, SendSettings, WeeklyWindows};
use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// How far ahead to look for an open window
const HORIZON_DAYS: u64 = 8;

/// Spacing beyond a year is treated as a year
const MAX_DELAY_SECONDS: u64 = 366 * 24 * 3600;

/// Longest DST gap we step across when a window bound falls inside one
const MAX_GAP_MINUTES: i64 = 180;

/// Why the gate is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    QuotaExhausted,
    OutsideWindow,
    Throttled,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::QuotaExhausted => "quota_exhausted",
            BlockReason::OutsideWindow => "outside_window",
            BlockReason::Throttled => "throttled",
        }
    }
}

/// Gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// Closed until `until`, which is the earliest instant worth retrying
    Blocked {
        until: DateTime<Utc>,
        reason: BlockReason,
    },
    /// No day has a send window; sending can never proceed
    NoWindowConfigured,
}

/// Evaluates quota, windows and spacing for one send
#[derive(Debug, Clone)]
pub struct RateGate {
    daily_quota: u32,
    min_delay: Duration,
    windows: WeeklyWindows,
    tz: Tz,
}

impl RateGate {
    pub fn new(settings: &SendSettings) -> Self {
        Self {
            daily_quota: settings.daily_quota,
            min_delay: Duration::seconds(settings.min_delay_seconds.min(MAX_DELAY_SECONDS) as i64),
            windows: settings.windows.clone(),
            tz: settings.time_zone,
        }
    }

    pub fn daily_quota(&self) -> u32 {
        self.daily_quota
    }

    /// Decide for a send at `now`
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        sent_today: u64,
        last_sent_at: Option<DateTime<Utc>>,
    ) -> GateDecision {
        if self.windows.is_empty() {
            return GateDecision::NoWindowConfigured;
        }

        if sent_today >= u64::from(self.daily_quota) {
            let tomorrow = self.day_bounds(now).map(|(_, end)| end);
            return match tomorrow.and_then(|t| self.next_window_start(t)) {
                Some(until) => GateDecision::Blocked {
                    until,
                    reason: BlockReason::QuotaExhausted,
                },
                None => GateDecision::NoWindowConfigured,
            };
        }

        match self.next_window_start(now) {
            Some(start) if start == now => {}
            Some(until) => {
                return GateDecision::Blocked {
                    until,
                    reason: BlockReason::OutsideWindow,
                }
            }
            None => return GateDecision::NoWindowConfigured,
        }

        if let Some(last) = last_sent_at {
            let ready_at = last + self.min_delay;
            if ready_at > now {
                return GateDecision::Blocked {
                    until: ready_at,
                    reason: BlockReason::Throttled,
                };
            }
        }

        GateDecision::Allowed
    }

    /// Start and end of the local calendar day containing `now`
    pub fn day_bounds(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let today = now.with_timezone(&self.tz).date_naive();
        let tomorrow = today.checked_add_days(Days::new(1))?;
        Some((
            self.resolve(today, DayMinute::MIDNIGHT)?,
            self.resolve(tomorrow, DayMinute::MIDNIGHT)?,
        ))
    }

    /// Earliest instant at or after `after` that lies inside a send window
    pub fn next_window_start(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first_day = after.with_timezone(&self.tz).date_naive();

        for offset in 0..HORIZON_DAYS {
            let date = first_day.checked_add_days(Days::new(offset))?;
            for window in self.windows.for_day(date.weekday()) {
                let (Some(start), Some(end)) =
                    (self.resolve(date, window.start), self.resolve(date, window.end))
                else {
                    continue;
                };
                if end <= after || end <= start {
                    continue;
                }
                return Some(start.max(after));
            }
        }

        None
    }

    /// Map a local wall-clock time to an instant
    ///
    /// `24:00` is midnight of the following day. Ambiguous times take the
    /// earlier instant; times inside a DST gap move forward to the first
    /// valid minute.
    fn resolve(&self, date: NaiveDate, at: DayMinute) -> Option<DateTime<Utc>> {
        let (date, minutes) = if at == DayMinute::END_OF_DAY {
            (date.checked_add_days(Days::new(1))?, 0)
        } else {
            (date, at.minutes())
        };
        let naive = date.and_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)?;

        for step in 0..=MAX_GAP_MINUTES {
            match self.tz.from_local_datetime(&(naive + Duration::minutes(step))) {
                LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
                LocalResult::None => continue,
            }
        }
        None
    }
}
