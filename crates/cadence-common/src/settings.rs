//! Sending settings
//!
//! The daily quota, spacing, weekly send windows and content defaults that
//! govern every campaign. Window bounds are wall-clock times in the
//! operator's time zone.

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Minutes per day; also the largest valid window end (`24:00`)
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A wall-clock time of day expressed as minutes since midnight
///
/// Valid values are `00:00` through `24:00`. The latter is only meaningful as
/// the exclusive end of a window that runs until midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayMinute(u16);

impl DayMinute {
    pub const MIDNIGHT: DayMinute = DayMinute(0);
    pub const END_OF_DAY: DayMinute = DayMinute(MINUTES_PER_DAY);

    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        (total <= MINUTES_PER_DAY).then_some(Self(total))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Seconds since midnight
    pub fn seconds(self) -> u32 {
        u32::from(self.0) * 60
    }
}

impl fmt::Display for DayMinute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for DayMinute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid time of day '{}', expected HH:MM", s));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        if minute.len() != 2 || hour.is_empty() || hour.len() > 2 {
            return Err(invalid());
        }
        let hour: u16 = hour.parse().map_err(|_| invalid())?;
        let minute: u16 = minute.parse().map_err(|_| invalid())?;
        DayMinute::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for DayMinute {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayMinute {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open `[start, end)` interval of a single day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DayMinute,
    pub end: DayMinute,
}

impl TimeWindow {
    pub fn new(start: DayMinute, end: DayMinute) -> Self {
        Self { start, end }
    }

    /// Whole-day window `[00:00, 24:00)`
    pub fn all_day() -> Self {
        Self::new(DayMinute::MIDNIGHT, DayMinute::END_OF_DAY)
    }

    pub fn contains_second(&self, second_of_day: u32) -> bool {
        second_of_day >= self.start.seconds() && second_of_day < self.end.seconds()
    }
}

/// Send windows keyed by weekday
///
/// A day with no windows is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyWindows {
    #[serde(default)]
    pub mon: Vec<TimeWindow>,
    #[serde(default)]
    pub tue: Vec<TimeWindow>,
    #[serde(default)]
    pub wed: Vec<TimeWindow>,
    #[serde(default)]
    pub thu: Vec<TimeWindow>,
    #[serde(default)]
    pub fri: Vec<TimeWindow>,
    #[serde(default)]
    pub sat: Vec<TimeWindow>,
    #[serde(default)]
    pub sun: Vec<TimeWindow>,
}

impl WeeklyWindows {
    /// Every day open around the clock
    pub fn always_open() -> Self {
        let day = vec![TimeWindow::all_day()];
        Self {
            mon: day.clone(),
            tue: day.clone(),
            wed: day.clone(),
            thu: day.clone(),
            fri: day.clone(),
            sat: day.clone(),
            sun: day,
        }
    }

    pub fn for_day(&self, day: Weekday) -> &[TimeWindow] {
        match day {
            Weekday::Mon => &self.mon,
            Weekday::Tue => &self.tue,
            Weekday::Wed => &self.wed,
            Weekday::Thu => &self.thu,
            Weekday::Fri => &self.fri,
            Weekday::Sat => &self.sat,
            Weekday::Sun => &self.sun,
        }
    }

    pub fn with_day(mut self, day: Weekday, windows: Vec<TimeWindow>) -> Self {
        let slot = match day {
            Weekday::Mon => &mut self.mon,
            Weekday::Tue => &mut self.tue,
            Weekday::Wed => &mut self.wed,
            Weekday::Thu => &mut self.thu,
            Weekday::Fri => &mut self.fri,
            Weekday::Sat => &mut self.sat,
            Weekday::Sun => &mut self.sun,
        };
        *slot = windows;
        self
    }

    /// True when no day has any window
    pub fn is_empty(&self) -> bool {
        [
            &self.mon, &self.tue, &self.wed, &self.thu, &self.fri, &self.sat, &self.sun,
        ]
        .iter()
        .all(|d| d.is_empty())
    }

    /// Windows must be non-empty intervals, ordered and non-overlapping
    pub fn validate(&self) -> Result<()> {
        for day in [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ] {
            let windows = self.for_day(day);
            for window in windows {
                if window.start >= window.end {
                    return Err(Error::Validation(format!(
                        "{}: window {}-{} is empty",
                        day, window.start, window.end
                    )));
                }
            }
            for pair in windows.windows(2) {
                if pair[1].start < pair[0].end {
                    return Err(Error::Validation(format!(
                        "{}: windows {}-{} and {}-{} overlap or are out of order",
                        day, pair[0].start, pair[0].end, pair[1].start, pair[1].end
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Operator-wide send settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSettings {
    /// Maximum successful sends per calendar day in `time_zone`
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,

    /// Minimum spacing between two successful sends of the same run
    #[serde(default)]
    pub min_delay_seconds: u64,

    #[serde(default = "default_time_zone")]
    pub time_zone: Tz,

    #[serde(default = "WeeklyWindows::always_open")]
    pub windows: WeeklyWindows,

    /// Appended to every message unless the campaign overrides it
    #[serde(default)]
    pub default_signature: Option<String>,

    /// Address substrings that exclude a contact from snapshots
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,

    /// Exact addresses or `@domain` entries that bypass keyword exclusion
    #[serde(default)]
    pub allow_list: Vec<String>,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default)]
    pub from_name: Option<String>,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            daily_quota: default_daily_quota(),
            min_delay_seconds: 0,
            time_zone: default_time_zone(),
            windows: WeeklyWindows::always_open(),
            default_signature: None,
            exclusion_keywords: Vec::new(),
            allow_list: Vec::new(),
            from_address: default_from_address(),
            from_name: None,
        }
    }
}

fn default_daily_quota() -> u32 {
    500
}

fn default_time_zone() -> Tz {
    Tz::UTC
}

fn default_from_address() -> String {
    "noreply@localhost".to_string()
}

impl SendSettings {
    pub fn validate(&self) -> Result<()> {
        if self.from_address.trim().is_empty() {
            return Err(Error::Validation("from_address must not be empty".into()));
        }
        self.windows.validate()
    }

    /// Returns the first exclusion keyword the address contains
    pub fn exclusion_match(&self, address: &str) -> Option<&str> {
        let address = address.to_lowercase();
        self.exclusion_keywords
            .iter()
            .map(|k| k.trim())
            .find(|k| !k.is_empty() && address.contains(&k.to_lowercase()))
    }

    pub fn is_allow_listed(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        self.allow_list.iter().any(|entry| {
            let entry = entry.trim().to_lowercase();
            if entry.starts_with('@') {
                address.ends_with(&entry)
            } else {
                !entry.is_empty() && address == entry
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_day_minute_parse() {
        assert_eq!("09:30".parse::<DayMinute>().unwrap().minutes(), 570);
        assert_eq!("24:00".parse::<DayMinute>().unwrap(), DayMinute::END_OF_DAY);
        assert_eq!("9:05".parse::<DayMinute>().unwrap().to_string(), "09:05");
        assert!("24:01".parse::<DayMinute>().is_err());
        assert!("12:60".parse::<DayMinute>().is_err());
        assert!("noon".parse::<DayMinute>().is_err());
    }

    #[test]
    fn test_window_is_half_open() {
        let w = TimeWindow::new(DayMinute::new(9, 0).unwrap(), DayMinute::new(17, 0).unwrap());
        assert!(w.contains_second(9 * 3600));
        assert!(w.contains_second(17 * 3600 - 1));
        assert!(!w.contains_second(17 * 3600));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let nine = DayMinute::new(9, 0).unwrap();
        let noon = DayMinute::new(12, 0).unwrap();
        let eleven = DayMinute::new(11, 0).unwrap();
        let windows = WeeklyWindows::default().with_day(
            Weekday::Mon,
            vec![TimeWindow::new(nine, noon), TimeWindow::new(eleven, DayMinute::END_OF_DAY)],
        );
        assert!(windows.validate().is_err());

        let empty = WeeklyWindows::default().with_day(Weekday::Tue, vec![TimeWindow::new(noon, noon)]);
        assert!(empty.validate().is_err());

        assert!(WeeklyWindows::always_open().validate().is_ok());
    }

    #[test]
    fn test_parse_settings_toml() {
        let raw = r#"
daily_quota = 2
min_delay_seconds = 30
time_zone = "Europe/Berlin"
exclusion_keywords = ["noreply"]
allow_list = ["@partner.example"]

[windows]
mon = [{ start = "09:00", end = "17:00" }]
sat = []
"#;
        let settings: SendSettings = toml::from_str(raw).unwrap();
        assert_eq!(settings.daily_quota, 2);
        assert_eq!(settings.time_zone, chrono_tz::Europe::Berlin);
        assert_eq!(settings.windows.mon.len(), 1);
        assert!(settings.windows.sat.is_empty());
        assert!(settings.windows.sun.is_empty());
    }

    #[test]
    fn test_exclusion_and_allow_list() {
        let settings = SendSettings {
            exclusion_keywords: vec!["NoReply".into(), " ".into()],
            allow_list: vec!["@partner.example".into(), "boss@corp.example".into()],
            ..Default::default()
        };
        assert_eq!(settings.exclusion_match("noreply@shop.example"), Some("NoReply"));
        assert_eq!(settings.exclusion_match("alice@shop.example"), None);
        assert!(settings.is_allow_listed("noreply@partner.example"));
        assert!(settings.is_allow_listed("Boss@Corp.example"));
        assert!(!settings.is_allow_listed("noreply@shop.example"));
    }
}
