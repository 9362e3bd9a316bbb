use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A Monday-to-Sunday ISO-8601 week. Deserializing reads only the year and
/// week number and derives the dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "IsoWeek")]
pub struct WeekPeriod {
    pub iso_year: i32,
    pub iso_week: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl WeekPeriod {
    pub fn from_iso(year: i32, week: u32) -> Result<Self> {
        let start_date = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .ok_or(Error::InvalidWeek { year, week })?;
        Ok(Self {
            iso_year: year,
            iso_week: week,
            start_date,
            end_date: start_date + Duration::days(6),
        })
    }

    /// The week that contains `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        let start_date = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        Self {
            iso_year: iso.year(),
            iso_week: iso.week(),
            start_date,
            end_date: start_date + Duration::days(6),
        }
    }

    /// Most recently completed week relative to `today`.
    pub fn last_completed(today: NaiveDate) -> Self {
        Self::containing(today - Duration::days(7))
    }

    /// Same week number one ISO year earlier. Week 53 clamps to the prior
    /// year's last week when that year only has 52.
    pub fn year_over_year(&self) -> Self {
        let year = self.iso_year - 1;
        let week = self.iso_week.min(weeks_in_year(year));
        let start_date = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .unwrap_or_else(|| self.start_date - Duration::weeks(52));
        Self {
            iso_year: year,
            iso_week: week,
            start_date,
            end_date: start_date + Duration::days(6),
        }
    }

    /// `YYYY-MM-DD`, the form export headers use for the week's first column.
    pub fn start_key(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    pub fn label(&self) -> String {
        format!(
            "{} to {}",
            self.start_date.format("%Y-%m-%d"),
            self.end_date.format("%Y-%m-%d")
        )
    }
}

#[derive(Deserialize)]
struct IsoWeek {
    iso_year: i32,
    iso_week: u32,
}

impl TryFrom<IsoWeek> for WeekPeriod {
    type Error = Error;

    fn try_from(week: IsoWeek) -> Result<Self> {
        Self::from_iso(week.iso_year, week.iso_week)
    }
}

impl fmt::Display for WeekPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Week {} {} ({})", self.iso_week, self.iso_year, self.label())
    }
}

/// Number of ISO weeks in `year`. 28 December always falls in the last one.
pub fn weeks_in_year(year: i32) -> u32 {
    NaiveDate::from_ymd_opt(year, 12, 28)
        .map(|d| d.iso_week().week())
        .unwrap_or(52)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_29_of_2025_starts_on_july_14() {
        let week = WeekPeriod::from_iso(2025, 29).unwrap();
        assert_eq!(week.start_date, date(2025, 7, 14));
        assert_eq!(week.end_date, date(2025, 7, 20));
        assert_eq!(week.start_key(), "2025-07-14");
        assert_eq!(week.label(), "2025-07-14 to 2025-07-20");
    }

    #[test]
    fn week_one_contains_first_thursday() {
        // 2026-01-01 is a Thursday, so week 1 starts on the preceding Monday.
        let week = WeekPeriod::from_iso(2026, 1).unwrap();
        assert_eq!(week.start_date, date(2025, 12, 29));
    }

    #[test]
    fn rejects_impossible_weeks() {
        assert!(matches!(
            WeekPeriod::from_iso(2025, 53),
            Err(Error::InvalidWeek { year: 2025, week: 53 })
        ));
        assert!(WeekPeriod::from_iso(2025, 0).is_err());
        assert!(WeekPeriod::from_iso(2020, 53).is_ok());
    }

    #[test]
    fn last_completed_is_previous_iso_week() {
        // Wednesday of week 30
        let week = WeekPeriod::last_completed(date(2025, 7, 23));
        assert_eq!((week.iso_year, week.iso_week), (2025, 29));
        assert_eq!(week.start_date, date(2025, 7, 14));
    }

    #[test]
    fn last_completed_crosses_iso_year_boundary() {
        let week = WeekPeriod::last_completed(date(2026, 1, 5));
        assert_eq!((week.iso_year, week.iso_week), (2026, 1));
        let week = WeekPeriod::last_completed(date(2026, 1, 4));
        assert_eq!((week.iso_year, week.iso_week), (2025, 52));
    }

    #[test]
    fn year_over_year_keeps_week_number() {
        let week = WeekPeriod::from_iso(2025, 29).unwrap().year_over_year();
        assert_eq!((week.iso_year, week.iso_week), (2024, 29));
        assert_eq!(week.start_date, date(2024, 7, 15));
    }

    #[test]
    fn year_over_year_clamps_week_53() {
        let week = WeekPeriod::from_iso(2026, 53).unwrap().year_over_year();
        assert_eq!((week.iso_year, week.iso_week), (2025, 52));
        assert_eq!(weeks_in_year(2026), 53);
    }

    #[test]
    fn deserializing_derives_dates_from_week_number() {
        let week: WeekPeriod = serde_json::from_str(
            r#"{"iso_year": 2025, "iso_week": 29, "start_date": "2020-01-01", "end_date": "2020-01-01"}"#,
        )
        .unwrap();
        assert_eq!(week, WeekPeriod::from_iso(2025, 29).unwrap());

        let round_trip: WeekPeriod =
            serde_json::from_str(&serde_json::to_string(&week).unwrap()).unwrap();
        assert_eq!(round_trip, week);

        assert!(serde_json::from_str::<WeekPeriod>(r#"{"iso_year": 2025, "iso_week": 53}"#).is_err());
    }

    #[test]
    fn containing_agrees_with_from_iso() {
        let d = date(2025, 8, 27);
        let week = WeekPeriod::containing(d);
        assert_eq!(week, WeekPeriod::from_iso(2025, 35).unwrap());
    }
}
