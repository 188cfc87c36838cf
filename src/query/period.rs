use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::date_util::{last_day_of_month, parse_date, YearMonth};
use crate::error::{Error, Result};

static RE_QUARTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").expect("static regex"));
static RE_WEEK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{1,2})$").expect("static regex"));
static RE_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("static regex"));
static RE_CUSTOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\.\.(\d{4}-\d{2}-\d{2})$").expect("static regex")
});

/// Longest rolling period `Period::parse` accepts.
pub const MAX_ROLLING_DAYS: u32 = 36_600;

/// `date` moved back by `days`, or an error past the calendar's lower bound.
pub fn days_before(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    Duration::try_days(days)
        .and_then(|d| date.checked_sub_signed(d))
        .ok_or_else(|| Error::PeriodParse(format!("{days} days before {date} is out of range")))
}

/// An inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A single-month range covering every calendar day of `ym`.
    pub fn month(ym: YearMonth) -> Self {
        Self {
            start: ym.first_day(),
            end: ym.last_day(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days in the range.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Calendar months the range intersects, in order.
    pub fn months(&self) -> Vec<YearMonth> {
        let last = YearMonth::of(self.end);
        let mut ym = YearMonth::of(self.start);
        let mut out = vec![ym];
        while ym < last {
            ym = ym.next();
            out.push(ym);
        }
        out
    }

    /// Intersection of this range with a calendar month.
    pub fn intersect_month(&self, ym: YearMonth) -> Option<DateRange> {
        let start = self.start.max(ym.first_day());
        let end = self.end.min(ym.last_day());
        (start <= end).then_some(DateRange { start, end })
    }

    /// The range of equal length immediately preceding this one.
    pub fn previous(&self) -> Result<DateRange> {
        let end = days_before(self.start, 1)?;
        Ok(DateRange {
            start: days_before(end, self.days() - 1)?,
            end,
        })
    }

    pub fn to_key(&self) -> String {
        format!("{}..{}", self.start, self.end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// A time period for KPI queries and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Year(i32),
    Quarter(i32, u8),
    Month(i32, u8),
    Week(i32, u8),
    Rolling(u32, NaiveDate),
    YearToDate(i32),
    MonthToDate(i32, u8),
    Custom(NaiveDate, NaiveDate),
}

impl Period {
    /// Parse a period string.
    ///
    /// Supported formats:
    /// - `2025` — year
    /// - `2025-Q1` — quarter
    /// - `2025-01` — month
    /// - `2025-W05` — ISO week
    /// - `30d` — rolling last N days ending today
    /// - `ytd`, `mtd` — year / month to date
    /// - `2025-01-10..2025-02-20` — explicit inclusive range
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let today = chrono::Local::now().date_naive();

        match s.to_lowercase().as_str() {
            "ytd" => return Ok(Period::YearToDate(today.year())),
            "mtd" => return Ok(Period::MonthToDate(today.year(), today.month() as u8)),
            _ => {}
        }

        if let Some(days) = s.strip_suffix(['d', 'D']) {
            if let Ok(n) = days.parse::<u32>() {
                if n == 0 {
                    return Err(Error::PeriodParse("rolling period must be at least 1d".into()));
                }
                if n > MAX_ROLLING_DAYS {
                    return Err(Error::PeriodParse(format!(
                        "rolling period must be at most {MAX_ROLLING_DAYS}d, got {n}d"
                    )));
                }
                return Ok(Period::Rolling(n, today));
            }
        }

        if let Some(caps) = RE_CUSTOM.captures(s) {
            let start = parse_date(&caps[1])?;
            let end = parse_date(&caps[2])?;
            DateRange::new(start, end)?;
            return Ok(Period::Custom(start, end));
        }

        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Ok(Period::Year(year));
            }
        }

        if let Some(caps) = RE_QUARTER.captures(s) {
            let year = parse_num::<i32>(&caps[1], s)?;
            let q = parse_num::<u8>(&caps[2], s)?;
            return Ok(Period::Quarter(year, q));
        }

        if let Some(caps) = RE_WEEK.captures(s) {
            let year = parse_num::<i32>(&caps[1], s)?;
            let week = parse_num::<u8>(&caps[2], s)?;
            if NaiveDate::from_isoywd_opt(year, week as u32, Weekday::Mon).is_some() {
                return Ok(Period::Week(year, week));
            }
        }

        if let Some(caps) = RE_MONTH.captures(s) {
            let year = parse_num::<i32>(&caps[1], s)?;
            let month = parse_num::<u8>(&caps[2], s)?;
            if (1..=12).contains(&month) {
                return Ok(Period::Month(year, month));
            }
        }

        Err(Error::PeriodParse(format!("unrecognized period: {s}")))
    }

    /// Convert to a canonical key string.
    pub fn to_key(&self) -> String {
        match self {
            Period::Year(y) => format!("{y}"),
            Period::Quarter(y, q) => format!("{y}-Q{q}"),
            Period::Month(y, m) => format!("{y}-{m:02}"),
            Period::Week(y, w) => format!("{y}-W{w:02}"),
            Period::Rolling(n, _) => format!("{n}d"),
            Period::YearToDate(y) => format!("{y}-ytd"),
            Period::MonthToDate(y, m) => format!("{y}-{m:02}-td"),
            Period::Custom(s, e) => format!("{s}..{e}"),
        }
    }

    /// Get the inclusive date range for this period.
    pub fn date_range(&self) -> Result<DateRange> {
        let today = chrono::Local::now().date_naive();
        let (start, end) = match self {
            Period::Year(y) => (ymd(*y, 1, 1), ymd(*y, 12, 31)),
            Period::Quarter(y, q) => {
                let start_month = (*q as u32 - 1) * 3 + 1;
                (ymd(*y, start_month, 1), last_day_of_month(*y, *q as u32 * 3))
            }
            Period::Month(y, m) => (ymd(*y, *m as u32, 1), last_day_of_month(*y, *m as u32)),
            Period::Week(y, w) => {
                let start = NaiveDate::from_isoywd_opt(*y, *w as u32, Weekday::Mon)
                    .unwrap_or(today);
                (start, start + Duration::days(6))
            }
            Period::Rolling(n, as_of) => (days_before(*as_of, *n as i64 - 1)?, *as_of),
            Period::YearToDate(y) => (ymd(*y, 1, 1), today),
            Period::MonthToDate(y, m) => (ymd(*y, *m as u32, 1), today),
            Period::Custom(s, e) => (*s, *e),
        };
        Ok(DateRange {
            start,
            end: end.max(start),
        })
    }

    /// Get the previous period of the same type.
    pub fn previous(&self) -> Result<Self> {
        Ok(match self {
            Period::Year(y) => Period::Year(y - 1),
            Period::Quarter(y, q) => {
                if *q == 1 {
                    Period::Quarter(y - 1, 4)
                } else {
                    Period::Quarter(*y, q - 1)
                }
            }
            Period::Month(y, m) => {
                if *m == 1 {
                    Period::Month(y - 1, 12)
                } else {
                    Period::Month(*y, m - 1)
                }
            }
            Period::Week(y, w) => {
                if *w == 1 {
                    // Last ISO week of the previous year; 28 Dec is always in it.
                    let week = NaiveDate::from_ymd_opt(y - 1, 12, 28)
                        .map(|d| d.iso_week().week() as u8)
                        .unwrap_or(52);
                    Period::Week(y - 1, week)
                } else {
                    Period::Week(*y, w - 1)
                }
            }
            Period::Rolling(n, as_of) => Period::Rolling(*n, days_before(*as_of, *n as i64)?),
            Period::YearToDate(y) => Period::YearToDate(y - 1),
            Period::MonthToDate(y, m) => {
                if *m == 1 {
                    Period::MonthToDate(y - 1, 12)
                } else {
                    Period::MonthToDate(*y, m - 1)
                }
            }
            Period::Custom(..) => {
                let prev = self.date_range()?.previous()?;
                Period::Custom(prev.start, prev.end)
            }
        })
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// Cadence of a generated AI report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Weekly,
    Monthly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
        }
    }

    /// Default window when no explicit period is requested: the trailing
    /// week for weekly reports, the previous calendar month for monthly.
    pub fn default_range(&self, today: NaiveDate) -> DateRange {
        match self {
            ReportType::Weekly => DateRange {
                start: today - Duration::days(7),
                end: today,
            },
            ReportType::Monthly => DateRange::month(YearMonth::of(today).previous()),
        }
    }
}

impl std::str::FromStr for ReportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(ReportType::Weekly),
            "monthly" => Ok(ReportType::Monthly),
            other => Err(Error::InvalidInput(format!(
                "unknown report type: {other} (expected weekly or monthly)"
            ))),
        }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

fn parse_num<T: std::str::FromStr>(part: &str, whole: &str) -> Result<T> {
    part.parse()
        .map_err(|_| Error::PeriodParse(format!("invalid period: {whole}")))
}
