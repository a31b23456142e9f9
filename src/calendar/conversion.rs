use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// First BS year covered by the built-in table.
const DEFAULT_FIRST_YEAR: i32 = 2070;

/// Month lengths for BS 2070 through 2085. Baisakh 1, 2070 falls on AD 2013-04-14.
const DEFAULT_MONTH_LENGTHS: [[u8; 12]; 16] = [
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2070
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2071
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2072
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2073
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2074
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2075
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2076
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2077
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2078
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2079
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2080
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2081
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2082
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2083
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2084
    [31, 32, 31, 32, 30, 31, 30, 30, 29, 30, 30, 30], // 2085
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("invalid BS date: {0}")]
    InvalidFormat(String),
    #[error("{0} is outside calendar coverage")]
    OutOfRange(String),
}

/// A Bikram Sambat calendar date. Ordering follows the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BsDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl BsDate {
    pub const fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for BsDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for BsDate {
    type Err = ConversionError;

    /// Accepts `YYYY-MM-DD` as well as the dataset style `YYYY/M/D`.
    /// Only the shape is checked here; range checks need a table.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ConversionError::InvalidFormat(text.to_string());
        let trimmed = text.trim();
        let separator = if trimmed.contains('/') { '/' } else { '-' };
        let mut parts = trimmed.split(separator);
        let (Some(year), Some(month), Some(day), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        let day = day.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { year, month, day })
    }
}

impl Serialize for BsDate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BsDate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference table backing BS <-> AD conversion.
///
/// BS month lengths vary from year to year, so conversion walks a table of
/// month lengths anchored at the AD date of the first covered new year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsCalendarTable {
    first_year: i32,
    anchor: NaiveDate,
    months: Vec<[u8; 12]>,
    year_offsets: Vec<i64>,
    total_days: i64,
}

impl Default for BsCalendarTable {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

impl BsCalendarTable {
    /// Shared instance of the built-in table.
    pub fn builtin() -> &'static BsCalendarTable {
        static TABLE: OnceLock<BsCalendarTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let anchor = NaiveDate::from_ymd_opt(2013, 4, 14).unwrap_or_default();
            Self::from_month_lengths(DEFAULT_FIRST_YEAR, anchor, DEFAULT_MONTH_LENGTHS.to_vec())
        })
    }

    /// Builds a table whose first year starts (Baisakh 1) on `anchor`.
    pub fn from_month_lengths(first_year: i32, anchor: NaiveDate, months: Vec<[u8; 12]>) -> Self {
        let mut year_offsets = Vec::with_capacity(months.len());
        let mut total_days = 0i64;
        for year in &months {
            year_offsets.push(total_days);
            total_days += year.iter().map(|len| i64::from(*len)).sum::<i64>();
        }
        Self {
            first_year,
            anchor,
            months,
            year_offsets,
            total_days,
        }
    }

    pub fn first_year(&self) -> i32 {
        self.first_year
    }

    pub fn last_year(&self) -> i32 {
        self.first_year + self.months.len() as i32 - 1
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.first_year..=self.last_year()
    }

    /// First and last AD day covered by the table.
    pub fn ad_coverage(&self) -> (NaiveDate, NaiveDate) {
        (self.anchor, self.anchor + Duration::days(self.total_days - 1))
    }

    fn year_index(&self, year: i32) -> Option<usize> {
        if year < self.first_year {
            return None;
        }
        let idx = (year - self.first_year) as usize;
        (idx < self.months.len()).then_some(idx)
    }

    /// Number of days in a BS month, or `None` if the year is not covered or
    /// the month is not 1..=12.
    pub fn month_length(&self, year: i32, month: u32) -> Option<u32> {
        let idx = self.year_index(year)?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(u32::from(self.months[idx][(month - 1) as usize]))
    }

    /// Parses and range-checks a BS date string.
    pub fn parse_bs(&self, text: &str) -> Result<BsDate, ConversionError> {
        let date: BsDate = text.parse()?;
        self.check(date)?;
        Ok(date)
    }

    fn check(&self, date: BsDate) -> Result<(), ConversionError> {
        if !(1..=12).contains(&date.month) || date.day == 0 || date.day > 32 {
            return Err(ConversionError::InvalidFormat(date.to_string()));
        }
        let Some(idx) = self.year_index(date.year) else {
            return Err(ConversionError::OutOfRange(format!("BS {date}")));
        };
        let len = u32::from(self.months[idx][(date.month - 1) as usize]);
        if date.day > len {
            return Err(ConversionError::InvalidFormat(format!(
                "{date} (month {} of {} has {len} days)",
                date.month, date.year
            )));
        }
        Ok(())
    }

    pub fn convert_bs_to_ad(&self, date: BsDate) -> Result<NaiveDate, ConversionError> {
        self.check(date)?;
        let Some(idx) = self.year_index(date.year) else {
            return Err(ConversionError::OutOfRange(format!("BS {date}")));
        };
        let months_before: i64 = self.months[idx][..(date.month - 1) as usize]
            .iter()
            .map(|len| i64::from(*len))
            .sum();
        let offset = self.year_offsets[idx] + months_before + i64::from(date.day) - 1;
        Ok(self.anchor + Duration::days(offset))
    }

    pub fn convert_ad_to_bs(&self, date: NaiveDate) -> Result<BsDate, ConversionError> {
        let mut remaining = (date - self.anchor).num_days();
        if remaining < 0 || remaining >= self.total_days {
            return Err(ConversionError::OutOfRange(format!("AD {date}")));
        }
        let idx = match self.year_offsets.binary_search(&remaining) {
            Ok(idx) => idx,
            Err(insert_at) => insert_at - 1,
        };
        remaining -= self.year_offsets[idx];
        for (month_idx, len) in self.months[idx].iter().enumerate() {
            let len = i64::from(*len);
            if remaining < len {
                return Ok(BsDate::new(
                    self.first_year + idx as i32,
                    month_idx as u32 + 1,
                    remaining as u32 + 1,
                ));
            }
            remaining -= len;
        }
        Err(ConversionError::OutOfRange(format!("AD {date}")))
    }

    pub fn today_bs(&self) -> Result<BsDate, ConversionError> {
        self.convert_ad_to_bs(today_ad())
    }
}

pub fn convert_ad_to_bs(date: NaiveDate) -> Result<BsDate, ConversionError> {
    BsCalendarTable::builtin().convert_ad_to_bs(date)
}

pub fn convert_bs_to_ad(date: BsDate) -> Result<NaiveDate, ConversionError> {
    BsCalendarTable::builtin().convert_bs_to_ad(date)
}

pub fn parse_bs(text: &str) -> Result<BsDate, ConversionError> {
    BsCalendarTable::builtin().parse_bs(text)
}

/// Every AD day from `from` to `to`, inclusive. Empty when `from > to`.
pub fn expand_date_range_ad(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    if from > to {
        return Vec::new();
    }
    from.iter_days().take_while(|day| *day <= to).collect()
}

pub fn today_ad() -> NaiveDate {
    Local::now().date_naive()
}

pub fn today_bs() -> Result<BsDate, ConversionError> {
    BsCalendarTable::builtin().today_bs()
}

/// Parses an AD date stored as `YYYY-MM-DD` or `YYYY/M/D`.
pub fn parse_ad(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y/%m/%d"))
        .ok()
}
