use super::conversion::{BsCalendarTable, parse_ad};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("calendar dataset fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("calendar dataset io error: {0}")]
    Io(#[from] io::Error),
    #[error("calendar dataset is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("calendar dataset has no years")]
    Empty,
}

impl DatasetError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DatasetError::Timeout(_) | DatasetError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub day: u32,
    /// Gregorian equivalent as served, e.g. `2024/4/13`.
    pub en: String,
    #[serde(rename = "dayOfWeek")]
    pub day_of_week: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tithi: Option<String>,
    #[serde(default, alias = "event", skip_serializing_if = "Option::is_none")]
    pub festival: Option<String>,
}

impl CalendarDay {
    pub fn ad_date(&self) -> Option<NaiveDate> {
        parse_ad(&self.en)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMonth {
    pub month: u32,
    pub days: Vec<CalendarDay>,
}

/// Inclusive AD range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AdRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// BS year label to its months, in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDataset {
    years: BTreeMap<String, Vec<CalendarMonth>>,
}

/// The month currently shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleMonth {
    pub year: i32,
    pub month: CalendarMonth,
}

impl VisibleMonth {
    /// AD values of the first and last day of the month.
    pub fn ad_boundary(&self) -> Option<AdRange> {
        let start = self.month.days.first()?.ad_date()?;
        let end = self.month.days.last()?.ad_date()?;
        Some(AdRange::new(start, end))
    }
}

impl CalendarDataset {
    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        let dataset: CalendarDataset = serde_json::from_str(json)?;
        if dataset.years.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(dataset)
    }

    pub fn insert_year(&mut self, year: i32, months: Vec<CalendarMonth>) {
        self.years.insert(year.to_string(), months);
    }

    /// Year labels that parse as numbers, ascending.
    pub fn list_years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self
            .years
            .keys()
            .filter_map(|label| label.trim().parse().ok())
            .collect();
        years.sort_unstable();
        years
    }

    pub fn months_for_year(&self, year: i32) -> &[CalendarMonth] {
        self.years
            .iter()
            .find(|(label, _)| label.trim().parse::<i32>().ok() == Some(year))
            .map(|(_, months)| months.as_slice())
            .unwrap_or(&[])
    }

    pub fn month(&self, year: i32, month: u32) -> Option<&CalendarMonth> {
        self.months_for_year(year).iter().find(|m| m.month == month)
    }

    pub fn visible(&self, year: i32, month: u32) -> Option<VisibleMonth> {
        self.month(year, month).map(|m| VisibleMonth {
            year,
            month: m.clone(),
        })
    }

    /// Finds the BS (year, month) holding `ad`. There is no inverse index, so
    /// every day of every month is scanned.
    pub fn locate(&self, ad: NaiveDate) -> Option<(i32, u32)> {
        for year in self.list_years() {
            for month in self.months_for_year(year) {
                if month.days.iter().any(|day| day.ad_date() == Some(ad)) {
                    return Some((year, month.month));
                }
            }
        }
        None
    }

    /// `locate`, falling back to the latest year and its first month.
    pub fn locate_or_fallback(&self, ad: NaiveDate) -> Option<(i32, u32)> {
        self.locate(ad).or_else(|| {
            let year = *self.list_years().last()?;
            let first = self.months_for_year(year).first()?;
            Some((year, first.month))
        })
    }

    /// Builds a dataset from a conversion table. Weekdays run 1 (Sunday) to
    /// 7 (Saturday); no tithi or festival data is available.
    pub fn from_table(table: &BsCalendarTable) -> Self {
        let mut dataset = Self::default();
        for year in table.years() {
            let mut months = Vec::with_capacity(12);
            for month in 1..=12u32 {
                let Some(len) = table.month_length(year, month) else {
                    continue;
                };
                let mut days = Vec::with_capacity(len as usize);
                for day in 1..=len {
                    let Ok(ad) = table.convert_bs_to_ad(super::BsDate::new(year, month, day)) else {
                        continue;
                    };
                    days.push(CalendarDay {
                        day,
                        en: format!("{}/{}/{}", ad.year(), ad.month(), ad.day()),
                        day_of_week: ad.weekday().number_from_sunday() as u8,
                        tithi: None,
                        festival: None,
                    });
                }
                months.push(CalendarMonth { month, days });
            }
            dataset.insert_year(year, months);
        }
        dataset
    }
}

pub trait DatasetProvider {
    fn fetch(&self, timeout: Duration) -> Result<CalendarDataset, DatasetError>;
}

/// Reads the dataset from a JSON file in the served wire format.
pub struct FileDatasetProvider {
    path: PathBuf,
}

impl FileDatasetProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

fn read_dataset(path: &Path) -> Result<CalendarDataset, DatasetError> {
    let file = File::open(path)?;
    let dataset: CalendarDataset = serde_json::from_reader(io::BufReader::new(file))?;
    if dataset.years.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok(dataset)
}

impl DatasetProvider for FileDatasetProvider {
    /// The read runs on its own thread so a stalled open or read (a FIFO, a
    /// hung network mount) returns `Timeout` on time. The thread is left to
    /// finish in the background and its result is discarded.
    fn fetch(&self, timeout: Duration) -> Result<CalendarDataset, DatasetError> {
        let path = self.path.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("calendar-dataset-read".into())
            .spawn(move || {
                let _ = tx.send(read_dataset(&path));
            })?;
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(path = %self.path.display(), ?timeout, "calendar dataset read timed out");
                Err(DatasetError::Timeout(timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(DatasetError::Io(io::Error::other(
                "calendar dataset reader exited without a result",
            ))),
        }
    }
}

/// Serves a dataset generated from a conversion table.
#[derive(Default)]
pub struct TableDatasetProvider {
    table: BsCalendarTable,
}

impl TableDatasetProvider {
    pub fn new(table: BsCalendarTable) -> Self {
        Self { table }
    }
}

impl DatasetProvider for TableDatasetProvider {
    fn fetch(&self, _timeout: Duration) -> Result<CalendarDataset, DatasetError> {
        Ok(CalendarDataset::from_table(&self.table))
    }
}

/// Identifies one in-flight dataset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Session cache for the calendar dataset.
///
/// Only the response for the most recent ticket is applied; anything older
/// is dropped on arrival.
#[derive(Debug, Default)]
pub struct DatasetCache {
    current: u64,
    dataset: Option<Arc<CalendarDataset>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.current += 1;
        FetchTicket(self.current)
    }

    /// Invalidates any outstanding ticket, e.g. when the user navigates away.
    pub fn abandon(&mut self) {
        self.current += 1;
    }

    /// Returns `true` when the response was applied.
    pub fn complete(&mut self, ticket: FetchTicket, dataset: CalendarDataset) -> bool {
        if ticket.0 != self.current {
            tracing::debug!(ticket = ticket.0, current = self.current, "discarding stale calendar dataset");
            return false;
        }
        self.dataset = Some(Arc::new(dataset));
        true
    }

    pub fn get(&self) -> Option<Arc<CalendarDataset>> {
        self.dataset.clone()
    }

    /// Fetches once per session; later calls reuse the cached dataset.
    pub fn load<P: DatasetProvider + ?Sized>(
        &mut self,
        provider: &P,
        timeout: Duration,
    ) -> Result<Arc<CalendarDataset>, DatasetError> {
        if let Some(dataset) = &self.dataset {
            return Ok(dataset.clone());
        }
        let ticket = self.begin_fetch();
        let dataset = provider.fetch(timeout)?;
        self.complete(ticket, dataset);
        self.dataset.clone().ok_or(DatasetError::Empty)
    }
}
