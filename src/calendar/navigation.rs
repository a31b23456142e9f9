use super::dataset::{CalendarDataset, VisibleMonth};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Selected (year, month) in the attendance calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthCursor {
    pub year: i32,
    pub month: u32,
}

impl MonthCursor {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Cursor on the month containing `today`, or the dataset fallback.
    pub fn starting_at(dataset: &CalendarDataset, today: NaiveDate) -> Option<Self> {
        dataset
            .locate_or_fallback(today)
            .map(|(year, month)| Self { year, month })
    }

    fn exists_in(self, dataset: &CalendarDataset) -> bool {
        dataset.month(self.year, self.month).is_some()
    }

    /// Moves forward one month; stays put and returns `false` when the
    /// target is not in the dataset.
    pub fn next(&mut self, dataset: &CalendarDataset) -> bool {
        let target = if self.month >= 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        };
        self.move_to(target, dataset)
    }

    pub fn prev(&mut self, dataset: &CalendarDataset) -> bool {
        let target = if self.month <= 1 {
            Self::new(self.year - 1, 12)
        } else {
            Self::new(self.year, self.month - 1)
        };
        self.move_to(target, dataset)
    }

    fn move_to(&mut self, target: Self, dataset: &CalendarDataset) -> bool {
        if !target.exists_in(dataset) {
            return false;
        }
        *self = target;
        true
    }

    /// Switches year, keeping the month if the new year has it and otherwise
    /// resetting to the year's first available month.
    pub fn change_year(&mut self, year: i32, dataset: &CalendarDataset) -> bool {
        let months = dataset.months_for_year(year);
        let Some(first) = months.first() else {
            return false;
        };
        let month = if months.iter().any(|m| m.month == self.month) {
            self.month
        } else {
            first.month
        };
        *self = Self::new(year, month);
        true
    }

    pub fn visible(&self, dataset: &CalendarDataset) -> Option<VisibleMonth> {
        dataset.visible(self.year, self.month)
    }
}
