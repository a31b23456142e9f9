use crate::calendar::{AdRange, BsCalendarTable, BsDate, CalendarDay, VisibleMonth};
use crate::leave::{LeaveEntry, PeriodType};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

/// Markers on one day of the grid. Absence and approved leave are
/// independent; a day can carry both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayMarkers {
    pub today: bool,
    pub absent: bool,
    pub on_leave: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayMark {
    Ordinary,
    Today,
    Absent,
    ApprovedLeave,
}

impl DayMarkers {
    pub fn is_ordinary(&self) -> bool {
        !(self.today || self.absent || self.on_leave)
    }

    pub fn marks(&self) -> Vec<DayMark> {
        if self.is_ordinary() {
            return vec![DayMark::Ordinary];
        }
        let mut marks = Vec::with_capacity(3);
        if self.today {
            marks.push(DayMark::Today);
        }
        if self.absent {
            marks.push(DayMark::Absent);
        }
        if self.on_leave {
            marks.push(DayMark::ApprovedLeave);
        }
        marks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridCell {
    pub day: CalendarDay,
    pub ad: Option<NaiveDate>,
    pub markers: DayMarkers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    /// Empty cells before day 1 in a Sunday-first week.
    pub leading_blanks: usize,
    pub cells: Vec<GridCell>,
}

impl MonthGrid {
    pub fn cell(&self, day: u32) -> Option<&GridCell> {
        self.cells.iter().find(|cell| cell.day.day == day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbsenceRow {
    pub ad: NaiveDate,
    pub bs: BsDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaveReportRow {
    pub leave_id: String,
    pub title: String,
    pub period_type: PeriodType,
    /// The entry's days that fall inside the month, in BS.
    pub bs_dates: Vec<BsDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub boundary: AdRange,
    pub absences: Vec<AbsenceRow>,
    pub leaves: Vec<LeaveReportRow>,
}

impl MonthlyReport {
    pub fn absent_days(&self) -> usize {
        self.absences.len()
    }

    pub fn leave_days(&self) -> usize {
        self.leaves.iter().map(|row| row.bs_dates.len()).sum()
    }
}

/// Merges absences and approved leave onto the attendance calendar.
#[derive(Debug, Clone, Copy)]
pub struct AttendanceReconciler<'t> {
    table: &'t BsCalendarTable,
}

impl Default for AttendanceReconciler<'static> {
    fn default() -> Self {
        Self::new(BsCalendarTable::builtin())
    }
}

impl<'t> AttendanceReconciler<'t> {
    pub fn new(table: &'t BsCalendarTable) -> Self {
        Self { table }
    }

    /// Union of every day covered by an approved entry. Other statuses are
    /// ignored, as is an entry whose BS dates this table cannot convert.
    pub fn expand_approved_leave_dates(&self, entries: &[LeaveEntry]) -> BTreeSet<NaiveDate> {
        entries
            .iter()
            .filter(|entry| entry.is_approved())
            .flat_map(|entry| self.approved_days(entry))
            .collect()
    }

    fn approved_days(&self, entry: &LeaveEntry) -> Vec<NaiveDate> {
        match entry.period.resolve(self.table) {
            Ok(period) => period.ad_days(),
            Err(err) => {
                tracing::debug!(leave_id = %entry.leave_id, error = %err, "leave dates not convertible");
                Vec::new()
            }
        }
    }

    pub fn render_grid(
        &self,
        visible: &VisibleMonth,
        absent: &BTreeSet<NaiveDate>,
        leave_days: &BTreeSet<NaiveDate>,
        today: NaiveDate,
    ) -> MonthGrid {
        let leading_blanks = visible
            .month
            .days
            .first()
            .map(|day| usize::from(day.day_of_week.clamp(1, 7)) - 1)
            .unwrap_or(0);
        let cells = visible
            .month
            .days
            .iter()
            .map(|day| {
                let ad = day.ad_date();
                let markers = match ad {
                    Some(date) => DayMarkers {
                        today: date == today,
                        absent: absent.contains(&date),
                        on_leave: leave_days.contains(&date),
                    },
                    None => DayMarkers::default(),
                };
                GridCell {
                    day: day.clone(),
                    ad,
                    markers,
                }
            })
            .collect();
        MonthGrid {
            year: visible.year,
            month: visible.month.month,
            leading_blanks,
            cells,
        }
    }

    /// Absences and approved leave inside `boundary` (inclusive), shown in BS.
    /// Dates that cannot be shown in BS are dropped one by one.
    pub fn monthly_report(
        &self,
        boundary: AdRange,
        absent: &BTreeSet<NaiveDate>,
        entries: &[LeaveEntry],
    ) -> MonthlyReport {
        let absences = absent
            .iter()
            .filter(|ad| boundary.contains(**ad))
            .filter_map(|ad| match self.table.convert_ad_to_bs(*ad) {
                Ok(bs) => Some(AbsenceRow { ad: *ad, bs }),
                Err(err) => {
                    tracing::debug!(%ad, error = %err, "dropping absence from report");
                    None
                }
            })
            .collect();

        let leaves = entries
            .iter()
            .filter(|entry| entry.is_approved())
            .filter_map(|entry| {
                let bs_dates: Vec<BsDate> = self
                    .approved_days(entry)
                    .into_iter()
                    .filter(|ad| boundary.contains(*ad))
                    .filter_map(|ad| self.table.convert_ad_to_bs(ad).ok())
                    .collect();
                (!bs_dates.is_empty()).then(|| LeaveReportRow {
                    leave_id: entry.leave_id.clone(),
                    title: entry.title.clone(),
                    period_type: entry.period.period_type(),
                    bs_dates,
                })
            })
            .collect();

        MonthlyReport {
            boundary,
            absences,
            leaves,
        }
    }

    /// Report for a visible month; `None` when its days carry no usable AD
    /// values.
    pub fn monthly_report_for(
        &self,
        visible: &VisibleMonth,
        absent: &BTreeSet<NaiveDate>,
        entries: &[LeaveEntry],
    ) -> Option<MonthlyReport> {
        let boundary = visible.ad_boundary()?;
        Some(self.monthly_report(boundary, absent, entries))
    }
}
