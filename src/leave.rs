use crate::calendar::{BsCalendarTable, BsDate, ConversionError, expand_date_range_ad};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Validated,
    Rejected,
    Approved,
    /// Present in stored data but never produced by a transition here.
    Cancelled,
}

impl LeaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::Validated => "validated",
            LeaveStatus::Rejected => "rejected",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses shown to reviewers.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, LeaveStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeaveStatus::Rejected | LeaveStatus::Approved | LeaveStatus::Cancelled
        )
    }

    /// Target status of `transition`, if allowed from `self`.
    pub fn after(&self, transition: Transition) -> Option<LeaveStatus> {
        match (self, transition) {
            (LeaveStatus::Pending, Transition::Validate) => Some(LeaveStatus::Validated),
            (LeaveStatus::Pending, Transition::Reject) => Some(LeaveStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for LeaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaveStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(LeaveStatus::Pending),
            "validated" => Ok(LeaveStatus::Validated),
            "rejected" => Ok(LeaveStatus::Rejected),
            "approved" => Ok(LeaveStatus::Approved),
            "cancelled" | "canceled" => Ok(LeaveStatus::Cancelled),
            other => Err(format!("unknown leave status '{other}'")),
        }
    }
}

/// Review actions performed by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Validate,
    Reject,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Validate => "validate",
            Transition::Reject => "reject",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeriodType {
    SingleDay,
    HalfDay,
    DateRange,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::SingleDay => "singleDay",
            PeriodType::HalfDay => "halfDay",
            PeriodType::DateRange => "dateRange",
        }
    }
}

impl FromStr for PeriodType {
    type Err = String;

    /// Case, spaces and separators are ignored: `Half Day`, `half_day` and
    /// `halfDay` all parse.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "singleday" | "single" => Ok(PeriodType::SingleDay),
            "halfday" | "half" => Ok(PeriodType::HalfDay),
            "daterange" | "range" | "multiple" => Ok(PeriodType::DateRange),
            _ => Err(format!("unknown period type '{}'", value.trim())),
        }
    }
}

/// When the leave applies. Dates are AD; BS is a display concern.
///
/// `Unconverted` holds BS dates as entered when the conversion table does
/// not cover them. Such a leave can still be reviewed; it only drops out of
/// the attendance calendar until a table covering it is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LeavePeriod {
    SingleDay {
        date: NaiveDate,
    },
    HalfDay {
        date: NaiveDate,
    },
    DateRange {
        from: NaiveDate,
        to: NaiveDate,
    },
    #[serde(rename_all = "camelCase")]
    Unconverted {
        period_type: PeriodType,
        from: BsDate,
        to: BsDate,
    },
}

impl LeavePeriod {
    pub fn period_type(&self) -> PeriodType {
        match self {
            LeavePeriod::SingleDay { .. } => PeriodType::SingleDay,
            LeavePeriod::HalfDay { .. } => PeriodType::HalfDay,
            LeavePeriod::DateRange { .. } => PeriodType::DateRange,
            LeavePeriod::Unconverted { period_type, .. } => *period_type,
        }
    }

    /// Like `from_bs`, but BS dates past the table's coverage are kept as
    /// `Unconverted` instead of failing. Malformed dates still fail.
    pub fn from_bs_lenient(
        table: &BsCalendarTable,
        period_type: PeriodType,
        first: BsDate,
        last: Option<BsDate>,
    ) -> Result<Self, ConversionError> {
        match Self::from_bs(table, period_type, first, last) {
            Err(ConversionError::OutOfRange(_)) => {
                check_shape(first)?;
                let to = match period_type {
                    PeriodType::DateRange => last.unwrap_or(first),
                    PeriodType::SingleDay | PeriodType::HalfDay => first,
                };
                check_shape(to)?;
                if to < first {
                    return Err(ConversionError::InvalidFormat(format!(
                        "range ends ({to}) before it starts ({first})"
                    )));
                }
                Ok(LeavePeriod::Unconverted {
                    period_type,
                    from: first,
                    to,
                })
            }
            other => other,
        }
    }

    /// Converts an `Unconverted` period with `table`; AD periods are
    /// returned as they are.
    pub fn resolve(&self, table: &BsCalendarTable) -> Result<Self, ConversionError> {
        match *self {
            LeavePeriod::Unconverted {
                period_type,
                from,
                to,
            } => Self::from_bs(table, period_type, from, Some(to)),
            resolved => Ok(resolved),
        }
    }

    /// Builds a period from BS dates as entered by the applicant.
    pub fn from_bs(
        table: &BsCalendarTable,
        period_type: PeriodType,
        first: BsDate,
        last: Option<BsDate>,
    ) -> Result<Self, ConversionError> {
        let first = table.convert_bs_to_ad(first)?;
        Ok(match period_type {
            PeriodType::SingleDay => LeavePeriod::SingleDay { date: first },
            PeriodType::HalfDay => LeavePeriod::HalfDay { date: first },
            PeriodType::DateRange => {
                let to = match last {
                    Some(last) => table.convert_bs_to_ad(last)?,
                    None => first,
                };
                LeavePeriod::DateRange { from: first, to }
            }
        })
    }

    /// Every AD day covered by the period, ascending. Empty for an
    /// `Unconverted` period; `resolve` it first.
    pub fn ad_days(&self) -> Vec<NaiveDate> {
        match *self {
            LeavePeriod::SingleDay { date } | LeavePeriod::HalfDay { date } => vec![date],
            LeavePeriod::DateRange { from, to } => expand_date_range_ad(from, to),
            LeavePeriod::Unconverted { .. } => Vec::new(),
        }
    }
}

/// Month and day bounds that hold in every BS year.
fn check_shape(date: BsDate) -> Result<(), ConversionError> {
    if !(1..=12).contains(&date.month) || !(1..=32).contains(&date.day) {
        return Err(ConversionError::InvalidFormat(date.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveEntry {
    pub leave_id: String,
    pub title: String,
    pub reason: String,
    pub period: LeavePeriod,
    pub status: LeaveStatus,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl LeaveEntry {
    /// A freshly applied, pending leave.
    pub fn new(
        leave_id: impl Into<String>,
        title: impl Into<String>,
        reason: impl Into<String>,
        period: LeavePeriod,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            leave_id: leave_id.into(),
            title: title.into(),
            reason: reason.into(),
            period,
            status: LeaveStatus::Pending,
            applied_at,
            validated_at: None,
            rejected_at: None,
            rejection_reason: None,
            approved_at: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == LeaveStatus::Approved
    }

    /// Applies a review decision. Returns the rejected status when the
    /// transition is not allowed; the entry is left untouched in that case.
    pub(crate) fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<(), LeaveStatus> {
        let Some(next) = self.status.after(transition) else {
            return Err(self.status);
        };
        self.status = next;
        match transition {
            Transition::Validate => self.validated_at = Some(now),
            Transition::Reject => {
                self.rejected_at = Some(now);
                self.rejection_reason = reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string);
            }
        }
        Ok(())
    }
}
