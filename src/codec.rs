//! String form of leave records inside the student aggregate's `leave` array.
//!
//! Records are written as JSON objects carrying a `schema` marker with AD
//! dates and an explicitly tagged `period`. Older records without the marker
//! hold BS dates as the applicant typed them in flat `periodType` /
//! `date` / `fromDate` / `toDate` fields; they are converted to AD on decode
//! and rewritten in the current form the next time the collection is saved.
//! BS dates the conversion table does not cover are kept in BS as an
//! `Unconverted` period rather than rejected.

use crate::calendar::{BsCalendarTable, BsDate, ConversionError};
use crate::leave::{LeaveEntry, LeavePeriod, LeaveStatus, PeriodType};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

pub const SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed leave record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid leave record: {0}")]
    Schema(String),
    #[error("leave record field `{field}` has an unusable date: {source}")]
    Date {
        field: &'static str,
        #[source]
        source: ConversionError,
    },
}

impl CodecError {
    fn schema(message: impl Into<String>) -> Self {
        CodecError::Schema(message.into())
    }
}

/// A stored record that could not be decoded. Kept verbatim so a rewrite of
/// the collection does not lose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantinedRecord {
    pub index: usize,
    pub raw: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedLeaves {
    /// Sorted by `applied_at`, newest first.
    pub entries: Vec<LeaveEntry>,
    pub quarantined: Vec<QuarantinedRecord>,
}

#[derive(Serialize)]
struct StoredLeave<'a> {
    schema: u64,
    #[serde(flatten)]
    entry: &'a LeaveEntry,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyTimestamp {
    Millis(i64),
    Text(String),
}

impl LegacyTimestamp {
    fn into_utc(self, field: &'static str) -> Result<DateTime<Utc>, CodecError> {
        match self {
            LegacyTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| CodecError::schema(format!("`{field}` is out of range"))),
            LegacyTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| CodecError::schema(format!("`{field}` is not a timestamp: {err}"))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyLeaveRecord {
    leave_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    reason: String,
    period_type: String,
    date: Option<String>,
    from_date: Option<String>,
    to_date: Option<String>,
    status: String,
    applied_at: LegacyTimestamp,
    validated_at: Option<LegacyTimestamp>,
    rejected_at: Option<LegacyTimestamp>,
    rejection_reason: Option<String>,
    approved_at: Option<LegacyTimestamp>,
}

fn optional_ts(
    value: Option<LegacyTimestamp>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, CodecError> {
    value.map(|ts| ts.into_utc(field)).transpose()
}

#[derive(Debug, Clone, Copy)]
pub struct LeaveRecordCodec<'t> {
    table: &'t BsCalendarTable,
}

impl Default for LeaveRecordCodec<'static> {
    fn default() -> Self {
        Self::new(BsCalendarTable::builtin())
    }
}

impl<'t> LeaveRecordCodec<'t> {
    pub fn new(table: &'t BsCalendarTable) -> Self {
        Self { table }
    }

    pub fn encode(&self, entry: &LeaveEntry) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&StoredLeave {
            schema: SCHEMA_VERSION,
            entry,
        })?)
    }

    pub fn decode(&self, raw: &str) -> Result<LeaveEntry, CodecError> {
        let mut value: Value = serde_json::from_str(raw)?;
        let Some(object) = value.as_object_mut() else {
            return Err(CodecError::schema("record is not a JSON object"));
        };
        let mut entry = match object.remove("schema") {
            Some(schema) if schema.as_u64() == Some(SCHEMA_VERSION) => {
                serde_json::from_value::<LeaveEntry>(value)?
            }
            Some(schema) => {
                return Err(CodecError::schema(format!(
                    "unsupported schema version {schema}"
                )));
            }
            None => self.decode_legacy(serde_json::from_value(value)?)?,
        };
        self.upgrade(&mut entry);
        Self::check(&entry)?;
        Ok(entry)
    }

    fn check(entry: &LeaveEntry) -> Result<(), CodecError> {
        if entry.leave_id.trim().is_empty() {
            return Err(CodecError::schema("leaveId is blank"));
        }
        let reversed = match entry.period {
            LeavePeriod::DateRange { from, to } => {
                (from > to).then(|| (from.to_string(), to.to_string()))
            }
            LeavePeriod::Unconverted { from, to, .. } => {
                (from > to).then(|| (from.to_string(), to.to_string()))
            }
            LeavePeriod::SingleDay { .. } | LeavePeriod::HalfDay { .. } => None,
        };
        if let Some((from, to)) = reversed {
            return Err(CodecError::schema(format!(
                "leave {} ends ({to}) before it starts ({from})",
                entry.leave_id
            )));
        }
        Ok(())
    }

    /// Converts an `Unconverted` period when this codec's table now covers it.
    fn upgrade(&self, entry: &mut LeaveEntry) {
        if matches!(entry.period, LeavePeriod::Unconverted { .. }) {
            if let Ok(period) = entry.period.resolve(self.table) {
                entry.period = period;
            }
        }
    }

    /// Parses a legacy BS field. Dates past the table's coverage are fine
    /// here; dates that cannot exist are not.
    fn legacy_bs(&self, text: Option<&str>, field: &'static str) -> Result<BsDate, CodecError> {
        let text = text.ok_or_else(|| CodecError::schema(format!("`{field}` is missing")))?;
        let date: BsDate = text
            .parse()
            .map_err(|source| CodecError::Date { field, source })?;
        match self.table.convert_bs_to_ad(date) {
            Ok(_) | Err(ConversionError::OutOfRange(_)) => Ok(date),
            Err(source) => Err(CodecError::Date { field, source }),
        }
    }

    fn decode_legacy(&self, record: LegacyLeaveRecord) -> Result<LeaveEntry, CodecError> {
        let period_type: PeriodType = record.period_type.parse().map_err(CodecError::Schema)?;
        let (first_field, first, last) = match period_type {
            PeriodType::SingleDay | PeriodType::HalfDay => {
                ("date", self.legacy_bs(record.date.as_deref(), "date")?, None)
            }
            PeriodType::DateRange => (
                "fromDate",
                self.legacy_bs(record.from_date.as_deref(), "fromDate")?,
                Some(self.legacy_bs(record.to_date.as_deref(), "toDate")?),
            ),
        };
        let period = LeavePeriod::from_bs_lenient(self.table, period_type, first, last)
            .map_err(|source| CodecError::Date {
                field: first_field,
                source,
            })?;
        let status: LeaveStatus = record.status.parse().map_err(CodecError::Schema)?;
        Ok(LeaveEntry {
            leave_id: record.leave_id,
            title: record.title,
            reason: record.reason,
            period,
            status,
            applied_at: record.applied_at.into_utc("appliedAt")?,
            validated_at: optional_ts(record.validated_at, "validatedAt")?,
            rejected_at: optional_ts(record.rejected_at, "rejectedAt")?,
            rejection_reason: record.rejection_reason.filter(|r| !r.trim().is_empty()),
            approved_at: optional_ts(record.approved_at, "approvedAt")?,
        })
    }

    /// Decodes a whole collection. A record that fails to decode, or repeats
    /// an earlier `leaveId`, is quarantined instead of failing the batch.
    pub fn decode_all<S: AsRef<str>>(&self, records: &[S]) -> DecodedLeaves {
        let mut decoded = DecodedLeaves::default();
        let mut seen = HashSet::with_capacity(records.len());
        for (index, raw) in records.iter().enumerate() {
            let raw = raw.as_ref();
            let result = self.decode(raw).and_then(|entry| {
                if seen.insert(entry.leave_id.clone()) {
                    Ok(entry)
                } else {
                    Err(CodecError::schema(format!("duplicate leaveId {}", entry.leave_id)))
                }
            });
            match result {
                Ok(entry) => decoded.entries.push(entry),
                Err(err) => {
                    tracing::warn!(index, error = %err, "quarantining leave record");
                    decoded.quarantined.push(QuarantinedRecord {
                        index,
                        raw: raw.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        decoded
            .entries
            .sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        decoded
    }

    /// Encodes `entries` followed by the quarantined raw records.
    pub fn encode_all(
        &self,
        entries: &[LeaveEntry],
        quarantined: &[QuarantinedRecord],
    ) -> Result<Vec<String>, CodecError> {
        let mut out = Vec::with_capacity(entries.len() + quarantined.len());
        for entry in entries {
            out.push(self.encode(entry)?);
        }
        out.extend(quarantined.iter().map(|q| q.raw.clone()));
        Ok(out)
    }
}
