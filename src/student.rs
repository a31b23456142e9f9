use crate::calendar::parse_ad;
use crate::codec::{DecodedLeaves, LeaveRecordCodec};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The student document. Leave records and absences are embedded in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    /// Document id in the store.
    pub id: String,
    /// School-issued student id; notifications are addressed to it.
    #[serde(default)]
    pub custom_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub faculty_id: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub section: String,
    /// AD dates the student was marked absent.
    #[serde(default)]
    pub absent: Vec<String>,
    /// Codec-encoded leave records.
    #[serde(default)]
    pub leave: Vec<String>,
    /// Bumped by the store on every successful update.
    #[serde(default)]
    pub version: u64,
}

impl StudentAggregate {
    pub fn new(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            custom_id: id.clone(),
            id,
            parent_id: parent_id.into(),
            faculty_id: String::new(),
            class: String::new(),
            section: String::new(),
            absent: Vec::new(),
            leave: Vec::new(),
            version: 0,
        }
    }

    /// Id notifications for this student are sent to.
    pub fn applicant_id(&self) -> &str {
        if self.custom_id.trim().is_empty() {
            &self.id
        } else {
            &self.custom_id
        }
    }

    pub fn decode_leaves(&self, codec: &LeaveRecordCodec<'_>) -> DecodedLeaves {
        codec.decode_all(&self.leave)
    }

    /// Absence dates that parse; anything else is skipped.
    pub fn absent_dates(&self) -> BTreeSet<NaiveDate> {
        parse_absent_dates(&self.absent)
    }
}

pub fn parse_absent_dates<S: AsRef<str>>(raw: &[S]) -> BTreeSet<NaiveDate> {
    raw.iter()
        .filter_map(|text| {
            let parsed = parse_ad(text.as_ref());
            if parsed.is_none() {
                tracing::debug!(value = text.as_ref(), "skipping unparsable absence date");
            }
            parsed
        })
        .collect()
}
