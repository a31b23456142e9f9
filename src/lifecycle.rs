//! Parent review of leave applications.
//!
//! A review is one read -> mutate -> write round trip over the student
//! aggregate followed by a notification to the applicant. The store has no
//! way to address a single leave record, so every review re-encodes and
//! rewrites the whole collection; the write carries the version that was
//! read so a concurrent review is reported instead of silently overwritten.

use crate::calendar::BsCalendarTable;
use crate::codec::{CodecError, LeaveRecordCodec, QuarantinedRecord};
use crate::error::{Classify, ErrorKind};
use crate::leave::{LeaveEntry, LeavePeriod, LeaveStatus, PeriodType, Transition};
use crate::notification::{NotificationDispatcher, NotificationError};
use crate::persistence::{StoreError, StudentStore};
use crate::student::StudentAggregate;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {transition} leave {leave_id}: no such leave")]
    NotFound {
        leave_id: String,
        transition: Transition,
    },
    #[error("cannot {transition} leave {leave_id}: it is already {status}")]
    InvalidTransition {
        leave_id: String,
        transition: Transition,
        status: LeaveStatus,
    },
    #[error("cannot {transition} leave {leave_id}: {source}")]
    Store {
        leave_id: String,
        transition: Transition,
        #[source]
        source: StoreError,
    },
    #[error("cannot {transition} leave {leave_id}: {source}")]
    Encode {
        leave_id: String,
        transition: Transition,
        #[source]
        source: CodecError,
    },
}

impl LifecycleError {
    pub fn leave_id(&self) -> &str {
        match self {
            LifecycleError::NotFound { leave_id, .. }
            | LifecycleError::InvalidTransition { leave_id, .. }
            | LifecycleError::Store { leave_id, .. }
            | LifecycleError::Encode { leave_id, .. } => leave_id,
        }
    }

    pub fn transition(&self) -> Transition {
        match self {
            LifecycleError::NotFound { transition, .. }
            | LifecycleError::InvalidTransition { transition, .. }
            | LifecycleError::Store { transition, .. }
            | LifecycleError::Encode { transition, .. } => *transition,
        }
    }
}

impl Classify for LifecycleError {
    fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound { .. } => ErrorKind::NotFound,
            LifecycleError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LifecycleError::Store { source, .. } => source.kind(),
            LifecycleError::Encode { source, .. } => source.kind(),
        }
    }
}

/// Non-fatal problems reported next to a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionWarning {
    /// The notification could not be built and was dropped.
    NotificationSkipped { reason: String },
    /// Delivery failed; the message stays queued for retry.
    NotificationQueued { reason: String, pending: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub aggregate: StudentAggregate,
    pub entry: LeaveEntry,
    pub warnings: Vec<TransitionWarning>,
}

/// A review written to the store whose notification has not been sent yet.
#[derive(Debug, Clone)]
pub struct CommittedReview {
    pub aggregate: StudentAggregate,
    pub entry: LeaveEntry,
    pub transition: Transition,
}

/// Decoded leave collection indexed by `leave_id`.
#[derive(Debug, Clone, Default)]
pub struct LeaveBook {
    entries: Vec<LeaveEntry>,
    index: HashMap<String, usize>,
    quarantined: Vec<QuarantinedRecord>,
}

impl LeaveBook {
    pub fn decode(aggregate: &StudentAggregate, codec: &LeaveRecordCodec<'_>) -> Self {
        let decoded = aggregate.decode_leaves(codec);
        let index = decoded
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.leave_id.clone(), idx))
            .collect();
        Self {
            entries: decoded.entries,
            index,
            quarantined: decoded.quarantined,
        }
    }

    /// Newest first.
    pub fn entries(&self) -> &[LeaveEntry] {
        &self.entries
    }

    pub fn quarantined(&self) -> &[QuarantinedRecord] {
        &self.quarantined
    }

    pub fn get(&self, leave_id: &str) -> Option<&LeaveEntry> {
        self.index.get(leave_id).map(|idx| &self.entries[*idx])
    }

    fn get_mut(&mut self, leave_id: &str) -> Option<&mut LeaveEntry> {
        let idx = *self.index.get(leave_id)?;
        self.entries.get_mut(idx)
    }

    /// The full `leave` array: every entry plus the quarantined raw records.
    pub fn encode(&self, codec: &LeaveRecordCodec<'_>) -> Result<Vec<String>, CodecError> {
        codec.encode_all(&self.entries, &self.quarantined)
    }
}

pub struct LeaveLifecycleManager<'t> {
    table: &'t BsCalendarTable,
    codec: LeaveRecordCodec<'t>,
    clock: Arc<dyn Clock>,
}

impl Default for LeaveLifecycleManager<'static> {
    fn default() -> Self {
        Self::new(BsCalendarTable::builtin())
    }
}

impl<'t> LeaveLifecycleManager<'t> {
    pub fn new(table: &'t BsCalendarTable) -> Self {
        Self {
            table,
            codec: LeaveRecordCodec::new(table),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn codec(&self) -> &LeaveRecordCodec<'t> {
        &self.codec
    }

    pub fn table(&self) -> &'t BsCalendarTable {
        self.table
    }

    /// Entries a reviewer may see, newest first. Cancelled entries are left out.
    pub fn list_actionable(&self, aggregate: &StudentAggregate) -> Vec<LeaveEntry> {
        LeaveBook::decode(aggregate, &self.codec)
            .entries
            .into_iter()
            .filter(|entry| entry.status.is_actionable())
            .collect()
    }

    /// Applies `transition` in memory and returns the rewritten aggregate.
    /// Nothing is mutated when the entry is missing or already decided.
    pub fn review(
        &self,
        aggregate: &StudentAggregate,
        leave_id: &str,
        transition: Transition,
        reason: Option<&str>,
    ) -> Result<(StudentAggregate, LeaveEntry), LifecycleError> {
        let mut book = LeaveBook::decode(aggregate, &self.codec);
        let now = self.clock.now();
        let entry = book
            .get_mut(leave_id)
            .ok_or_else(|| LifecycleError::NotFound {
                leave_id: leave_id.to_string(),
                transition,
            })?;
        entry
            .apply(transition, now, reason)
            .map_err(|status| LifecycleError::InvalidTransition {
                leave_id: leave_id.to_string(),
                transition,
                status,
            })?;
        let entry = entry.clone();
        let leave = book.encode(&self.codec).map_err(|source| LifecycleError::Encode {
            leave_id: leave_id.to_string(),
            transition,
            source,
        })?;
        let mut updated = aggregate.clone();
        updated.leave = leave;
        Ok((updated, entry))
    }

    pub fn validate(
        &self,
        aggregate: &StudentAggregate,
        leave_id: &str,
        dispatcher: &mut NotificationDispatcher,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let (aggregate, entry) = self.review(aggregate, leave_id, Transition::Validate, None)?;
        Ok(self.finish(aggregate, entry, Transition::Validate, dispatcher))
    }

    pub fn reject(
        &self,
        aggregate: &StudentAggregate,
        leave_id: &str,
        reason: Option<&str>,
        dispatcher: &mut NotificationDispatcher,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let (aggregate, entry) = self.review(aggregate, leave_id, Transition::Reject, reason)?;
        Ok(self.finish(aggregate, entry, Transition::Reject, dispatcher))
    }

    pub fn validate_in_store(
        &self,
        store: &dyn StudentStore,
        dispatcher: &mut NotificationDispatcher,
        student_id: &str,
        leave_id: &str,
        timeout: Duration,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.review_in_store(store, dispatcher, student_id, leave_id, Transition::Validate, None, timeout)
    }

    pub fn reject_in_store(
        &self,
        store: &dyn StudentStore,
        dispatcher: &mut NotificationDispatcher,
        student_id: &str,
        leave_id: &str,
        reason: Option<&str>,
        timeout: Duration,
    ) -> Result<TransitionOutcome, LifecycleError> {
        self.review_in_store(store, dispatcher, student_id, leave_id, Transition::Reject, reason, timeout)
    }

    #[allow(clippy::too_many_arguments)]
    fn review_in_store(
        &self,
        store: &dyn StudentStore,
        dispatcher: &mut NotificationDispatcher,
        student_id: &str,
        leave_id: &str,
        transition: Transition,
        reason: Option<&str>,
        timeout: Duration,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let committed =
            self.commit_in_store(store, student_id, leave_id, transition, reason, timeout)?;
        Ok(self.notify_committed(committed, dispatcher))
    }

    /// The store half of a review: read, apply, write back with the version
    /// that was read. No notification is sent; pass the result to
    /// `notify_committed` for that.
    pub fn commit_in_store(
        &self,
        store: &dyn StudentStore,
        student_id: &str,
        leave_id: &str,
        transition: Transition,
        reason: Option<&str>,
        timeout: Duration,
    ) -> Result<CommittedReview, LifecycleError> {
        let store_error = |source: StoreError| LifecycleError::Store {
            leave_id: leave_id.to_string(),
            transition,
            source,
        };
        let current = store.get(student_id, timeout).map_err(store_error)?;
        let (mut updated, entry) = self.review(&current, leave_id, transition, reason)?;
        updated.version = store
            .update(&updated, current.version, timeout)
            .map_err(store_error)?;
        tracing::info!(
            student = %updated.id,
            leave_id = %entry.leave_id,
            %transition,
            status = %entry.status,
            "leave review committed"
        );
        Ok(CommittedReview {
            aggregate: updated,
            entry,
            transition,
        })
    }

    /// Notifies the applicant about a committed review.
    pub fn notify_committed(
        &self,
        committed: CommittedReview,
        dispatcher: &mut NotificationDispatcher,
    ) -> TransitionOutcome {
        let CommittedReview {
            aggregate,
            entry,
            transition,
        } = committed;
        let warnings = self.notify(&aggregate, &entry, transition, dispatcher);
        TransitionOutcome {
            aggregate,
            entry,
            warnings,
        }
    }

    fn finish(
        &self,
        aggregate: StudentAggregate,
        entry: LeaveEntry,
        transition: Transition,
        dispatcher: &mut NotificationDispatcher,
    ) -> TransitionOutcome {
        tracing::info!(
            student = %aggregate.id,
            leave_id = %entry.leave_id,
            %transition,
            status = %entry.status,
            "leave review applied"
        );
        self.notify_committed(
            CommittedReview {
                aggregate,
                entry,
                transition,
            },
            dispatcher,
        )
    }

    fn notify(
        &self,
        aggregate: &StudentAggregate,
        entry: &LeaveEntry,
        transition: Transition,
        dispatcher: &mut NotificationDispatcher,
    ) -> Vec<TransitionWarning> {
        let (title, body) = self.compose(entry, transition);
        let result = dispatcher.dispatch_at(
            aggregate.applicant_id(),
            &aggregate.parent_id,
            &title,
            &body,
            self.clock.now(),
        );
        match result {
            Ok(_) => Vec::new(),
            Err(err @ NotificationError::MissingParty(_)) => {
                vec![TransitionWarning::NotificationSkipped {
                    reason: err.to_string(),
                }]
            }
            Err(err) => vec![TransitionWarning::NotificationQueued {
                reason: err.to_string(),
                pending: dispatcher.pending_count(),
            }],
        }
    }

    fn compose(&self, entry: &LeaveEntry, transition: Transition) -> (String, String) {
        let when = self.describe_period(&entry.period);
        match transition {
            Transition::Validate => (
                "Leave validated".to_string(),
                format!(
                    "Your leave \"{}\" for {when} was validated by your parent and awaits approval.",
                    entry.title
                ),
            ),
            Transition::Reject => {
                let mut body = format!("Your leave \"{}\" for {when} was rejected.", entry.title);
                if let Some(reason) = &entry.rejection_reason {
                    body.push_str(&format!(" Reason: {reason}"));
                }
                ("Leave rejected".to_string(), body)
            }
        }
    }

    fn display_date(&self, date: NaiveDate) -> String {
        self.table
            .convert_ad_to_bs(date)
            .map(|bs| bs.to_string())
            .unwrap_or_else(|_| date.to_string())
    }

    fn describe_period(&self, period: &LeavePeriod) -> String {
        match *period {
            LeavePeriod::SingleDay { date } => self.display_date(date),
            LeavePeriod::HalfDay { date } => format!("half day on {}", self.display_date(date)),
            LeavePeriod::DateRange { from, to } => {
                format!("{} to {}", self.display_date(from), self.display_date(to))
            }
            LeavePeriod::Unconverted {
                period_type,
                from,
                to,
            } => match period_type {
                PeriodType::SingleDay => from.to_string(),
                PeriodType::HalfDay => format!("half day on {from}"),
                PeriodType::DateRange => format!("{from} to {to}"),
            },
        }
    }
}
