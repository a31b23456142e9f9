use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use leave_calendar::{
    BsDate, Classify, ErrorKind, FixedClock, InMemoryStudentStore, LeaveBook, LeaveEntry,
    LeaveLifecycleManager, LeavePeriod, LeaveRecordCodec, LeaveStatus, LifecycleError,
    NotificationDispatcher, PeriodType, RecordingSink, StoreError, StoreResult,
    StudentAggregate, StudentStore, Transition, TransitionWarning,
};

const TIMEOUT: Duration = Duration::from_secs(1);

fn d(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn review_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 16, 9, 0, 0).unwrap()
}

fn leave(id: &str, status: LeaveStatus, applied_day: u32) -> LeaveEntry {
    let mut entry = LeaveEntry::new(
        id,
        "Cousin's wedding",
        "Travelling to Pokhara",
        LeavePeriod::DateRange {
            from: d(2024, 4, 17),
            to: d(2024, 4, 18),
        },
        Utc.with_ymd_and_hms(2024, 4, applied_day, 6, 0, 0).unwrap(),
    );
    entry.status = status;
    entry
}

fn student(entries: &[LeaveEntry]) -> StudentAggregate {
    let codec = LeaveRecordCodec::default();
    let mut student = StudentAggregate::new("stu-1", "par-1");
    student.custom_id = "S-2081-014".into();
    student.leave = entries.iter().map(|e| codec.encode(e).unwrap()).collect();
    student
}

struct Harness {
    manager: LeaveLifecycleManager<'static>,
    clock: Arc<FixedClock>,
    sink: RecordingSink,
    dispatcher: NotificationDispatcher,
    store: InMemoryStudentStore,
}

impl Harness {
    fn new(student: StudentAggregate) -> Self {
        let clock = Arc::new(FixedClock::new(review_time()));
        let sink = RecordingSink::new();
        let store = InMemoryStudentStore::new();
        store.insert(student).unwrap();
        Self {
            manager: LeaveLifecycleManager::default().with_clock(clock.clone()),
            clock,
            dispatcher: NotificationDispatcher::new(sink.clone()),
            sink,
            store,
        }
    }

    fn validate(&mut self, leave_id: &str) -> Result<leave_calendar::TransitionOutcome, LifecycleError> {
        self.manager
            .validate_in_store(&self.store, &mut self.dispatcher, "stu-1", leave_id, TIMEOUT)
    }

    fn reject(
        &mut self,
        leave_id: &str,
        reason: Option<&str>,
    ) -> Result<leave_calendar::TransitionOutcome, LifecycleError> {
        self.manager.reject_in_store(
            &self.store,
            &mut self.dispatcher,
            "stu-1",
            leave_id,
            reason,
            TIMEOUT,
        )
    }

    fn stored(&self, leave_id: &str) -> LeaveEntry {
        let student = self.store.get("stu-1", TIMEOUT).unwrap();
        LeaveBook::decode(&student, self.manager.codec())
            .get(leave_id)
            .cloned()
            .unwrap()
    }
}

#[test]
fn validating_a_pending_leave_commits_and_notifies_the_applicant() {
    let mut h = Harness::new(student(&[leave("lv-1", LeaveStatus::Pending, 15)]));

    let outcome = h.validate("lv-1").unwrap();
    assert_eq!(outcome.entry.status, LeaveStatus::Validated);
    assert_eq!(outcome.entry.validated_at, Some(review_time()));
    assert_eq!(outcome.aggregate.version, 1);
    assert!(outcome.warnings.is_empty());

    let stored = h.stored("lv-1");
    assert_eq!(stored, outcome.entry);

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].title, "Leave validated");
    assert_eq!(delivered[0].to, vec!["S-2081-014".to_string()]);
    assert_eq!(delivered[0].sender, "par-1");
    assert_eq!(delivered[0].valid, review_time() + chrono::Duration::days(1));
    assert!(delivered[0].msg.contains("2081-01-05 to 2081-01-06"));
}

fn with_raw(raw: &[&str]) -> StudentAggregate {
    let mut aggregate = student(&[]);
    aggregate.leave = raw.iter().map(|r| r.to_string()).collect();
    aggregate
}

#[test]
fn legacy_date_range_is_converted_validated_and_announced_once() {
    let mut h = Harness::new(with_raw(&[r#"{"leaveId":"legacy-range","title":"Trip",
        "reason":"Wedding","periodType":"dateRange","fromDate":"2081-01-05",
        "toDate":"2081-01-07","status":"pending","appliedAt":"2024-04-15T06:00:00Z"}"#]));

    let outcome = h.validate("legacy-range").unwrap();
    assert!(outcome.warnings.is_empty());

    let stored = h.stored("legacy-range");
    assert_eq!(
        stored.period,
        LeavePeriod::DateRange {
            from: d(2024, 4, 17),
            to: d(2024, 4, 19),
        }
    );
    assert_eq!(stored.status, LeaveStatus::Validated);
    assert_eq!(stored.validated_at, Some(review_time()));

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].msg.contains("2081-01-05 to 2081-01-07"));
}

#[test]
fn legacy_leave_past_the_table_can_still_be_reviewed() {
    let mut h = Harness::new(with_raw(&[r#"{"leaveId":"far-future","title":"Pilgrimage",
        "reason":"Family","periodType":"singleDay","date":"2086-01-05",
        "status":"pending","appliedAt":"2024-04-15T06:00:00Z"}"#]));

    let listed = h
        .manager
        .list_actionable(&h.store.get("stu-1", TIMEOUT).unwrap());
    assert_eq!(listed.len(), 1);

    let outcome = h.validate("far-future").unwrap();
    assert_eq!(outcome.entry.status, LeaveStatus::Validated);

    let stored = h.stored("far-future");
    assert_eq!(stored.status, LeaveStatus::Validated);
    assert_eq!(
        stored.period,
        LeavePeriod::Unconverted {
            period_type: PeriodType::SingleDay,
            from: BsDate::new(2086, 1, 5),
            to: BsDate::new(2086, 1, 5),
        }
    );
    let book = LeaveBook::decode(&h.store.get("stu-1", TIMEOUT).unwrap(), h.manager.codec());
    assert!(book.quarantined().is_empty());

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].msg.contains("2086-01-05"));
}

#[test]
fn commit_leaves_the_dispatcher_alone_until_notified() {
    let mut h = Harness::new(student(&[leave("lv-1", LeaveStatus::Pending, 15)]));

    let committed = h
        .manager
        .commit_in_store(&h.store, "stu-1", "lv-1", Transition::Validate, None, TIMEOUT)
        .unwrap();
    assert_eq!(committed.entry.status, LeaveStatus::Validated);
    assert_eq!(committed.aggregate.version, 1);
    assert_eq!(h.stored("lv-1").status, LeaveStatus::Validated);
    assert_eq!(h.dispatcher.pending_count(), 0);
    assert!(h.sink.delivered().is_empty());

    let outcome = h.manager.notify_committed(committed, &mut h.dispatcher);
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.aggregate.version, 1);
    assert_eq!(h.sink.delivered().len(), 1);
    assert_eq!(h.sink.delivered()[0].title, "Leave validated");
}

#[test]
fn validating_twice_fails_and_keeps_the_first_timestamp() {
    let mut h = Harness::new(student(&[leave("lv-1", LeaveStatus::Pending, 15)]));
    h.validate("lv-1").unwrap();
    h.clock.advance(chrono::Duration::hours(3));

    let err = h.validate("lv-1").unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidTransition {
            status: LeaveStatus::Validated,
            transition: Transition::Validate,
            ..
        }
    ));
    assert_eq!(err.leave_id(), "lv-1");
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    assert_eq!(h.stored("lv-1").validated_at, Some(review_time()));
    assert_eq!(h.store.get("stu-1", TIMEOUT).unwrap().version, 1);
    assert_eq!(h.sink.delivered().len(), 1);
}

#[test]
fn rejection_reason_is_kept_only_when_not_blank() {
    let mut h = Harness::new(student(&[
        leave("with-reason", LeaveStatus::Pending, 14),
        leave("blank-reason", LeaveStatus::Pending, 15),
    ]));

    let outcome = h.reject("with-reason", Some("  Exams that week  ")).unwrap();
    assert_eq!(outcome.entry.status, LeaveStatus::Rejected);
    assert_eq!(outcome.entry.rejection_reason.as_deref(), Some("Exams that week"));
    assert_eq!(outcome.entry.rejected_at, Some(review_time()));

    let outcome = h.reject("blank-reason", Some("   ")).unwrap();
    assert_eq!(outcome.entry.rejection_reason, None);

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].title, "Leave rejected");
    assert!(delivered[0].msg.ends_with("Reason: Exams that week"));
    assert!(!delivered[1].msg.contains("Reason:"));
}

#[test]
fn rejecting_a_validated_leave_leaves_it_untouched() {
    let mut validated = leave("lv-1", LeaveStatus::Validated, 15);
    validated.validated_at = Some(Utc.with_ymd_and_hms(2024, 4, 15, 10, 0, 0).unwrap());
    let mut h = Harness::new(student(&[validated.clone()]));

    let err = h.reject("lv-1", Some("too late")).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidTransition {
            status: LeaveStatus::Validated,
            transition: Transition::Reject,
            ..
        }
    ));
    assert_eq!(h.stored("lv-1"), validated);
    assert!(h.sink.delivered().is_empty());
}

#[test]
fn unknown_leave_is_not_found() {
    let mut h = Harness::new(student(&[leave("lv-1", LeaveStatus::Pending, 15)]));
    let err = h.validate("lv-404").unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }));
    assert_eq!(err.leave_id(), "lv-404");
    assert_eq!(err.transition(), Transition::Validate);
    assert_eq!(h.store.get("stu-1", TIMEOUT).unwrap().version, 0);
}

#[test]
fn missing_student_surfaces_as_not_found_store_error() {
    let mut h = Harness::new(student(&[]));
    let err = h
        .manager
        .validate_in_store(&h.store, &mut h.dispatcher, "nobody", "lv-1", TIMEOUT)
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Store {
            source: StoreError::NotFound(_),
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn failed_delivery_is_a_warning_and_stays_queued() {
    let mut h = Harness::new(student(&[leave("lv-1", LeaveStatus::Pending, 15)]));
    h.sink.fail_next(1);

    let outcome = h.validate("lv-1").unwrap();
    assert_eq!(
        outcome.warnings,
        vec![TransitionWarning::NotificationQueued {
            reason: "notification sink failed: sink rejected payload".into(),
            pending: 1,
        }]
    );
    assert_eq!(h.stored("lv-1").status, LeaveStatus::Validated);
    assert!(h.sink.delivered().is_empty());

    let pending: Vec<_> = h.dispatcher.pending().collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);

    let report = h.dispatcher.flush_at(review_time() + chrono::Duration::hours(1));
    assert_eq!(report.delivered, 1);
    assert_eq!(h.dispatcher.pending_count(), 0);
    assert_eq!(h.sink.delivered().len(), 1);
}

#[test]
fn missing_parent_skips_the_notification() {
    let mut aggregate = student(&[leave("lv-1", LeaveStatus::Pending, 15)]);
    aggregate.parent_id = String::new();
    let mut h = Harness::new(aggregate);

    let outcome = h.validate("lv-1").unwrap();
    assert!(matches!(
        outcome.warnings.as_slice(),
        [TransitionWarning::NotificationSkipped { .. }]
    ));
    assert_eq!(h.dispatcher.pending_count(), 0);
    assert_eq!(h.stored("lv-1").status, LeaveStatus::Validated);
}

#[test]
fn quarantined_records_survive_a_rewrite_verbatim() {
    let garbage = r#"{"leaveId": "broken", "periodType": "fortnight"}"#.to_string();
    let mut aggregate = student(&[leave("lv-1", LeaveStatus::Pending, 15)]);
    aggregate.leave.push(garbage.clone());
    let mut h = Harness::new(aggregate);

    let outcome = h.validate("lv-1").unwrap();
    assert_eq!(outcome.aggregate.leave.len(), 2);

    let stored = h.store.get("stu-1", TIMEOUT).unwrap();
    assert!(stored.leave.contains(&garbage));
    let book = LeaveBook::decode(&stored, h.manager.codec());
    assert_eq!(book.entries().len(), 1);
    assert_eq!(book.quarantined().len(), 1);
    assert_eq!(book.quarantined()[0].raw, garbage);
}

#[test]
fn list_actionable_hides_cancelled_and_sorts_newest_first() {
    let manager = LeaveLifecycleManager::default();
    let aggregate = student(&[
        leave("oldest", LeaveStatus::Approved, 10),
        leave("cancelled", LeaveStatus::Cancelled, 12),
        leave("newest", LeaveStatus::Pending, 14),
        leave("middle", LeaveStatus::Rejected, 11),
    ]);
    let ids: Vec<_> = manager
        .list_actionable(&aggregate)
        .into_iter()
        .map(|e| e.leave_id)
        .collect();
    assert_eq!(ids, vec!["newest", "middle", "oldest"]);
}

#[test]
fn in_memory_review_does_not_touch_the_input() {
    let manager = LeaveLifecycleManager::default();
    let aggregate = student(&[leave("lv-1", LeaveStatus::Pending, 15)]);
    let mut dispatcher = NotificationDispatcher::new(RecordingSink::new());

    let outcome = manager.validate(&aggregate, "lv-1", &mut dispatcher).unwrap();
    assert_eq!(outcome.entry.status, LeaveStatus::Validated);
    assert_ne!(outcome.aggregate.leave, aggregate.leave);
    assert_eq!(
        manager.list_actionable(&aggregate)[0].status,
        LeaveStatus::Pending
    );
}

/// Lets another writer commit between this reviewer's read and write.
struct RacingStore {
    inner: InMemoryStudentStore,
    raced: Cell<bool>,
}

impl StudentStore for RacingStore {
    fn get(&self, id: &str, timeout: Duration) -> StoreResult<StudentAggregate> {
        let snapshot = self.inner.get(id, timeout)?;
        if !self.raced.replace(true) {
            self.inner.update(&snapshot, snapshot.version, timeout)?;
        }
        Ok(snapshot)
    }

    fn update(
        &self,
        student: &StudentAggregate,
        expected_version: u64,
        timeout: Duration,
    ) -> StoreResult<u64> {
        self.inner.update(student, expected_version, timeout)
    }
}

#[test]
fn concurrent_writer_is_reported_as_a_version_conflict() {
    let inner = InMemoryStudentStore::new();
    inner
        .insert(student(&[leave("lv-1", LeaveStatus::Pending, 15)]))
        .unwrap();
    let store = RacingStore {
        inner,
        raced: Cell::new(false),
    };
    let sink = RecordingSink::new();
    let mut dispatcher = NotificationDispatcher::new(sink.clone());
    let manager = LeaveLifecycleManager::default();

    let err = manager
        .validate_in_store(&store, &mut dispatcher, "stu-1", "lv-1", TIMEOUT)
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Store {
            source: StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            },
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(sink.delivered().is_empty());

    let stored = store.inner.get("stu-1", TIMEOUT).unwrap();
    let book = LeaveBook::decode(&stored, manager.codec());
    assert_eq!(book.get("lv-1").unwrap().status, LeaveStatus::Pending);

    // A retry reads the new version and goes through.
    let outcome = manager
        .validate_in_store(&store, &mut dispatcher, "stu-1", "lv-1", TIMEOUT)
        .unwrap();
    assert_eq!(outcome.aggregate.version, 2);
}
