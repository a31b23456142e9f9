#![cfg(feature = "http_api")]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use chrono::{NaiveDate, TimeZone, Utc};
use leave_calendar::{
    BsCalendarTable, CalendarDataset, FixedClock, InMemoryStudentStore, LeaveEntry,
    LeaveLifecycleManager, LeavePeriod, LeaveRecordCodec, LeaveStatus, NotificationDispatcher,
    RecordingSink, StudentAggregate, http_api,
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

fn d(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn leave(id: &str, status: LeaveStatus, date: NaiveDate) -> LeaveEntry {
    let mut entry = LeaveEntry::new(
        id,
        "Fever",
        "Doctor's advice",
        LeavePeriod::SingleDay { date },
        Utc.with_ymd_and_hms(2024, 4, 15, 8, 0, 0).unwrap(),
    );
    entry.status = status;
    entry
}

fn seeded_store() -> InMemoryStudentStore {
    let codec = LeaveRecordCodec::default();
    let mut student = StudentAggregate::new("stu-1", "par-1");
    student.absent = vec!["2024-04-17".into()];
    student.leave = vec![
        codec.encode(&leave("pending", LeaveStatus::Pending, d(2024, 4, 20))).unwrap(),
        codec.encode(&leave("approved", LeaveStatus::Approved, d(2024, 4, 17))).unwrap(),
        codec.encode(&leave("cancelled", LeaveStatus::Cancelled, d(2024, 4, 21))).unwrap(),
        "{broken".into(),
    ];
    let store = InMemoryStudentStore::new();
    store.insert(student).unwrap();
    store
}

fn new_router(sink: RecordingSink) -> axum::Router {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 4, 16, 9, 0, 0).unwrap()));
    let dataset = Arc::new(CalendarDataset::from_table(BsCalendarTable::builtin()));
    let state = http_api::AppState::new(
        Arc::new(store),
        NotificationDispatcher::new(sink),
        dataset,
    )
    .with_manager(LeaveLifecycleManager::default().with_clock(clock));
    http_api::router(state)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let app = new_router(RecordingSink::new());
    let (status, body) = send(&app, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn leave_listing_hides_cancelled_and_reports_quarantine() {
    let app = new_router(RecordingSink::new());
    let (status, body) = send(&app, request("GET", "/students/stu-1/leaves", None)).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<_> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["leaveId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&"cancelled".to_string()));
    assert_eq!(body["quarantined"][0]["raw"], "{broken");
}

#[tokio::test]
async fn validate_then_validate_again_conflicts() {
    let sink = RecordingSink::new();
    let app = new_router(sink.clone());

    let (status, body) = send(
        &app,
        request("POST", "/students/stu-1/leaves/pending/validate", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "validated");
    assert_eq!(body["entry"]["validatedAt"], "2024-04-16T09:00:00Z");
    assert_eq!(body["version"], 1);
    assert_eq!(body["warnings"], json!([]));
    assert_eq!(sink.delivered().len(), 1);

    let (status, body) = send(
        &app,
        request("POST", "/students/stu-1/leaves/pending/validate", None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
    assert_eq!(body["leave_id"], "pending");
    assert_eq!(body["transition"], "validate");
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test]
async fn reject_accepts_an_optional_reason() {
    let app = new_router(RecordingSink::new());

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/students/stu-1/leaves/pending/reject",
            Some(json!({ "reason": "Unit test week" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "rejected");
    assert_eq!(body["entry"]["rejectionReason"], "Unit test week");

    let (status, body) = send(
        &app,
        request("POST", "/students/stu-1/leaves/approved/reject", None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["transition"], "reject");
}

#[tokio::test]
async fn unknown_student_and_leave_are_not_found() {
    let app = new_router(RecordingSink::new());

    let (status, body) = send(&app, request("GET", "/students/ghost/leaves", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(
        &app,
        request("POST", "/students/stu-1/leaves/nope/validate", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["leave_id"], "nope");
}

#[tokio::test]
async fn attendance_month_merges_absence_and_leave() {
    let app = new_router(RecordingSink::new());

    let (status, body) = send(&app, request("GET", "/students/stu-1/attendance/2081/1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grid"]["cells"].as_array().unwrap().len(), 31);

    let fifth = &body["grid"]["cells"][4];
    assert_eq!(fifth["ad"], "2024-04-17");
    assert_eq!(fifth["markers"]["absent"], true);
    assert_eq!(fifth["markers"]["on_leave"], true);

    assert_eq!(body["report"]["absences"][0]["bs"], "2081-01-05");
    assert_eq!(body["report"]["leaves"][0]["leave_id"], "approved");

    let (status, _) = send(&app, request("GET", "/students/stu-1/attendance/2099/1", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn attendance_report_uses_the_configured_table() {
    let builtin = BsCalendarTable::builtin();
    let lengths: Vec<[u8; 12]> = (2081..=2085)
        .map(|year| {
            let mut months = [0u8; 12];
            for (month, len) in months.iter_mut().enumerate() {
                *len = builtin.month_length(year, month as u32 + 1).unwrap() as u8;
            }
            months
        })
        .collect();
    // Baisakh 1 one day later than the built-in table puts it.
    let shifted: &'static BsCalendarTable = Box::leak(Box::new(
        BsCalendarTable::from_month_lengths(2081, d(2024, 4, 14), lengths),
    ));

    let state = http_api::AppState::new(
        Arc::new(seeded_store()),
        NotificationDispatcher::new(RecordingSink::new()),
        Arc::new(CalendarDataset::from_table(builtin)),
    )
    .with_manager(LeaveLifecycleManager::new(shifted));
    let app = http_api::router(state);

    let (status, body) = send(&app, request("GET", "/students/stu-1/attendance/2081/1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["absences"][0]["ad"], "2024-04-17");
    assert_eq!(body["report"]["absences"][0]["bs"], "2081-01-04");
}
