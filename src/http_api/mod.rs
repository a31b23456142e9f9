use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::attendance::{AttendanceReconciler, MonthGrid, MonthlyReport};
use crate::calendar::{CalendarDataset, today_ad};
use crate::codec::QuarantinedRecord;
use crate::error::{Classify, ErrorKind};
use crate::leave::{LeaveEntry, Transition};
use crate::lifecycle::{LeaveBook, LeaveLifecycleManager, LifecycleError, TransitionWarning};
use crate::notification::NotificationDispatcher;
use crate::persistence::{StoreError, StudentStore};
use crate::student::StudentAggregate;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn StudentStore + Send + Sync>,
    dispatcher: Arc<Mutex<NotificationDispatcher>>,
    dataset: Arc<CalendarDataset>,
    manager: Arc<LeaveLifecycleManager<'static>>,
    store_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StudentStore + Send + Sync>,
        dispatcher: NotificationDispatcher,
        dataset: Arc<CalendarDataset>,
    ) -> Self {
        Self {
            store,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            dataset,
            manager: Arc::new(LeaveLifecycleManager::default()),
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_manager(mut self, manager: LeaveLifecycleManager<'static>) -> Self {
        self.manager = Arc::new(manager);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    leave_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition: Option<Transition>,
}

#[derive(Debug)]
struct ApiError {
    kind: ErrorKind,
    message: String,
    leave_id: Option<String>,
    transition: Option<Transition>,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            leave_id: None,
            transition: None,
        }
    }

    fn task_failed(err: tokio::task::JoinError, transition: Option<Transition>) -> Self {
        Self {
            kind: ErrorKind::Storage,
            message: format!("store task failed: {err}"),
            leave_id: None,
            transition,
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::TransientIo => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Parse | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(value: LifecycleError) -> Self {
        Self {
            kind: value.kind(),
            message: value.to_string(),
            leave_id: Some(value.leave_id().to_string()),
            transition: Some(value.transition()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self {
            kind: value.kind(),
            message: value.to_string(),
            leave_id: None,
            transition: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(kind = self.kind.as_str(), message = %self.message, "request failed");
        }
        let status = self.status();
        let body = Json(ErrorBody {
            error: self.kind.as_str(),
            message: self.message,
            leave_id: self.leave_id,
            transition: self.transition,
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RejectPayload {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct LeaveListing {
    entries: Vec<LeaveEntry>,
    quarantined: Vec<QuarantinedRecord>,
}

#[derive(Debug, Serialize)]
struct TransitionResponse {
    entry: LeaveEntry,
    version: u64,
    warnings: Vec<TransitionWarning>,
}

#[derive(Debug, Serialize)]
struct AttendanceResponse {
    grid: MonthGrid,
    report: Option<MonthlyReport>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/students/:id/leaves", get(list_leaves))
        .route(
            "/students/:id/leaves/:leave_id/validate",
            post(validate_leave),
        )
        .route("/students/:id/leaves/:leave_id/reject", post(reject_leave))
        .route("/students/:id/attendance/:year/:month", get(attendance))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_leaves(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<LeaveListing>, ApiError> {
    let student = load_student(&state, student_id).await?;
    let book = LeaveBook::decode(&student, state.manager.codec());
    let entries = book
        .entries()
        .iter()
        .filter(|entry| entry.status.is_actionable())
        .cloned()
        .collect();
    Ok(Json(LeaveListing {
        entries,
        quarantined: book.quarantined().to_vec(),
    }))
}

async fn load_student(state: &AppState, student_id: String) -> Result<StudentAggregate, ApiError> {
    let store = Arc::clone(&state.store);
    let timeout = state.store_timeout;
    tokio::task::spawn_blocking(move || store.get(&student_id, timeout))
        .await
        .map_err(|err| ApiError::task_failed(err, None))?
        .map_err(ApiError::from)
}

async fn validate_leave(
    State(state): State<AppState>,
    Path((student_id, leave_id)): Path<(String, String)>,
) -> Result<Json<TransitionResponse>, ApiError> {
    review(&state, student_id, leave_id, Transition::Validate, None)
        .await
        .map(Json)
}

async fn reject_leave(
    State(state): State<AppState>,
    Path((student_id, leave_id)): Path<(String, String)>,
    payload: Option<Json<RejectPayload>>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    review(&state, student_id, leave_id, Transition::Reject, payload.reason)
        .await
        .map(Json)
}

/// Runs the blocking store round trip off the async workers; the dispatcher
/// is locked only while the notification goes out.
async fn review(
    state: &AppState,
    student_id: String,
    leave_id: String,
    transition: Transition,
    reason: Option<String>,
) -> Result<TransitionResponse, ApiError> {
    let store = Arc::clone(&state.store);
    let manager = Arc::clone(&state.manager);
    let timeout = state.store_timeout;
    let committed = tokio::task::spawn_blocking(move || {
        manager.commit_in_store(
            store.as_ref(),
            &student_id,
            &leave_id,
            transition,
            reason.as_deref(),
            timeout,
        )
    })
    .await
    .map_err(|err| ApiError::task_failed(err, Some(transition)))??;

    let outcome = {
        let mut dispatcher = state.dispatcher.lock();
        state.manager.notify_committed(committed, &mut dispatcher)
    };
    Ok(TransitionResponse {
        version: outcome.aggregate.version,
        entry: outcome.entry,
        warnings: outcome.warnings,
    })
}

async fn attendance(
    State(state): State<AppState>,
    Path((student_id, year, month)): Path<(String, i32, u32)>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let visible = state
        .dataset
        .visible(year, month)
        .ok_or_else(|| ApiError::not_found(format!("month {year}-{month} is not in the calendar")))?;
    let student = load_student(&state, student_id).await?;
    let entries = LeaveBook::decode(&student, state.manager.codec()).entries().to_vec();
    let absent = student.absent_dates();

    let reconciler = AttendanceReconciler::new(state.manager.table());
    let leave_days = reconciler.expand_approved_leave_dates(&entries);
    let grid = reconciler.render_grid(&visible, &absent, &leave_days, today_ad());
    let report = reconciler.monthly_report_for(&visible, &absent, &entries);
    Ok(Json(AttendanceResponse { grid, report }))
}
