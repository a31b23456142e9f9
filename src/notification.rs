use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification has no {0}")]
    MissingParty(&'static str),
    #[error("notification sink failed: {0}")]
    Delivery(String),
}

impl NotificationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotificationError::Delivery(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub recipient_id: String,
    pub sender_id: String,
    pub issued_at: DateTime<Utc>,
    /// One day after `issued_at`. The dispatcher drops the message once
    /// this has passed.
    pub expires_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        recipient_id: &str,
        sender_id: &str,
        title: impl Into<String>,
        body: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, NotificationError> {
        if recipient_id.trim().is_empty() {
            return Err(NotificationError::MissingParty("recipient"));
        }
        if sender_id.trim().is_empty() {
            return Err(NotificationError::MissingParty("sender"));
        }
        Ok(Self {
            title: title.into(),
            body: body.into(),
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.to_string(),
            issued_at,
            expires_at: issued_at + Duration::days(1),
        })
    }

    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            title: self.title.clone(),
            msg: self.body.clone(),
            to: vec![self.recipient_id.clone()],
            sender: self.sender_id.clone(),
            valid: self.expires_at,
            date: self.issued_at,
        }
    }
}

/// Body of the sink's create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub msg: String,
    pub to: Vec<String>,
    pub sender: String,
    pub valid: DateTime<Utc>,
    pub date: DateTime<Utc>,
}

pub trait NotificationSink {
    fn create(&self, payload: &NotificationPayload) -> Result<(), NotificationError>;
}

/// Writes each notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn create(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        tracing::info!(
            title = %payload.title,
            to = ?payload.to,
            sender = %payload.sender,
            valid = %payload.valid,
            "notification created"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    delivered: Vec<NotificationPayload>,
    failures_left: usize,
}

/// Keeps delivered payloads in memory. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` deliveries fail.
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.failures_left = count;
        }
    }

    pub fn delivered(&self) -> Vec<NotificationPayload> {
        self.state
            .lock()
            .map(|state| state.delivered.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn create(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NotificationError::Delivery("recording sink poisoned".into()))?;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(NotificationError::Delivery("sink rejected payload".into()));
        }
        state.delivered.push(payload.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotification {
    pub message: NotificationMessage,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: Vec<(NotificationMessage, NotificationError)>,
    /// Expired or out of attempts; removed from the outbox for good.
    pub dropped: Vec<NotificationMessage>,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// At-least-once delivery: messages sit in an outbox until the sink accepts
/// them. Failed deliveries stay queued for the next flush until they expire
/// or run out of attempts.
pub struct NotificationDispatcher {
    sink: Box<dyn NotificationSink + Send>,
    outbox: VecDeque<PendingNotification>,
    max_attempts: u32,
}

impl NotificationDispatcher {
    pub fn new<S: NotificationSink + Send + 'static>(sink: S) -> Self {
        Self {
            sink: Box::new(sink),
            outbox: VecDeque::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Clamped to at least one attempt.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingNotification> {
        self.outbox.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.outbox.len()
    }

    pub fn enqueue(&mut self, message: NotificationMessage) {
        self.outbox.push_back(PendingNotification {
            message,
            attempts: 0,
            last_error: None,
        });
    }

    pub fn flush(&mut self) -> FlushReport {
        self.flush_at(Utc::now())
    }

    /// Tries every queued message once, oldest first. Messages whose
    /// `expires_at` is before `now` are dropped without an attempt.
    pub fn flush_at(&mut self, now: DateTime<Utc>) -> FlushReport {
        let mut report = FlushReport::default();
        let mut retained = VecDeque::with_capacity(self.outbox.len());
        while let Some(mut pending) = self.outbox.pop_front() {
            if pending.message.expires_at < now {
                tracing::warn!(
                    recipient = %pending.message.recipient_id,
                    attempts = pending.attempts,
                    expires_at = %pending.message.expires_at,
                    "dropping expired notification"
                );
                report.dropped.push(pending.message);
                continue;
            }
            pending.attempts += 1;
            match self.sink.create(&pending.message.payload()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    pending.last_error = Some(err.to_string());
                    report.failed.push((pending.message.clone(), err.clone()));
                    if pending.attempts >= self.max_attempts {
                        tracing::warn!(
                            recipient = %pending.message.recipient_id,
                            attempts = pending.attempts,
                            error = %err,
                            "dropping notification after final attempt"
                        );
                        report.dropped.push(pending.message);
                    } else {
                        tracing::warn!(
                            recipient = %pending.message.recipient_id,
                            attempts = pending.attempts,
                            error = %err,
                            "notification delivery failed; keeping it queued"
                        );
                        retained.push_back(pending);
                    }
                }
            }
        }
        self.outbox = retained;
        report
    }

    /// Builds, queues and flushes one message issued now.
    pub fn dispatch(
        &mut self,
        recipient_id: &str,
        sender_id: &str,
        title: &str,
        body: &str,
    ) -> Result<NotificationMessage, NotificationError> {
        self.dispatch_at(recipient_id, sender_id, title, body, Utc::now())
    }

    pub fn dispatch_at(
        &mut self,
        recipient_id: &str,
        sender_id: &str,
        title: &str,
        body: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<NotificationMessage, NotificationError> {
        let message = match NotificationMessage::new(recipient_id, sender_id, title, body, issued_at)
        {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(recipient = recipient_id, error = %err, "skipping notification");
                return Err(err);
            }
        };
        self.enqueue(message.clone());
        let report = self.flush_at(issued_at);
        match report.failed.into_iter().find(|(failed, _)| *failed == message) {
            Some((_, err)) => Err(err),
            None => Ok(message),
        }
    }
}
