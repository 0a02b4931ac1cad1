use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::models::{Application, Submission, WorkItem};
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Template keys
// ---------------------------------------------------------------------------

pub const APPLICATION_RECEIVED: &str = "application.received";
pub const APPLICATION_SHORTLISTED: &str = "application.shortlisted";
pub const APPLICATION_REJECTED: &str = "application.rejected";
pub const APPLICATION_ACCEPTED: &str = "application.accepted";
pub const SUBMISSION_RECEIVED: &str = "submission.received";
pub const SUBMISSION_REVIEWED: &str = "submission.reviewed";
pub const WORK_ITEM_COMPLETED: &str = "work_item.completed";
pub const WORK_ITEM_RATED: &str = "work_item.rated";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub template_key: &'static str,
    pub recipients: Vec<String>,
    pub context: serde_json::Value,
}

/// Outbound delivery channel (mail, chat, push...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError>;
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        tracing::info!(
            template = notification.template_key,
            recipients = ?notification.recipients,
            context = %notification.context,
            "Notification",
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a configured URL.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        self.http
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Fire-and-forget handle used by the workflow. Sending never blocks and
/// never fails the caller; delivery happens on the worker task.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Handle plus the receiving end, for wiring a worker or inspecting in tests.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn(sink: Arc<dyn NotificationSink>) -> (Self, JoinHandle<()>) {
        let (notifier, rx) = Self::channel();
        (notifier, spawn_worker(rx, sink))
    }

    pub fn send(&self, template_key: &'static str, recipients: Vec<String>, context: serde_json::Value) {
        if recipients.is_empty() {
            return;
        }
        let notification = Notification {
            template_key,
            recipients,
            context,
        };
        if self.tx.send(notification).is_err() {
            tracing::warn!(template = template_key, "Notification worker stopped, dropping notification");
        }
    }

    pub fn application_received(&self, item: &WorkItem, application: &Application) {
        self.send(
            APPLICATION_RECEIVED,
            vec![item.owner_id.clone()],
            serde_json::json!({
                "work_item_id": item.id,
                "title": item.title,
                "application_id": application.id,
                "applicant_id": application.applicant_id,
            }),
        );
    }

    pub fn application_decided(&self, template_key: &'static str, item: &WorkItem, application: &Application) {
        self.send(
            template_key,
            vec![application.applicant_id.clone()],
            serde_json::json!({
                "work_item_id": item.id,
                "title": item.title,
                "application_id": application.id,
                "status": application.status,
                "feedback": application.feedback,
            }),
        );
    }

    pub fn submission_received(&self, item: &WorkItem, submission: &Submission) {
        self.send(
            SUBMISSION_RECEIVED,
            vec![item.owner_id.clone()],
            serde_json::json!({
                "work_item_id": item.id,
                "title": item.title,
                "submission_id": submission.id,
                "submitted_by": submission.submitted_by,
                "revision": submission.revision,
            }),
        );
    }

    pub fn submission_reviewed(&self, item: &WorkItem, submission: &Submission) {
        self.send(
            SUBMISSION_REVIEWED,
            vec![submission.submitted_by.clone()],
            serde_json::json!({
                "work_item_id": item.id,
                "title": item.title,
                "submission_id": submission.id,
                "status": submission.status,
                "feedback": submission.feedback,
            }),
        );
    }

    pub fn work_item_completed(&self, item: &WorkItem) {
        let mut recipients = item.selected.clone();
        recipients.push(item.owner_id.clone());
        self.send(
            WORK_ITEM_COMPLETED,
            recipients,
            serde_json::json!({ "work_item_id": item.id, "title": item.title }),
        );
    }

    pub fn work_item_rated(&self, item: &WorkItem, rating: u8) {
        self.send(
            WORK_ITEM_RATED,
            item.selected.clone(),
            serde_json::json!({ "work_item_id": item.id, "title": item.title, "rating": rating }),
        );
    }
}

/// Drain `rx` into `sink` until every `Notifier` is dropped. Failures are
/// logged and never retried.
pub fn spawn_worker(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Err(e) = sink.notify(&notification).await {
                tracing::warn!(
                    template = notification.template_key,
                    recipients = ?notification.recipients,
                    error = %e,
                    "Notification delivery failed",
                );
            }
        }
        tracing::debug!("Notification worker stopped");
    })
}
