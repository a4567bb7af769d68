//! Outbound notifications. Delivery is best effort: a failed send is logged
//! and never undoes the committed change that triggered it.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_email(&self, recipients: &[String], subject: &str, body: &str)
    -> Result<(), NotifyError>;
}

/// Sink that only logs. Used when no mail transport is wired in.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        info!(recipients = recipients.len(), subject, body, "notification");
        Ok(())
    }
}

/// Sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError("mail transport unavailable".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError("lock poisoned".to_string()))?;
        sent.push(Email {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Send and swallow failures.
pub async fn notify_best_effort(
    sink: &dyn NotificationSink,
    recipients: &[String],
    subject: &str,
    body: &str,
) {
    if recipients.is_empty() {
        return;
    }
    if let Err(err) = sink.send_email(recipients, subject, body).await {
        warn!(error = %err, subject, "notification not delivered");
    }
}
