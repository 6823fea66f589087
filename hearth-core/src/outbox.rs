#![forbid(unsafe_code)]

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditRecorder};
use crate::notification::{Notification, NotificationService};

/// Best-effort side effects, emitted only after the store transaction has
/// committed. Audit failures are logged and never roll back the state
/// transition. Notification delivery runs on a spawned task so retry
/// backoff never extends the caller's operation; a failing channel is
/// logged and otherwise ignored.
pub struct Outbox {
    audit: Arc<dyn AuditRecorder>,
    notifications: Arc<NotificationService>,
    channel: String,
}

impl Outbox {
    pub fn new(audit: Arc<dyn AuditRecorder>, notifications: Arc<NotificationService>) -> Self {
        Self {
            audit,
            notifications,
            channel: "log".to_string(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub async fn emit(
        &self,
        proposal_id: Uuid,
        entry: AuditEntry,
        sends: Vec<(String, Notification)>,
    ) {
        if let Err(e) = self.audit.record(entry).await {
            warn!(proposal_id = %proposal_id, error = %e, "audit record failed");
        }

        if sends.is_empty() {
            return;
        }

        let notifications = Arc::clone(&self.notifications);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            for (recipient, notification) in sends {
                if let Err(e) = notifications
                    .send(&channel, &notification, &recipient)
                    .await
                {
                    warn!(
                        proposal_id = %proposal_id,
                        recipient = %recipient,
                        error = %e,
                        "notification dispatch failed"
                    );
                }
            }
        });
    }
}
