use async_trait::async_trait;

use crate::notification::service::{NotificationError, NotificationSender};
use crate::notification::types::{notification_type_name, Notification};

/// Default channel. Writes each notification to the structured log with
/// its proposal and family context instead of delivering it anywhere;
/// deployments without a configured channel still get a visible trail.
pub struct LoggingSender;

impl LoggingSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for LoggingSender {
    fn channel_type(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        notification: &Notification,
        recipient: &str,
    ) -> std::result::Result<(), NotificationError> {
        tracing::info!(
            recipient = %recipient,
            proposal_id = %notification.proposal_id(),
            family_id = %notification.family_id(),
            kind = %notification_type_name(notification),
            "consent notification"
        );
        Ok(())
    }
}
