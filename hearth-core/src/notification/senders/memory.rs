use async_trait::async_trait;
use std::sync::Mutex;

use crate::notification::service::{NotificationError, NotificationSender};
use crate::notification::types::Notification;

/// Captures sent notifications for assertion in tests.
pub struct InMemorySender {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl InMemorySender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(r, _)| r == recipient)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for InMemorySender {
    fn channel_type(&self) -> &str {
        "memory"
    }

    async fn send(
        &self,
        notification: &Notification,
        recipient: &str,
    ) -> std::result::Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("lock poisoned")
            .push((recipient.to_string(), notification.clone()));
        Ok(())
    }
}
