//! Delivery of consent notifications over registered channels.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

use super::types::{notification_type_name, Notification, NotificationRecord, NotificationStatus};

/// Backoff schedule for transient channel failures. The delay doubles on
/// each retry, from `initial_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    ChannelNotConfigured(String),
    Retryable(String),
    Permanent(String),
}

impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelNotConfigured(ch) => write!(f, "channel not configured: {}", ch),
            Self::Retryable(msg) => write!(f, "retryable error: {}", msg),
            Self::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

impl std::error::Error for NotificationError {}

impl NotificationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel_type(&self) -> &str;
    async fn send(
        &self,
        notification: &Notification,
        recipient: &str,
    ) -> std::result::Result<(), NotificationError>;
}

/// Channel registry plus a per-proposal delivery ledger. `send` retries
/// transient failures with backoff and sleeps between attempts, so callers
/// on an engine operation's path run it from a spawned task (see `Outbox`).
pub struct NotificationService {
    senders: RwLock<HashMap<String, Arc<dyn NotificationSender>>>,
    retry_policy: RetryPolicy,
    records: Mutex<Vec<NotificationRecord>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            retry_policy: RetryPolicy::default(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn register_sender(&self, sender: Arc<dyn NotificationSender>) {
        self.senders
            .write()
            .expect("lock poisoned")
            .insert(sender.channel_type().to_string(), sender);
    }

    /// Deliver one notification to one guardian. The proposal context on
    /// the record comes from the notification itself.
    pub async fn send(
        &self,
        channel: &str,
        notification: &Notification,
        recipient: &str,
    ) -> std::result::Result<NotificationRecord, NotificationError> {
        let sender = {
            let senders = self.senders.read().expect("lock poisoned");
            senders.get(channel).cloned()
        }
        .ok_or_else(|| NotificationError::ChannelNotConfigured(channel.to_string()))?;

        let mut record = NotificationRecord {
            id: Uuid::new_v4(),
            proposal_id: notification.proposal_id(),
            recipient_id: recipient.to_string(),
            channel: channel.to_string(),
            notification_type: notification_type_name(notification),
            status: NotificationStatus::Pending,
            sent_at: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        };

        let attempts = self.retry_policy.max_attempts.max(1);
        let mut result: std::result::Result<(), NotificationError> = Ok(());
        for attempt in 1..=attempts {
            record.retry_count = attempt - 1;
            result = sender.send(notification, recipient).await;
            match &result {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tokio::time::sleep(self.retry_policy.delay_before_retry(attempt)).await;
                }
                Err(_) => break,
            }
        }

        match &result {
            Ok(()) => {
                record.status = NotificationStatus::Sent;
                record.sent_at = Some(Utc::now());
            }
            Err(e) => {
                record.status = NotificationStatus::Failed;
                record.error_message = Some(e.to_string());
            }
        }

        self.records
            .lock()
            .expect("lock poisoned")
            .push(record.clone());

        result.map(|_| record)
    }

    pub fn records_for(&self, proposal_id: &Uuid) -> Vec<NotificationRecord> {
        self.records
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|r| &r.proposal_id == proposal_id)
            .cloned()
            .collect()
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}
