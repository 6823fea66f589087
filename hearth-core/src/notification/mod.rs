//! Notification dispatch for consent proposal state changes.
//!
//! Delivery is best-effort: a failing sender is logged and never affects
//! engine state.

#![forbid(unsafe_code)]

pub mod senders;
mod service;
mod types;

pub use senders::{InMemorySender, LoggingSender, WebhookSender};
pub use service::{NotificationError, NotificationSender, NotificationService, RetryPolicy};
pub use types::{
    notification_type_name, AcknowledgmentProgressNotification, CoolingPeriodNotification,
    Notification, NotificationRecord, NotificationStatus, ProposalCreatedNotification,
    ProposalResolvedNotification,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    struct FlakySender {
        fail_count: AtomicU32,
    }

    impl FlakySender {
        fn failing_n_times(n: u32) -> Self {
            Self {
                fail_count: AtomicU32::new(n),
            }
        }
    }

    #[async_trait::async_trait]
    impl NotificationSender for FlakySender {
        fn channel_type(&self) -> &str {
            "flaky"
        }

        async fn send(
            &self,
            _notification: &Notification,
            _recipient: &str,
        ) -> std::result::Result<(), NotificationError> {
            if self.fail_count.load(Ordering::SeqCst) > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                Err(NotificationError::Retryable("test failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_notification() -> Notification {
        Notification::ProposalCreated(ProposalCreatedNotification {
            proposal_id: Uuid::new_v4(),
            family_id: "fam-1".into(),
            subject_type: "safety_setting".into(),
            proposer_id: "alice".into(),
            expires_at: None,
        })
    }

    #[tokio::test]
    async fn test_send_records_success() {
        let service = NotificationService::new();
        service.register_sender(Arc::new(InMemorySender::new()));

        let record = service
            .send("memory", &sample_notification(), "bob")
            .await
            .unwrap();
        assert_eq!(record.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_record_carries_proposal_context() {
        let service = NotificationService::new();
        service.register_sender(Arc::new(InMemorySender::new()));

        let notification = sample_notification();
        let record = service
            .send("memory", &notification, "bob")
            .await
            .unwrap();

        // Proposal context on the record comes from the payload, not the
        // caller.
        assert_eq!(record.proposal_id, notification.proposal_id());
        assert_eq!(record.notification_type, "proposal_created");
        assert_eq!(
            service.records_for(&notification.proposal_id()).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let service = NotificationService::new().with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
        service.register_sender(Arc::new(FlakySender::failing_n_times(2)));

        let result = service.send("flaky", &sample_notification(), "bob").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_channel_fails() {
        let service = NotificationService::new();
        let err = service
            .send("missing", &sample_notification(), "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::ChannelNotConfigured(_)));
    }
}
