use async_trait::async_trait;
use chrono::Utc;

use crate::notification::service::{NotificationError, NotificationSender};
use crate::notification::types::{notification_type_name, Notification};

/// Posts the notification as JSON to the recipient URL. When a signing
/// secret is configured the request carries an HMAC-SHA256 signature over
/// `"{timestamp}.{body}"` so the receiver can verify origin and freshness.
pub struct WebhookSender {
    client: reqwest::Client,
    secret: Option<String>,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    fn sign_payload(timestamp: i64, payload: &str, secret: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let signature_input = format!("{}.{}", timestamp, payload);
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(signature_input.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn channel_type(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        notification: &Notification,
        recipient: &str,
    ) -> std::result::Result<(), NotificationError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| NotificationError::Permanent(format!("serialize failed: {}", e)))?;

        let mut request = self
            .client
            .post(recipient)
            .header("content-type", "application/json")
            .header(
                "x-hearth-notification",
                notification_type_name(notification),
            );

        if let Some(secret) = &self.secret {
            let timestamp = Utc::now().timestamp();
            let signature = Self::sign_payload(timestamp, &payload, secret);
            request = request
                .header("x-hearth-timestamp", timestamp.to_string())
                .header("x-hearth-signature", signature);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| NotificationError::Retryable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(NotificationError::Retryable(format!(
                "webhook returned {}",
                status
            )))
        } else {
            Err(NotificationError::Permanent(format!(
                "webhook returned {}",
                status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic() {
        let a = WebhookSender::sign_payload(1700000000, r#"{"type":"proposal_created"}"#, "s3cr3t");
        let b = WebhookSender::sign_payload(1700000000, r#"{"type":"proposal_created"}"#, "s3cr3t");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other = WebhookSender::sign_payload(1700000001, r#"{"type":"proposal_created"}"#, "s3cr3t");
        assert_ne!(a, other);
    }
}
