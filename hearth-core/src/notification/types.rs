//! Notification type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ProposalCreated(ProposalCreatedNotification),
    ProposalResolved(ProposalResolvedNotification),
    CoolingPeriodStarted(CoolingPeriodNotification),
    AcknowledgmentProgress(AcknowledgmentProgressNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalCreatedNotification {
    pub proposal_id: Uuid,
    pub family_id: String,
    pub subject_type: String,
    pub proposer_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of a transition out of a pending state, or a cooling-period
/// cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResolvedNotification {
    pub proposal_id: Uuid,
    pub family_id: String,
    pub subject_type: String,
    pub outcome: String,
    pub resolved_by: Option<String>,
    pub decline_reason: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingPeriodNotification {
    pub proposal_id: Uuid,
    pub family_id: String,
    pub subject_type: String,
    pub approved_by: String,
    pub effective_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgmentProgressNotification {
    pub proposal_id: Uuid,
    pub family_id: String,
    pub acknowledged_by: String,
    pub acknowledged_count: usize,
    pub required_count: usize,
    pub is_complete: bool,
}

impl Notification {
    /// Every notification concerns exactly one proposal.
    pub fn proposal_id(&self) -> Uuid {
        match self {
            Notification::ProposalCreated(n) => n.proposal_id,
            Notification::ProposalResolved(n) => n.proposal_id,
            Notification::CoolingPeriodStarted(n) => n.proposal_id,
            Notification::AcknowledgmentProgress(n) => n.proposal_id,
        }
    }

    pub fn family_id(&self) -> &str {
        match self {
            Notification::ProposalCreated(n) => &n.family_id,
            Notification::ProposalResolved(n) => &n.family_id,
            Notification::CoolingPeriodStarted(n) => &n.family_id,
            Notification::AcknowledgmentProgress(n) => &n.family_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub recipient_id: String,
    pub channel: String,
    pub notification_type: String,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

pub fn notification_type_name(notification: &Notification) -> String {
    match notification {
        Notification::ProposalCreated(_) => "proposal_created".into(),
        Notification::ProposalResolved(_) => "proposal_resolved".into(),
        Notification::CoolingPeriodStarted(_) => "cooling_period_started".into(),
        Notification::AcknowledgmentProgress(_) => "acknowledgment_progress".into(),
    }
}
