#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    SafetySetting,
    AgreementChange,
    Dissolution,
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectType::SafetySetting => write!(f, "safety_setting"),
            SubjectType::AgreementChange => write!(f, "agreement_change"),
            SubjectType::Dissolution => write!(f, "dissolution"),
        }
    }
}

/// The setting axis a safety-setting proposal targets. Also the scoping
/// key for decline cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    MonitoringInterval,
    DataRetention,
    TimeLimits,
    MinimumAge,
    Custom(String),
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingKey::MonitoringInterval => write!(f, "monitoring_interval"),
            SettingKey::DataRetention => write!(f, "data_retention"),
            SettingKey::TimeLimits => write!(f, "time_limits"),
            SettingKey::MinimumAge => write!(f, "minimum_age"),
            SettingKey::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Ordered protection levels for enum-valued settings. Ordering is by
/// strictness: `Off < AlertsOnly < Standard < Strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    Off,
    AlertsOnly,
    Standard,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingValue {
    Number(i64),
    Level(ProtectionLevel),
}

/// One field of a co-parenting agreement, before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementChange {
    pub field: SettingKey,
    pub current: SettingValue,
    pub proposed: SettingValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalPayload {
    Setting {
        key: SettingKey,
        current: SettingValue,
        proposed: SettingValue,
    },
    Agreement {
        changes: Vec<AgreementChange>,
    },
    Dissolution {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    PendingApproval,
    PendingAcknowledgment,
    Approved,
    CoolingPeriod,
    Declined,
    Cancelled,
    Expired,
    Completed,
}

impl ProposalStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ProposalStatus::PendingApproval | ProposalStatus::PendingAcknowledgment
        )
    }

    /// Terminal statuses are immutable; `CoolingPeriod` is the one
    /// non-pending status with permitted secondary transitions
    /// (to `Cancelled` or `Completed`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Approved
                | ProposalStatus::Declined
                | ProposalStatus::Cancelled
                | ProposalStatus::Expired
                | ProposalStatus::Completed
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProposalStatus::PendingApproval => "pending_approval",
            ProposalStatus::PendingAcknowledgment => "pending_acknowledgment",
            ProposalStatus::Approved => "approved",
            ProposalStatus::CoolingPeriod => "cooling_period",
            ProposalStatus::Declined => "declined",
            ProposalStatus::Cancelled => "cancelled",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub guardian_id: String,
    pub acknowledged_at: DateTime<Utc>,
}

/// Per-subject deadline and cardinality rules. The three consent flows
/// share one state machine; only these parameters differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRules {
    /// How long the proposal may wait for a response. `None` means the
    /// proposal waits indefinitely (dissolution acknowledgment).
    #[serde(with = "opt_duration_serde")]
    pub pending_lifetime: Option<Duration>,
    /// Delay between approval of a protection reduction and the change
    /// taking effect.
    #[serde(with = "duration_serde")]
    pub cooling_period: Duration,
    /// Reversal window recorded for emergency increases.
    #[serde(with = "duration_serde")]
    pub review_window: Duration,
    /// Re-proposal block after a decline on the same subject key.
    #[serde(with = "duration_serde")]
    pub decline_cooldown: Duration,
    /// Whether families with more than two guardians consent via
    /// per-guardian acknowledgment instead of a single approval.
    pub multi_party: bool,
}

impl SubjectRules {
    pub fn for_subject(subject: SubjectType) -> Self {
        match subject {
            SubjectType::SafetySetting => Self {
                pending_lifetime: Some(Duration::hours(72)),
                cooling_period: Duration::hours(48),
                review_window: Duration::hours(48),
                decline_cooldown: Duration::days(7),
                multi_party: false,
            },
            SubjectType::AgreementChange => Self {
                pending_lifetime: Some(Duration::days(14)),
                cooling_period: Duration::hours(48),
                review_window: Duration::hours(48),
                decline_cooldown: Duration::days(7),
                multi_party: false,
            },
            SubjectType::Dissolution => Self {
                pending_lifetime: None,
                cooling_period: Duration::days(30),
                review_window: Duration::hours(48),
                decline_cooldown: Duration::days(7),
                multi_party: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentProposal {
    pub id: Uuid,
    pub family_id: String,
    pub subject_type: SubjectType,
    /// Cooldown and classification scoping key. For agreement bundles and
    /// dissolution this names the subject as a whole.
    pub subject_key: SettingKey,
    pub payload: ProposalPayload,
    pub proposer_id: String,
    pub status: ProposalStatus,
    /// Computed once at proposal time; immutable thereafter. Approval-time
    /// branching re-derives restrictiveness from the stored payload instead
    /// of trusting this flag.
    pub is_emergency_increase: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub review_expires_at: Option<DateTime<Utc>>,
    pub effective_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<String>,
    pub decline_reason: Option<String>,
    pub cancelled_by_uid: Option<String>,
    pub acknowledgments: Vec<Acknowledgment>,
    /// Optimistic concurrency token; bumped by the store on every
    /// successful conditional update.
    pub revision: u64,
}

impl ConsentProposal {
    pub fn new(
        family_id: impl Into<String>,
        subject_type: SubjectType,
        subject_key: SettingKey,
        proposer_id: impl Into<String>,
        payload: ProposalPayload,
        status: ProposalStatus,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            family_id: family_id.into(),
            subject_type,
            subject_key,
            payload,
            proposer_id: proposer_id.into(),
            status,
            is_emergency_increase: false,
            created_at,
            expires_at,
            review_expires_at: None,
            effective_at: None,
            resolved_at: None,
            approver_id: None,
            decline_reason: None,
            cancelled_by_uid: None,
            acknowledgments: Vec::new(),
            revision: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(deadline) => self.status.is_pending() && now > deadline,
            None => false,
        }
    }

    /// A cooling-period change is observable as "in effect" only once
    /// `effective_at` has passed.
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ProposalStatus::Approved | ProposalStatus::Completed => true,
            ProposalStatus::CoolingPeriod => self
                .effective_at
                .map(|at| now >= at)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn has_acknowledged(&self, guardian_id: &str) -> bool {
        self.acknowledgments
            .iter()
            .any(|a| a.guardian_id == guardian_id)
    }

    /// Parties entitled to cancel during the cooling period.
    pub fn is_party(&self, uid: &str) -> bool {
        self.proposer_id == uid || self.approver_id.as_deref() == Some(uid)
    }
}

pub(crate) mod duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}

pub(crate) mod opt_duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.num_seconds()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<i64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting_proposal(status: ProposalStatus) -> ConsentProposal {
        ConsentProposal::new(
            "fam-1",
            SubjectType::SafetySetting,
            SettingKey::MonitoringInterval,
            "guardian-a",
            ProposalPayload::Setting {
                key: SettingKey::MonitoringInterval,
                current: SettingValue::Number(60),
                proposed: SettingValue::Number(30),
            },
            status,
            Utc::now(),
            Some(Utc::now() + Duration::hours(72)),
        )
    }

    #[test]
    fn test_expiry_only_applies_while_pending() {
        let mut proposal = setting_proposal(ProposalStatus::PendingApproval);
        proposal.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(proposal.is_expired(Utc::now()));

        proposal.status = ProposalStatus::Approved;
        assert!(!proposal.is_expired(Utc::now()));
    }

    #[test]
    fn test_cooling_period_not_in_effect_before_effective_at() {
        let now = Utc::now();
        let mut proposal = setting_proposal(ProposalStatus::CoolingPeriod);
        proposal.effective_at = Some(now + Duration::hours(48));

        assert!(!proposal.is_in_effect(now));
        assert!(proposal.is_in_effect(now + Duration::hours(49)));
    }

    #[test]
    fn test_subject_rules_table() {
        let settings = SubjectRules::for_subject(SubjectType::SafetySetting);
        assert_eq!(settings.pending_lifetime, Some(Duration::hours(72)));
        assert_eq!(settings.cooling_period, Duration::hours(48));
        assert!(!settings.multi_party);

        let agreements = SubjectRules::for_subject(SubjectType::AgreementChange);
        assert_eq!(agreements.pending_lifetime, Some(Duration::days(14)));

        let dissolution = SubjectRules::for_subject(SubjectType::Dissolution);
        assert_eq!(dissolution.pending_lifetime, None);
        assert_eq!(dissolution.cooling_period, Duration::days(30));
        assert!(dissolution.multi_party);
    }

    #[test]
    fn test_protection_level_ordering() {
        assert!(ProtectionLevel::Off < ProtectionLevel::AlertsOnly);
        assert!(ProtectionLevel::Standard < ProtectionLevel::Strict);
    }

    #[test]
    fn test_party_check() {
        let mut proposal = setting_proposal(ProposalStatus::CoolingPeriod);
        proposal.approver_id = Some("guardian-b".into());

        assert!(proposal.is_party("guardian-a"));
        assert!(proposal.is_party("guardian-b"));
        assert!(!proposal.is_party("guardian-c"));
    }
}
