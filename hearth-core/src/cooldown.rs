#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::proposal::{SettingKey, SubjectRules};
use crate::store::ProposalStore;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub blocked: bool,
    pub ends_at: Option<DateTime<Utc>>,
}

impl CooldownStatus {
    pub fn clear() -> Self {
        Self {
            blocked: false,
            ends_at: None,
        }
    }
}

/// Blocks re-proposal of a declined change for a fixed window. Consulted
/// only at propose time; the window is derived from the most recent
/// declined proposal for the `(family, subject_key, proposer)` tuple.
pub struct CooldownGuard {
    store: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
}

impl CooldownGuard {
    pub fn new(store: Arc<dyn ProposalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn check(
        &self,
        family_id: &str,
        subject_key: &SettingKey,
        proposer_id: &str,
        rules: &SubjectRules,
    ) -> Result<CooldownStatus> {
        let declined = self
            .store
            .latest_declined(family_id, subject_key, proposer_id)
            .await?;

        let Some(declined) = declined else {
            return Ok(CooldownStatus::clear());
        };
        let Some(resolved_at) = declined.resolved_at else {
            return Ok(CooldownStatus::clear());
        };

        let ends_at = resolved_at + rules.decline_cooldown;
        if self.clock.now() < ends_at {
            Ok(CooldownStatus {
                blocked: true,
                ends_at: Some(ends_at),
            })
        } else {
            Ok(CooldownStatus::clear())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::proposal::{
        ConsentProposal, ProposalPayload, ProposalStatus, SettingValue, SubjectType,
    };
    use crate::store::InMemoryProposalStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_cooldown_window() {
        let store = Arc::new(InMemoryProposalStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = CooldownGuard::new(store.clone(), clock.clone());
        let rules = SubjectRules::for_subject(SubjectType::SafetySetting);

        let status = guard
            .check("fam-1", &SettingKey::TimeLimits, "alice", &rules)
            .await
            .unwrap();
        assert!(!status.blocked);

        let mut declined = ConsentProposal::new(
            "fam-1",
            SubjectType::SafetySetting,
            SettingKey::TimeLimits,
            "alice",
            ProposalPayload::Setting {
                key: SettingKey::TimeLimits,
                current: SettingValue::Number(60),
                proposed: SettingValue::Number(120),
            },
            ProposalStatus::Declined,
            clock.now(),
            None,
        );
        let decline_time = clock.now();
        declined.resolved_at = Some(decline_time);
        store.create(declined).await.unwrap();

        clock.advance(Duration::days(3));
        let status = guard
            .check("fam-1", &SettingKey::TimeLimits, "alice", &rules)
            .await
            .unwrap();
        assert!(status.blocked);
        assert_eq!(status.ends_at, Some(decline_time + Duration::days(7)));

        clock.advance(Duration::days(5));
        let status = guard
            .check("fam-1", &SettingKey::TimeLimits, "alice", &rules)
            .await
            .unwrap();
        assert!(!status.blocked);
    }
}
