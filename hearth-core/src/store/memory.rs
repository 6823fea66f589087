#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{precondition_error, ProposalStore};
use crate::proposal::{ConsentProposal, ProposalStatus, SettingKey};
use crate::{Error, Result};

pub struct InMemoryProposalStore {
    proposals: RwLock<HashMap<Uuid, ConsentProposal>>,
}

impl InMemoryProposalStore {
    pub fn new() -> Self {
        Self {
            proposals: RwLock::new(HashMap::new()),
        }
    }

    /// Test hook: number of stored proposals.
    pub fn len(&self) -> usize {
        self.proposals.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn create(&self, proposal: ConsentProposal) -> Result<ConsentProposal> {
        let mut proposals = self.proposals.write().expect("lock poisoned");
        if proposals.contains_key(&proposal.id) {
            return Err(Error::Storage(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ConsentProposal>> {
        let proposals = self.proposals.read().expect("lock poisoned");
        Ok(proposals.get(id).cloned())
    }

    async fn update_conditional(
        &self,
        mut proposal: ConsentProposal,
        expected: ProposalStatus,
    ) -> Result<ConsentProposal> {
        let mut proposals = self.proposals.write().expect("lock poisoned");
        let stored = proposals
            .get(&proposal.id)
            .ok_or_else(|| Error::NotFound(proposal.id.to_string()))?;

        if stored.status != expected {
            return Err(precondition_error(&proposal.id, stored.status, expected));
        }
        if stored.revision != proposal.revision {
            return Err(Error::InvalidState(format!(
                "proposal {} was modified concurrently",
                proposal.id
            )));
        }

        proposal.revision += 1;
        proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    async fn list_pending(&self, family_id: Option<&str>) -> Result<Vec<ConsentProposal>> {
        let proposals = self.proposals.read().expect("lock poisoned");
        Ok(proposals
            .values()
            .filter(|p| p.status.is_pending())
            .filter(|p| family_id.map(|f| p.family_id == f).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_for_family(&self, family_id: &str) -> Result<Vec<ConsentProposal>> {
        let proposals = self.proposals.read().expect("lock poisoned");
        Ok(proposals
            .values()
            .filter(|p| p.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn list_cooling(&self) -> Result<Vec<ConsentProposal>> {
        let proposals = self.proposals.read().expect("lock poisoned");
        Ok(proposals
            .values()
            .filter(|p| p.status == ProposalStatus::CoolingPeriod)
            .cloned()
            .collect())
    }

    async fn latest_declined(
        &self,
        family_id: &str,
        subject_key: &SettingKey,
        proposer_id: &str,
    ) -> Result<Option<ConsentProposal>> {
        let proposals = self.proposals.read().expect("lock poisoned");
        Ok(proposals
            .values()
            .filter(|p| {
                p.status == ProposalStatus::Declined
                    && p.family_id == family_id
                    && &p.subject_key == subject_key
                    && p.proposer_id == proposer_id
            })
            .max_by_key(|p| p.resolved_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{ProposalPayload, SettingValue, SubjectType};
    use chrono::{Duration, Utc};

    fn pending_proposal() -> ConsentProposal {
        ConsentProposal::new(
            "fam-1",
            SubjectType::SafetySetting,
            SettingKey::MonitoringInterval,
            "alice",
            ProposalPayload::Setting {
                key: SettingKey::MonitoringInterval,
                current: SettingValue::Number(60),
                proposed: SettingValue::Number(30),
            },
            ProposalStatus::PendingApproval,
            Utc::now(),
            Some(Utc::now() + Duration::hours(72)),
        )
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_status() {
        let store = InMemoryProposalStore::new();
        let proposal = store.create(pending_proposal()).await.unwrap();

        let mut approved = proposal.clone();
        approved.status = ProposalStatus::Approved;
        let approved = store
            .update_conditional(approved, ProposalStatus::PendingApproval)
            .await
            .unwrap();
        assert_eq!(approved.revision, 1);

        // A racing decline read the original pending record.
        let mut declined = proposal.clone();
        declined.status = ProposalStatus::Declined;
        let err = store
            .update_conditional(declined, ProposalStatus::PendingApproval)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_revision() {
        let store = InMemoryProposalStore::new();
        let proposal = store.create(pending_proposal()).await.unwrap();

        // Two actors read revision 0; both stay pending (acknowledgment-style
        // update) but only the first write may land.
        let first = store
            .update_conditional(proposal.clone(), ProposalStatus::PendingApproval)
            .await
            .unwrap();
        assert_eq!(first.revision, 1);

        let err = store
            .update_conditional(proposal, ProposalStatus::PendingApproval)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_latest_declined_picks_most_recent() {
        let store = InMemoryProposalStore::new();

        let mut older = pending_proposal();
        older.status = ProposalStatus::Declined;
        older.resolved_at = Some(Utc::now() - Duration::days(10));
        store.create(older).await.unwrap();

        let mut newer = pending_proposal();
        newer.status = ProposalStatus::Declined;
        newer.resolved_at = Some(Utc::now() - Duration::days(2));
        let newer = store.create(newer).await.unwrap();

        let found = store
            .latest_declined("fam-1", &SettingKey::MonitoringInterval, "alice")
            .await
            .unwrap()
            .expect("should find a declined proposal");
        assert_eq!(found.id, newer.id);

        let none = store
            .latest_declined("fam-1", &SettingKey::TimeLimits, "alice")
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
