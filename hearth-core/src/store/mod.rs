#![forbid(unsafe_code)]

mod memory;
mod redb_store;

use async_trait::async_trait;
use uuid::Uuid;

use crate::proposal::{ConsentProposal, ProposalStatus, SettingKey};
use crate::Result;

pub use memory::InMemoryProposalStore;
pub use redb_store::{RedbProposalStore, RedbStorage};

/// Durable proposal state. Every state-changing engine operation goes
/// through `update_conditional`, which must be an atomic read-modify-write:
/// the write succeeds only if the stored status still equals `expected`
/// and the stored revision equals the caller's read revision. A failed
/// precondition means another actor already resolved the proposal, and the
/// call fails with `InvalidState` rather than silently overwriting.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn create(&self, proposal: ConsentProposal) -> Result<ConsentProposal>;

    async fn get(&self, id: &Uuid) -> Result<Option<ConsentProposal>>;

    /// `proposal.revision` must carry the revision the caller read; the
    /// store bumps it on success.
    async fn update_conditional(
        &self,
        proposal: ConsentProposal,
        expected: ProposalStatus,
    ) -> Result<ConsentProposal>;

    /// Proposals in `pending_approval` or `pending_acknowledgment`,
    /// optionally scoped to one family.
    async fn list_pending(&self, family_id: Option<&str>) -> Result<Vec<ConsentProposal>>;

    async fn list_for_family(&self, family_id: &str) -> Result<Vec<ConsentProposal>>;

    /// Proposals in `cooling_period`, for the completion sweep.
    async fn list_cooling(&self) -> Result<Vec<ConsentProposal>>;

    /// Most recent declined proposal for the cooldown tuple, by
    /// `resolved_at`. Declined records are never deleted, so this is a
    /// derived view rather than a stored entity.
    async fn latest_declined(
        &self,
        family_id: &str,
        subject_key: &SettingKey,
        proposer_id: &str,
    ) -> Result<Option<ConsentProposal>>;
}

pub(crate) fn precondition_error(
    id: &Uuid,
    stored: ProposalStatus,
    expected: ProposalStatus,
) -> crate::Error {
    crate::Error::InvalidState(format!(
        "proposal {} is {}, expected {}",
        id, stored, expected
    ))
}
