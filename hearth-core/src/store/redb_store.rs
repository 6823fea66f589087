#![forbid(unsafe_code)]

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{precondition_error, ProposalStore};
use crate::proposal::{ConsentProposal, ProposalStatus, SettingKey};
use crate::{Error, Result};

const PROPOSALS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("proposals");

pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| Error::Storage(e.to_string()))?;

        {
            let wtxn = db
                .begin_write()
                .map_err(|e| Error::Storage(e.to_string()))?;
            wtxn.open_table(PROPOSALS_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
            wtxn.commit().map_err(|e| Error::Storage(e.to_string()))?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    pub fn proposal_store(&self) -> RedbProposalStore {
        RedbProposalStore {
            db: Arc::clone(&self.db),
        }
    }
}

pub struct RedbProposalStore {
    db: Arc<Database>,
}

impl RedbProposalStore {
    fn scan<F>(&self, mut keep: F) -> Result<Vec<ConsentProposal>>
    where
        F: FnMut(&ConsentProposal) -> bool,
    {
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let table = rtxn
            .open_table(PROPOSALS_TABLE)
            .map_err(|e| Error::Storage(e.to_string()))?;

        let mut matches = Vec::new();
        for result in table.iter().map_err(|e| Error::Storage(e.to_string()))? {
            let (_, value) = result.map_err(|e| Error::Storage(e.to_string()))?;
            let proposal: ConsentProposal =
                bincode::deserialize(value.value()).map_err(|e| Error::Serialization(e.to_string()))?;
            if keep(&proposal) {
                matches.push(proposal);
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl ProposalStore for RedbProposalStore {
    async fn create(&self, proposal: ConsentProposal) -> Result<ConsentProposal> {
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(e.to_string()))?;
        {
            let mut table = wtxn
                .open_table(PROPOSALS_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
            let key = proposal.id.as_bytes();

            if table
                .get(key.as_slice())
                .map_err(|e| Error::Storage(e.to_string()))?
                .is_some()
            {
                return Err(Error::Storage(format!(
                    "proposal {} already exists",
                    proposal.id
                )));
            }

            let value =
                bincode::serialize(&proposal).map_err(|e| Error::Serialization(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(proposal)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ConsentProposal>> {
        let rtxn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let table = rtxn
            .open_table(PROPOSALS_TABLE)
            .map_err(|e| Error::Storage(e.to_string()))?;

        let key = id.as_bytes();
        match table
            .get(key.as_slice())
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            Some(value) => {
                let proposal: ConsentProposal = bincode::deserialize(value.value())
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(proposal))
            }
            None => Ok(None),
        }
    }

    async fn update_conditional(
        &self,
        mut proposal: ConsentProposal,
        expected: ProposalStatus,
    ) -> Result<ConsentProposal> {
        let wtxn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(e.to_string()))?;
        {
            let mut table = wtxn
                .open_table(PROPOSALS_TABLE)
                .map_err(|e| Error::Storage(e.to_string()))?;
            let key = proposal.id.as_bytes();

            // Precondition checked inside the write transaction; a racing
            // writer either commits before us (we fail) or after us (it
            // fails). At-most-one resolution per proposal.
            let stored: ConsentProposal = {
                let value = table
                    .get(key.as_slice())
                    .map_err(|e| Error::Storage(e.to_string()))?
                    .ok_or_else(|| Error::NotFound(proposal.id.to_string()))?;
                bincode::deserialize(value.value()).map_err(|e| Error::Serialization(e.to_string()))?
            };

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
            let value =
                bincode::serialize(&proposal).map_err(|e| Error::Serialization(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        wtxn.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(proposal)
    }

    async fn list_pending(&self, family_id: Option<&str>) -> Result<Vec<ConsentProposal>> {
        self.scan(|p| {
            p.status.is_pending() && family_id.map(|f| p.family_id == f).unwrap_or(true)
        })
    }

    async fn list_for_family(&self, family_id: &str) -> Result<Vec<ConsentProposal>> {
        self.scan(|p| p.family_id == family_id)
    }

    async fn list_cooling(&self) -> Result<Vec<ConsentProposal>> {
        self.scan(|p| p.status == ProposalStatus::CoolingPeriod)
    }

    async fn latest_declined(
        &self,
        family_id: &str,
        subject_key: &SettingKey,
        proposer_id: &str,
    ) -> Result<Option<ConsentProposal>> {
        let declined = self.scan(|p| {
            p.status == ProposalStatus::Declined
                && p.family_id == family_id
                && &p.subject_key == subject_key
                && p.proposer_id == proposer_id
        })?;
        Ok(declined.into_iter().max_by_key(|p| p.resolved_at))
    }
}
