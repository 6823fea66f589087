#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

use crate::Result;

pub type Hash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Proposed,
    Approved,
    Declined,
    Cancelled,
    Acknowledged,
    Expired,
    Completed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Proposed => "proposed",
            AuditAction::Approved => "approved",
            AuditAction::Declined => "declined",
            AuditAction::Cancelled => "cancelled",
            AuditAction::Acknowledged => "acknowledged",
            AuditAction::Expired => "expired",
            AuditAction::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        performed_by: impl Into<String>,
        performed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            performed_by: performed_by.into(),
            performed_at,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only; the engine never reads entries back. Failures are logged
/// by the caller and must not affect the state transition.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

pub struct LoggingAuditRecorder;

#[async_trait]
impl AuditRecorder for LoggingAuditRecorder {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        tracing::info!(
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            performed_by = %entry.performed_by,
            "audit entry recorded"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedEntry {
    pub sequence: u64,
    pub entry: AuditEntry,
    pub previous_hash: Hash,
    pub hash: Hash,
}

#[derive(Debug, Clone)]
pub enum ChainVerification {
    Valid { entries_checked: usize },
    Broken { at_sequence: u64 },
}

/// Hash-chained in-memory recorder. Each entry commits to its predecessor
/// so tampering with history is detectable.
pub struct InMemoryAuditRecorder {
    entries: Mutex<Vec<ChainedEntry>>,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn compute_hash(sequence: u64, entry: &AuditEntry, previous: &Hash) -> Result<Hash> {
        let mut hasher = Sha256::new();
        hasher.update(sequence.to_be_bytes());
        hasher.update(previous);
        hasher.update(
            serde_json::to_vec(entry).map_err(|e| crate::Error::Audit(e.to_string()))?,
        );
        Ok(hasher.finalize().into())
    }

    pub fn entries(&self) -> Vec<ChainedEntry> {
        self.entries.lock().expect("lock poisoned").clone()
    }

    pub fn entries_for(&self, entity_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|c| c.entry.entity_id == entity_id)
            .map(|c| c.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn verify_chain(&self) -> ChainVerification {
        let entries = self.entries.lock().expect("lock poisoned");
        let mut previous: Hash = [0u8; 32];
        for chained in entries.iter() {
            let expected =
                match Self::compute_hash(chained.sequence, &chained.entry, &previous) {
                    Ok(h) => h,
                    Err(_) => {
                        return ChainVerification::Broken {
                            at_sequence: chained.sequence,
                        }
                    }
                };
            if chained.previous_hash != previous || chained.hash != expected {
                return ChainVerification::Broken {
                    at_sequence: chained.sequence,
                };
            }
            previous = chained.hash;
        }
        ChainVerification::Valid {
            entries_checked: entries.len(),
        }
    }
}

impl Default for InMemoryAuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditRecorder {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        let sequence = entries.len() as u64;
        let previous_hash = entries.last().map(|c| c.hash).unwrap_or([0u8; 32]);
        let hash = Self::compute_hash(sequence, &entry, &previous_hash)?;
        entries.push(ChainedEntry {
            sequence,
            entry,
            previous_hash,
            hash,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_records_and_verifies() {
        let recorder = InMemoryAuditRecorder::new();
        for action in [AuditAction::Proposed, AuditAction::Approved] {
            recorder
                .record(AuditEntry::new(
                    action,
                    "consent_proposal",
                    "prop-1",
                    "alice",
                    Utc::now(),
                ))
                .await
                .unwrap();
        }

        assert_eq!(recorder.len(), 2);
        assert!(matches!(
            recorder.verify_chain(),
            ChainVerification::Valid { entries_checked: 2 }
        ));
    }

    #[tokio::test]
    async fn test_chain_detects_tampering() {
        let recorder = InMemoryAuditRecorder::new();
        for i in 0..3 {
            recorder
                .record(AuditEntry::new(
                    AuditAction::Proposed,
                    "consent_proposal",
                    format!("prop-{}", i),
                    "alice",
                    Utc::now(),
                ))
                .await
                .unwrap();
        }

        {
            let mut entries = recorder.entries.lock().unwrap();
            entries[1].entry.performed_by = "mallory".into();
        }

        assert!(matches!(
            recorder.verify_chain(),
            ChainVerification::Broken { at_sequence: 1 }
        ));
    }

    #[tokio::test]
    async fn test_entries_for_filters_by_entity() {
        let recorder = InMemoryAuditRecorder::new();
        recorder
            .record(AuditEntry::new(
                AuditAction::Proposed,
                "consent_proposal",
                "prop-1",
                "alice",
                Utc::now(),
            ))
            .await
            .unwrap();
        recorder
            .record(AuditEntry::new(
                AuditAction::Declined,
                "consent_proposal",
                "prop-2",
                "bob",
                Utc::now(),
            ))
            .await
            .unwrap();

        let entries = recorder.entries_for("prop-2");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Declined);
    }
}
