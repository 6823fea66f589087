#![forbid(unsafe_code)]

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::clock::Clock;
use crate::notification::{Notification, ProposalResolvedNotification};
use crate::outbox::Outbox;
use crate::proposal::{ProposalStatus, SubjectType};
use crate::store::ProposalStore;
use crate::{Error, Result};

const ENTITY_TYPE: &str = "consent_proposal";
const SYSTEM_ACTOR: &str = "system";

/// Periodic sweep over timed-out proposals. Deadlines are evaluated
/// lazily; the sweep only has to guarantee that no proposal stays pending
/// after `expires_at`, not precise scheduling. Overlapping invocations are
/// safe: each transition is a conditional update, so a proposal already
/// resolved by a racing scan (or a racing approve/decline) is skipped.
pub struct ExpiryScanner {
    store: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
    outbox: Arc<Outbox>,
    interval: std::time::Duration,
}

impl ExpiryScanner {
    pub fn new(store: Arc<dyn ProposalStore>, clock: Arc<dyn Clock>, outbox: Arc<Outbox>) -> Self {
        Self {
            store,
            clock,
            outbox,
            interval: std::time::Duration::from_secs(300),
        }
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Transition every pending proposal past its deadline to `expired`.
    /// Returns the ids actually expired by this invocation.
    pub async fn check_once(&self) -> Result<Vec<Uuid>> {
        let now = self.clock.now();
        let pending = self.store.list_pending(None).await?;
        let mut expired = Vec::new();

        for proposal in pending {
            if !proposal.is_expired(now) {
                continue;
            }

            let pending_status = proposal.status;
            let mut updated = proposal.clone();
            updated.status = ProposalStatus::Expired;
            updated.resolved_at = Some(now);

            let updated = match self.store.update_conditional(updated, pending_status).await {
                Ok(updated) => updated,
                Err(Error::InvalidState(_)) => continue,
                Err(e) => return Err(e),
            };

            info!(proposal_id = %updated.id, "proposal expired");
            expired.push(updated.id);

            let notification = Notification::ProposalResolved(ProposalResolvedNotification {
                proposal_id: updated.id,
                family_id: updated.family_id.clone(),
                subject_type: updated.subject_type.to_string(),
                outcome: "expired".to_string(),
                resolved_by: None,
                decline_reason: None,
                resolved_at: now,
            });
            self.outbox
                .emit(
                    updated.id,
                    AuditEntry::new(
                        AuditAction::Expired,
                        ENTITY_TYPE,
                        updated.id.to_string(),
                        SYSTEM_ACTOR,
                        now,
                    ),
                    vec![(updated.proposer_id.clone(), notification)],
                )
                .await;
        }

        Ok(expired)
    }

    /// Mark elapsed dissolution cooling periods `completed` so downstream
    /// deletion never re-triggers. Other subject types are "in effect" the
    /// moment a reader observes `effective_at <= now` and need no
    /// transition.
    pub async fn complete_elapsed(&self) -> Result<Vec<Uuid>> {
        let now = self.clock.now();
        let cooling = self.store.list_cooling().await?;
        let mut completed = Vec::new();

        for proposal in cooling {
            if proposal.subject_type != SubjectType::Dissolution {
                continue;
            }
            let Some(effective_at) = proposal.effective_at else {
                continue;
            };
            if now < effective_at {
                continue;
            }

            let mut updated = proposal.clone();
            updated.status = ProposalStatus::Completed;

            let updated = match self
                .store
                .update_conditional(updated, ProposalStatus::CoolingPeriod)
                .await
            {
                Ok(updated) => updated,
                Err(Error::InvalidState(_)) => continue,
                Err(e) => return Err(e),
            };

            info!(proposal_id = %updated.id, "dissolution grace window elapsed");
            completed.push(updated.id);

            self.outbox
                .emit(
                    updated.id,
                    AuditEntry::new(
                        AuditAction::Completed,
                        ENTITY_TYPE,
                        updated.id.to_string(),
                        SYSTEM_ACTOR,
                        now,
                    ),
                    Vec::new(),
                )
                .await;
        }

        Ok(completed)
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scanner = self;
        tokio::spawn(async move {
            loop {
                match scanner.check_once().await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "expired {} proposals", expired.len());
                    }
                    Err(e) => {
                        error!(error = %e, "expiry sweep failed");
                    }
                    _ => {}
                }
                if let Err(e) = scanner.complete_elapsed().await {
                    error!(error = %e, "completion sweep failed");
                }
                tokio::time::sleep(scanner.interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditRecorder;
    use crate::clock::ManualClock;
    use crate::notification::NotificationService;
    use crate::proposal::{ConsentProposal, ProposalPayload, SettingKey, SettingValue};
    use crate::store::InMemoryProposalStore;
    use chrono::{Duration, Utc};

    fn scanner_with_store() -> (ExpiryScanner, Arc<InMemoryProposalStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryProposalStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let outbox = Arc::new(Outbox::new(
            Arc::new(InMemoryAuditRecorder::new()),
            Arc::new(NotificationService::new()),
        ));
        let scanner = ExpiryScanner::new(store.clone(), clock.clone(), outbox);
        (scanner, store, clock)
    }

    fn pending_setting(created_at: chrono::DateTime<Utc>) -> ConsentProposal {
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
            created_at,
            Some(created_at + Duration::hours(72)),
        )
    }

    #[tokio::test]
    async fn test_expires_only_past_deadline() {
        let (scanner, store, clock) = scanner_with_store();

        let stale = store.create(pending_setting(clock.now())).await.unwrap();
        clock.advance(Duration::hours(73));
        let fresh = store.create(pending_setting(clock.now())).await.unwrap();

        let expired = scanner.check_once().await.unwrap();
        assert_eq!(expired, vec![stale.id]);

        let stale = store.get(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, ProposalStatus::Expired);
        assert!(stale.resolved_at.is_some());

        let fresh = store.get(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, ProposalStatus::PendingApproval);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (scanner, store, clock) = scanner_with_store();

        store.create(pending_setting(clock.now())).await.unwrap();
        clock.advance(Duration::hours(73));

        let first = scanner.check_once().await.unwrap();
        assert_eq!(first.len(), 1);

        let second = scanner.check_once().await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_dissolution_completes_after_grace_window() {
        let (scanner, store, clock) = scanner_with_store();

        let mut dissolution = ConsentProposal::new(
            "fam-1",
            SubjectType::Dissolution,
            SettingKey::Custom("dissolution".into()),
            "alice",
            ProposalPayload::Dissolution { reason: None },
            ProposalStatus::CoolingPeriod,
            clock.now(),
            None,
        );
        dissolution.resolved_at = Some(clock.now());
        dissolution.effective_at = Some(clock.now() + Duration::days(30));
        let dissolution = store.create(dissolution).await.unwrap();

        let completed = scanner.complete_elapsed().await.unwrap();
        assert!(completed.is_empty());

        clock.advance(Duration::days(31));
        let completed = scanner.complete_elapsed().await.unwrap();
        assert_eq!(completed, vec![dissolution.id]);

        // Re-running is a no-op.
        let again = scanner.complete_elapsed().await.unwrap();
        assert!(again.is_empty());

        let stored = store.get(&dissolution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Completed);
    }

    #[tokio::test]
    async fn test_setting_cooling_period_left_untouched() {
        let (scanner, store, clock) = scanner_with_store();

        let mut cooling = pending_setting(clock.now());
        cooling.status = ProposalStatus::CoolingPeriod;
        cooling.expires_at = None;
        cooling.resolved_at = Some(clock.now());
        cooling.effective_at = Some(clock.now() + Duration::hours(48));
        let cooling = store.create(cooling).await.unwrap();

        clock.advance(Duration::hours(49));
        scanner.check_once().await.unwrap();
        scanner.complete_elapsed().await.unwrap();

        // In effect by read; no explicit terminal marker for settings.
        let stored = store.get(&cooling.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::CoolingPeriod);
        assert!(stored.is_in_effect(clock.now()));
    }
}
