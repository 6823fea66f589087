#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::classifier::classify_payload;
use crate::clock::Clock;
use crate::cooldown::CooldownGuard;
use crate::guardian::{Guardian, GuardianDirectory};
use crate::notification::{
    AcknowledgmentProgressNotification, CoolingPeriodNotification, Notification,
    ProposalCreatedNotification, ProposalResolvedNotification,
};
use crate::outbox::Outbox;
use crate::proposal::{
    Acknowledgment, ConsentProposal, ProposalPayload, ProposalStatus, SettingKey, SubjectRules,
    SubjectType,
};
use crate::store::ProposalStore;
use crate::{Error, Result};

const ENTITY_TYPE: &str = "consent_proposal";

/// The consent state machine. Stateless between calls; all durable state
/// lives in the store, and every transition is a single conditional
/// read-modify-write so concurrent actors cannot double-resolve a
/// proposal.
pub struct ConsentEngine {
    store: Arc<dyn ProposalStore>,
    guardians: Arc<dyn GuardianDirectory>,
    clock: Arc<dyn Clock>,
    outbox: Arc<Outbox>,
    cooldown: CooldownGuard,
    rules: HashMap<SubjectType, SubjectRules>,
}

impl ConsentEngine {
    pub fn new(
        store: Arc<dyn ProposalStore>,
        guardians: Arc<dyn GuardianDirectory>,
        clock: Arc<dyn Clock>,
        outbox: Arc<Outbox>,
    ) -> Self {
        let cooldown = CooldownGuard::new(Arc::clone(&store), Arc::clone(&clock));
        let rules = [
            SubjectType::SafetySetting,
            SubjectType::AgreementChange,
            SubjectType::Dissolution,
        ]
        .into_iter()
        .map(|s| (s, SubjectRules::for_subject(s)))
        .collect();

        Self {
            store,
            guardians,
            clock,
            outbox,
            cooldown,
            rules,
        }
    }

    /// Override the deadline table for one subject type.
    pub fn with_rules(mut self, subject: SubjectType, rules: SubjectRules) -> Self {
        self.rules.insert(subject, rules);
        self
    }

    fn rules_for(&self, subject: SubjectType) -> &SubjectRules {
        self.rules
            .get(&subject)
            .expect("rules table covers every subject type")
    }

    pub async fn propose(
        &self,
        family_id: &str,
        subject_type: SubjectType,
        proposer_id: &str,
        payload: ProposalPayload,
    ) -> Result<ConsentProposal> {
        validate_propose_input(family_id, subject_type, proposer_id, &payload)?;

        let guardians = self.guardians.list_guardians(family_id).await?;
        if !is_guardian(&guardians, proposer_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a guardian of {}",
                proposer_id, family_id
            )));
        }
        if subject_type != SubjectType::Dissolution && guardians.len() < 2 {
            return Err(Error::Validation(
                "no co-guardian available to approve this change".into(),
            ));
        }

        let rules = self.rules_for(subject_type).clone();
        let subject_key = subject_key_for(&payload);

        let cooldown = self
            .cooldown
            .check(family_id, &subject_key, proposer_id, &rules)
            .await?;
        if cooldown.blocked {
            return Err(Error::CooldownActive {
                ends_at: cooldown.ends_at.expect("blocked implies ends_at"),
            });
        }

        let now = self.clock.now();
        let restrictiveness = classify_payload(&payload);

        let status = if subject_type == SubjectType::Dissolution {
            match guardians.len() {
                0 | 1 => ProposalStatus::CoolingPeriod,
                2 => ProposalStatus::PendingApproval,
                _ => ProposalStatus::PendingAcknowledgment,
            }
        } else {
            ProposalStatus::PendingApproval
        };

        let expires_at = if status.is_pending() {
            rules.pending_lifetime.map(|d| now + d)
        } else {
            None
        };

        let mut proposal = ConsentProposal::new(
            family_id,
            subject_type,
            subject_key,
            proposer_id,
            payload,
            status,
            now,
            expires_at,
        );
        proposal.is_emergency_increase = restrictiveness.is_emergency_increase();
        if proposal.is_emergency_increase {
            proposal.review_expires_at = Some(now + rules.review_window);
        }
        if status == ProposalStatus::CoolingPeriod {
            // Sole-guardian dissolution: nobody to wait for, straight into
            // the deletion grace window.
            proposal.resolved_at = Some(now);
            proposal.effective_at = Some(now + rules.cooling_period);
        }

        let proposal = self.store.create(proposal).await?;

        info!(
            proposal_id = %proposal.id,
            family_id = %family_id,
            subject_type = %subject_type,
            status = %proposal.status,
            "proposal created"
        );

        let recipients = other_guardians(&guardians, proposer_id);
        let notification = Notification::ProposalCreated(ProposalCreatedNotification {
            proposal_id: proposal.id,
            family_id: family_id.to_string(),
            subject_type: subject_type.to_string(),
            proposer_id: proposer_id.to_string(),
            expires_at: proposal.expires_at,
        });
        self.outbox
            .emit(
                proposal.id,
                self.audit_entry(&proposal, AuditAction::Proposed, proposer_id),
                recipients
                    .into_iter()
                    .map(|r| (r, notification.clone()))
                    .collect(),
            )
            .await;

        Ok(proposal)
    }

    pub async fn approve(&self, proposal_id: &Uuid, approver_id: &str) -> Result<ConsentProposal> {
        let proposal = self.load(proposal_id).await?;
        self.authorize_responder(&proposal, approver_id).await?;
        require_status(&proposal, ProposalStatus::PendingApproval)?;
        require_unexpired(&proposal, self.clock.now())?;

        let now = self.clock.now();
        let rules = self.rules_for(proposal.subject_type);

        // Restrictiveness is re-derived from the stored payload, never from
        // caller input and never from the proposal-time flag.
        let restrictiveness = classify_payload(&proposal.payload);

        let mut updated = proposal.clone();
        updated.approver_id = Some(approver_id.to_string());
        updated.resolved_at = Some(now);
        if restrictiveness.is_protection_reduction() {
            updated.status = ProposalStatus::CoolingPeriod;
            updated.effective_at = Some(now + rules.cooling_period);
        } else {
            updated.status = ProposalStatus::Approved;
        }

        let updated = self
            .store
            .update_conditional(updated, ProposalStatus::PendingApproval)
            .await?;

        info!(
            proposal_id = %updated.id,
            approver_id = %approver_id,
            status = %updated.status,
            "proposal approved"
        );

        let notification = if updated.status == ProposalStatus::CoolingPeriod {
            Notification::CoolingPeriodStarted(CoolingPeriodNotification {
                proposal_id: updated.id,
                family_id: updated.family_id.clone(),
                subject_type: updated.subject_type.to_string(),
                approved_by: approver_id.to_string(),
                effective_at: updated.effective_at.expect("cooling period has effective_at"),
            })
        } else {
            self.resolved_notification(&updated, "approved", Some(approver_id))
        };
        self.outbox
            .emit(
                updated.id,
                self.audit_entry(&updated, AuditAction::Approved, approver_id),
                vec![(updated.proposer_id.clone(), notification)],
            )
            .await;

        Ok(updated)
    }

    pub async fn decline(
        &self,
        proposal_id: &Uuid,
        decliner_id: &str,
        reason: Option<String>,
    ) -> Result<ConsentProposal> {
        let proposal = self.load(proposal_id).await?;
        self.authorize_responder(&proposal, decliner_id).await?;
        require_status(&proposal, ProposalStatus::PendingApproval)?;
        require_unexpired(&proposal, self.clock.now())?;

        let now = self.clock.now();
        let mut updated = proposal.clone();
        updated.status = ProposalStatus::Declined;
        updated.approver_id = Some(decliner_id.to_string());
        updated.decline_reason = reason;
        updated.resolved_at = Some(now);

        let updated = self
            .store
            .update_conditional(updated, ProposalStatus::PendingApproval)
            .await?;

        info!(
            proposal_id = %updated.id,
            decliner_id = %decliner_id,
            "proposal declined"
        );

        let notification = self.resolved_notification(&updated, "declined", Some(decliner_id));
        self.outbox
            .emit(
                updated.id,
                self.audit_entry(&updated, AuditAction::Declined, decliner_id),
                vec![(updated.proposer_id.clone(), notification)],
            )
            .await;

        Ok(updated)
    }

    /// Cooling-period only. Both parties to the change may cancel; for a
    /// dissolution past acknowledgment any guardian may.
    pub async fn cancel(&self, proposal_id: &Uuid, canceller_id: &str) -> Result<ConsentProposal> {
        let proposal = self.load(proposal_id).await?;

        let guardians = self
            .guardians
            .list_guardians(&proposal.family_id)
            .await?;
        if !is_guardian(&guardians, canceller_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a guardian of {}",
                canceller_id, proposal.family_id
            )));
        }

        require_status(&proposal, ProposalStatus::CoolingPeriod)?;

        if proposal.subject_type != SubjectType::Dissolution && !proposal.is_party(canceller_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a party to proposal {}",
                canceller_id, proposal.id
            )));
        }

        let now = self.clock.now();
        let effective_at = proposal.effective_at.expect("cooling period has effective_at");
        if now > effective_at {
            return Err(Error::CoolingPeriodEnded { effective_at });
        }

        let mut updated = proposal.clone();
        updated.status = ProposalStatus::Cancelled;
        updated.cancelled_by_uid = Some(canceller_id.to_string());
        updated.resolved_at = Some(now);

        let updated = self
            .store
            .update_conditional(updated, ProposalStatus::CoolingPeriod)
            .await?;

        info!(
            proposal_id = %updated.id,
            cancelled_by = %canceller_id,
            "cooling-period change cancelled"
        );

        let notification = self.resolved_notification(&updated, "cancelled", Some(canceller_id));
        let recipients: Vec<(String, Notification)> = other_guardians(&guardians, canceller_id)
            .into_iter()
            .map(|r| (r, notification.clone()))
            .collect();
        self.outbox
            .emit(
                updated.id,
                self.audit_entry(&updated, AuditAction::Cancelled, canceller_id),
                recipients,
            )
            .await;

        Ok(updated)
    }

    /// Multi-guardian dissolution consent. The initiator is excluded from
    /// the acknowledgment requirement; once every other guardian has
    /// acknowledged, the dissolution enters its deletion grace window.
    pub async fn acknowledge(
        &self,
        proposal_id: &Uuid,
        guardian_id: &str,
    ) -> Result<ConsentProposal> {
        let proposal = self.load(proposal_id).await?;
        require_status(&proposal, ProposalStatus::PendingAcknowledgment)?;

        let guardians = self
            .guardians
            .list_guardians(&proposal.family_id)
            .await?;
        if !is_guardian(&guardians, guardian_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a guardian of {}",
                guardian_id, proposal.family_id
            )));
        }
        if guardian_id == proposal.proposer_id {
            return Err(Error::Unauthorized(
                "initiator cannot acknowledge their own dissolution".into(),
            ));
        }
        if proposal.has_acknowledged(guardian_id) {
            return Err(Error::AlreadyAcknowledged(guardian_id.to_string()));
        }

        let now = self.clock.now();
        let rules = self.rules_for(proposal.subject_type);

        let mut updated = proposal.clone();
        updated.acknowledgments.push(Acknowledgment {
            guardian_id: guardian_id.to_string(),
            acknowledged_at: now,
        });

        // Completion is judged against the current roster, not a count:
        // every non-initiator guardian on the family today must appear in
        // the acknowledgment set. A stale acknowledgment from a guardian
        // removed mid-flight neither counts toward nor blocks completion.
        let non_initiators: Vec<&Guardian> = guardians
            .iter()
            .filter(|g| g.uid != proposal.proposer_id)
            .collect();
        let acknowledged = non_initiators
            .iter()
            .filter(|g| updated.has_acknowledged(&g.uid))
            .count();
        let required = non_initiators.len();

        let complete = acknowledged == required;
        if complete {
            updated.status = ProposalStatus::CoolingPeriod;
            updated.resolved_at = Some(now);
            updated.effective_at = Some(now + rules.cooling_period);
        }

        let updated = self
            .store
            .update_conditional(updated, ProposalStatus::PendingAcknowledgment)
            .await?;

        info!(
            proposal_id = %updated.id,
            guardian_id = %guardian_id,
            acknowledged = acknowledged,
            required = required,
            complete = complete,
            "dissolution acknowledgment recorded"
        );

        let notification =
            Notification::AcknowledgmentProgress(AcknowledgmentProgressNotification {
                proposal_id: updated.id,
                family_id: updated.family_id.clone(),
                acknowledged_by: guardian_id.to_string(),
                acknowledged_count: acknowledged,
                required_count: required,
                is_complete: complete,
            });
        self.outbox
            .emit(
                updated.id,
                self.audit_entry(&updated, AuditAction::Acknowledged, guardian_id),
                vec![(updated.proposer_id.clone(), notification)],
            )
            .await;

        Ok(updated)
    }

    pub async fn get_pending(&self, family_id: &str) -> Result<Vec<ConsentProposal>> {
        self.store.list_pending(Some(family_id)).await
    }

    pub async fn get_status(&self, proposal_id: &Uuid) -> Result<ConsentProposal> {
        self.load(proposal_id).await
    }

    async fn load(&self, proposal_id: &Uuid) -> Result<ConsentProposal> {
        self.store
            .get(proposal_id)
            .await?
            .ok_or_else(|| Error::NotFound(proposal_id.to_string()))
    }

    /// Shared approve/decline authorization: responder must be a guardian
    /// of the family and must not be the proposer. Runs before any store
    /// write.
    async fn authorize_responder(
        &self,
        proposal: &ConsentProposal,
        responder_id: &str,
    ) -> Result<()> {
        if responder_id == proposal.proposer_id {
            return Err(Error::Unauthorized(
                "cannot approve or decline your own proposal".into(),
            ));
        }
        let guardians = self
            .guardians
            .list_guardians(&proposal.family_id)
            .await?;
        if !is_guardian(&guardians, responder_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a guardian of {}",
                responder_id, proposal.family_id
            )));
        }
        Ok(())
    }

    fn audit_entry(
        &self,
        proposal: &ConsentProposal,
        action: AuditAction,
        actor: &str,
    ) -> AuditEntry {
        AuditEntry::new(
            action,
            ENTITY_TYPE,
            proposal.id.to_string(),
            actor,
            self.clock.now(),
        )
        .with_metadata(serde_json::json!({
            "family_id": proposal.family_id,
            "subject_type": proposal.subject_type.to_string(),
            "subject_key": proposal.subject_key.to_string(),
            "status": proposal.status.to_string(),
        }))
    }

    fn resolved_notification(
        &self,
        proposal: &ConsentProposal,
        outcome: &str,
        resolved_by: Option<&str>,
    ) -> Notification {
        Notification::ProposalResolved(ProposalResolvedNotification {
            proposal_id: proposal.id,
            family_id: proposal.family_id.clone(),
            subject_type: proposal.subject_type.to_string(),
            outcome: outcome.to_string(),
            resolved_by: resolved_by.map(String::from),
            decline_reason: proposal.decline_reason.clone(),
            resolved_at: proposal.resolved_at.unwrap_or_else(|| self.clock.now()),
        })
    }
}

fn is_guardian(guardians: &[Guardian], uid: &str) -> bool {
    guardians.iter().any(|g| g.uid == uid)
}

fn other_guardians(guardians: &[Guardian], actor: &str) -> Vec<String> {
    guardians
        .iter()
        .filter(|g| g.uid != actor)
        .map(|g| g.uid.clone())
        .collect()
}

fn subject_key_for(payload: &ProposalPayload) -> SettingKey {
    match payload {
        ProposalPayload::Setting { key, .. } => key.clone(),
        ProposalPayload::Agreement { .. } => SettingKey::Custom("agreement_change".into()),
        ProposalPayload::Dissolution { .. } => SettingKey::Custom("dissolution".into()),
    }
}

fn require_status(proposal: &ConsentProposal, expected: ProposalStatus) -> Result<()> {
    if proposal.status != expected {
        return Err(Error::InvalidState(format!(
            "proposal {} is {}, expected {}",
            proposal.id, proposal.status, expected
        )));
    }
    Ok(())
}

fn require_unexpired(proposal: &ConsentProposal, now: DateTime<Utc>) -> Result<()> {
    if proposal.is_expired(now) {
        let expired_at = proposal.expires_at.unwrap_or(now);
        return Err(Error::Expired { expired_at });
    }
    Ok(())
}

fn validate_propose_input(
    family_id: &str,
    subject_type: SubjectType,
    proposer_id: &str,
    payload: &ProposalPayload,
) -> Result<()> {
    if family_id.trim().is_empty() {
        return Err(Error::Validation("family_id must not be empty".into()));
    }
    if proposer_id.trim().is_empty() {
        return Err(Error::Validation("proposer_id must not be empty".into()));
    }

    match (subject_type, payload) {
        (SubjectType::SafetySetting, ProposalPayload::Setting { current, proposed, .. }) => {
            if current == proposed {
                return Err(Error::Validation(
                    "proposed value is identical to the current value".into(),
                ));
            }
            Ok(())
        }
        (SubjectType::AgreementChange, ProposalPayload::Agreement { changes }) => {
            if changes.is_empty() {
                return Err(Error::Validation(
                    "agreement change must contain at least one change".into(),
                ));
            }
            Ok(())
        }
        (SubjectType::Dissolution, ProposalPayload::Dissolution { .. }) => Ok(()),
        (subject, _) => Err(Error::Validation(format!(
            "payload shape does not match subject type {}",
            subject
        ))),
    }
}
