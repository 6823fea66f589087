#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::proposal::{ProposalPayload, SettingKey, SettingValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restrictiveness {
    MoreRestrictive,
    LessRestrictive,
    Neutral,
}

impl Restrictiveness {
    pub fn is_protection_reduction(&self) -> bool {
        matches!(self, Restrictiveness::LessRestrictive)
    }

    pub fn is_emergency_increase(&self) -> bool {
        matches!(self, Restrictiveness::MoreRestrictive)
    }
}

/// Deterministic, side-effect-free. The engine re-runs this at approval
/// time on the stored payload, so nothing here may consult state or time.
///
/// On every ordinal axis a lower value is stricter (shorter monitoring
/// interval, shorter retention, less allowed time) except the minimum-age
/// axis, where a higher threshold is stricter. Level values compare by
/// protection order.
pub fn classify(
    key: &SettingKey,
    current: &SettingValue,
    proposed: &SettingValue,
) -> Restrictiveness {
    match (current, proposed) {
        (SettingValue::Number(cur), SettingValue::Number(new)) => {
            let raised = match key {
                SettingKey::MinimumAge => new > cur,
                _ => new < cur,
            };
            if new == cur {
                Restrictiveness::Neutral
            } else if raised {
                Restrictiveness::MoreRestrictive
            } else {
                Restrictiveness::LessRestrictive
            }
        }
        (SettingValue::Level(cur), SettingValue::Level(new)) => {
            if new == cur {
                Restrictiveness::Neutral
            } else if new > cur {
                Restrictiveness::MoreRestrictive
            } else {
                Restrictiveness::LessRestrictive
            }
        }
        // A change of value kind carries no ordering; treat as neutral so
        // it neither fast-tracks nor skips the cooling period by accident.
        _ => Restrictiveness::Neutral,
    }
}

/// Classification of a whole payload. Agreement bundles reduce over their
/// changes with any reduction dominating: a bundle that loosens anything
/// gets the cooling period. Dissolution removes monitoring entirely and is
/// always a protection reduction.
pub fn classify_payload(payload: &ProposalPayload) -> Restrictiveness {
    match payload {
        ProposalPayload::Setting {
            key,
            current,
            proposed,
        } => classify(key, current, proposed),
        ProposalPayload::Agreement { changes } => {
            let mut result = Restrictiveness::Neutral;
            for change in changes {
                match classify(&change.field, &change.current, &change.proposed) {
                    Restrictiveness::LessRestrictive => return Restrictiveness::LessRestrictive,
                    Restrictiveness::MoreRestrictive => {
                        result = Restrictiveness::MoreRestrictive;
                    }
                    Restrictiveness::Neutral => {}
                }
            }
            result
        }
        ProposalPayload::Dissolution { .. } => Restrictiveness::LessRestrictive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{AgreementChange, ProtectionLevel};

    #[test]
    fn test_shorter_interval_is_more_restrictive() {
        let r = classify(
            &SettingKey::MonitoringInterval,
            &SettingValue::Number(60),
            &SettingValue::Number(30),
        );
        assert_eq!(r, Restrictiveness::MoreRestrictive);
        assert!(r.is_emergency_increase());
    }

    #[test]
    fn test_longer_interval_is_protection_reduction() {
        let r = classify(
            &SettingKey::MonitoringInterval,
            &SettingValue::Number(30),
            &SettingValue::Number(60),
        );
        assert!(r.is_protection_reduction());
    }

    #[test]
    fn test_minimum_age_axis_inverts() {
        let raised = classify(
            &SettingKey::MinimumAge,
            &SettingValue::Number(13),
            &SettingValue::Number(16),
        );
        assert_eq!(raised, Restrictiveness::MoreRestrictive);

        let lowered = classify(
            &SettingKey::MinimumAge,
            &SettingValue::Number(16),
            &SettingValue::Number(13),
        );
        assert_eq!(lowered, Restrictiveness::LessRestrictive);
    }

    #[test]
    fn test_unchanged_value_is_neutral() {
        let r = classify(
            &SettingKey::TimeLimits,
            &SettingValue::Number(120),
            &SettingValue::Number(120),
        );
        assert_eq!(r, Restrictiveness::Neutral);
    }

    #[test]
    fn test_level_values_compare_by_protection_order() {
        let r = classify(
            &SettingKey::Custom("content_filter".into()),
            &SettingValue::Level(ProtectionLevel::Standard),
            &SettingValue::Level(ProtectionLevel::Strict),
        );
        assert_eq!(r, Restrictiveness::MoreRestrictive);

        let r = classify(
            &SettingKey::Custom("content_filter".into()),
            &SettingValue::Level(ProtectionLevel::Standard),
            &SettingValue::Level(ProtectionLevel::Off),
        );
        assert_eq!(r, Restrictiveness::LessRestrictive);
    }

    #[test]
    fn test_agreement_bundle_reduction_dominates() {
        let payload = ProposalPayload::Agreement {
            changes: vec![
                AgreementChange {
                    field: SettingKey::MonitoringInterval,
                    current: SettingValue::Number(60),
                    proposed: SettingValue::Number(30),
                },
                AgreementChange {
                    field: SettingKey::TimeLimits,
                    current: SettingValue::Number(60),
                    proposed: SettingValue::Number(120),
                },
            ],
        };
        assert_eq!(classify_payload(&payload), Restrictiveness::LessRestrictive);
    }

    #[test]
    fn test_dissolution_is_always_a_reduction() {
        let payload = ProposalPayload::Dissolution { reason: None };
        assert!(classify_payload(&payload).is_protection_reduction());
    }
}
