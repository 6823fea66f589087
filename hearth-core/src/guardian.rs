#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianRole {
    Parent,
    CoParent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardian {
    pub uid: String,
    pub role: GuardianRole,
    pub permissions: Vec<String>,
}

impl Guardian {
    pub fn new(uid: impl Into<String>, role: GuardianRole) -> Self {
        Self {
            uid: uid.into(),
            role,
            permissions: Vec::new(),
        }
    }
}

/// Family membership lookup. Read-only from the engine's perspective;
/// authorizes proposers, approvers, and cancellers, and resolves the
/// other guardian(s) for notifications.
#[async_trait]
pub trait GuardianDirectory: Send + Sync {
    async fn list_guardians(&self, family_id: &str) -> Result<Vec<Guardian>>;
}

pub struct InMemoryGuardianDirectory {
    families: RwLock<HashMap<String, Vec<Guardian>>>,
}

impl InMemoryGuardianDirectory {
    pub fn new() -> Self {
        Self {
            families: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_guardian(&self, family_id: &str, guardian: Guardian) {
        let mut families = self.families.write().expect("lock poisoned");
        let members = families.entry(family_id.to_string()).or_default();
        if !members.iter().any(|g| g.uid == guardian.uid) {
            members.push(guardian);
        }
    }

    pub fn remove_guardian(&self, family_id: &str, uid: &str) -> bool {
        let mut families = self.families.write().expect("lock poisoned");
        match families.get_mut(family_id) {
            Some(members) => {
                let len_before = members.len();
                members.retain(|g| g.uid != uid);
                members.len() != len_before
            }
            None => false,
        }
    }
}

impl Default for InMemoryGuardianDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuardianDirectory for InMemoryGuardianDirectory {
    async fn list_guardians(&self, family_id: &str) -> Result<Vec<Guardian>> {
        let families = self.families.read().expect("lock poisoned");
        Ok(families.get(family_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_membership() {
        let directory = InMemoryGuardianDirectory::new();
        directory.add_guardian("fam-1", Guardian::new("alice", GuardianRole::Parent));
        directory.add_guardian("fam-1", Guardian::new("bob", GuardianRole::CoParent));
        directory.add_guardian("fam-1", Guardian::new("alice", GuardianRole::Parent));

        let members = directory.list_guardians("fam-1").await.unwrap();
        assert_eq!(members.len(), 2);

        assert!(directory.remove_guardian("fam-1", "bob"));
        let members = directory.list_guardians("fam-1").await.unwrap();
        assert_eq!(members.len(), 1);

        let empty = directory.list_guardians("fam-2").await.unwrap();
        assert!(empty.is_empty());
    }
}
