//! # Version Store
//!
//! Append-only per-policy history of immutable [`PolicyVersion`] snapshots.
//!
//! ## Numbering
//!
//! Each policy has its own counter starting at 1. Every append takes
//! `counter + 1`; the counter never decreases, so numbers are never
//! reused, even after pruning or individual deletes. Only
//! [`VersionStore::delete_all_versions`] resets it.
//!
//! ## Retention
//!
//! At most `max_versions_per_policy` snapshots are kept. Overflow drops the
//! oldest; survivors keep their numbers.
//!
//! ## Restore
//!
//! Restoring appends a new version whose snapshot equals the target's.
//! History is never rewritten.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use flowguard_core::{FlowguardError, Policy};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::diff::VersionDiff;

/// Retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Snapshots kept per policy.
    pub max_versions_per_policy: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_versions_per_policy: 50,
        }
    }
}

/// An immutable snapshot of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVersion {
    /// Unique snapshot id.
    pub id: String,
    /// Owning policy.
    pub policy_id: String,
    /// Version number within the policy.
    pub version: u64,
    /// Deep copy of the policy at snapshot time.
    pub policy: Policy,
    /// Snapshot time.
    pub created_at: DateTime<Utc>,
    /// Author of the change.
    pub created_by: String,
    /// Why the change was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
    /// Free-form annotations (e.g. `restoredFrom`).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Kept versions of one policy plus its counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistory {
    /// Policy the history belongs to.
    pub policy_id: String,
    /// Kept versions, ascending.
    pub versions: Vec<PolicyVersion>,
    /// Highest number ever assigned (0 if none).
    pub current_version: u64,
    /// Number of kept versions; at most `current_version`.
    pub total_versions: usize,
}

#[derive(Debug, Default)]
struct History {
    versions: VecDeque<PolicyVersion>,
    counter: u64,
}

/// Thread-safe store of per-policy version histories.
#[derive(Debug, Default)]
pub struct VersionStore {
    config: VersionConfig,
    histories: RwLock<HashMap<String, History>>,
}

impl VersionStore {
    /// Create an empty store.
    pub fn new(config: VersionConfig) -> Self {
        Self {
            config,
            histories: RwLock::new(HashMap::new()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &VersionConfig {
        &self.config
    }

    /// Append a snapshot of `policy`.
    pub fn create_version(
        &self,
        policy: &Policy,
        created_by: &str,
        reason: Option<&str>,
    ) -> PolicyVersion {
        self.append(policy.clone(), created_by, reason, BTreeMap::new())
    }

    fn append(
        &self,
        policy: Policy,
        created_by: &str,
        reason: Option<&str>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> PolicyVersion {
        let mut histories = self.histories.write();
        let history = histories.entry(policy.id.clone()).or_default();
        history.counter += 1;
        let version = PolicyVersion {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy.id.clone(),
            version: history.counter,
            policy,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            change_reason: reason.map(str::to_string),
            metadata,
        };
        history.versions.push_back(version.clone());
        while history.versions.len() > self.config.max_versions_per_policy.max(1) {
            if let Some(dropped) = history.versions.pop_front() {
                tracing::debug!(
                    policy_id = %dropped.policy_id,
                    version = dropped.version,
                    "oldest version pruned"
                );
            }
        }
        tracing::info!(
            policy_id = %version.policy_id,
            version = version.version,
            created_by,
            "policy version created"
        );
        version
    }

    /// A specific version.
    pub fn get_version(&self, policy_id: &str, version: u64) -> Result<PolicyVersion, FlowguardError> {
        self.histories
            .read()
            .get(policy_id)
            .and_then(|h| h.versions.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| FlowguardError::not_found("version", format!("{policy_id}@{version}")))
    }

    /// The highest kept version.
    pub fn get_latest_version(&self, policy_id: &str) -> Option<PolicyVersion> {
        self.histories
            .read()
            .get(policy_id)
            .and_then(|h| h.versions.back())
            .cloned()
    }

    /// The policy's counter, if any version was ever created since the last
    /// full delete.
    pub fn current_version(&self, policy_id: &str) -> Option<u64> {
        self.histories
            .read()
            .get(policy_id)
            .map(|h| h.counter)
            .filter(|c| *c > 0)
    }

    /// Kept versions (ascending) plus counters. Unknown policies yield an
    /// empty history.
    pub fn get_version_history(&self, policy_id: &str) -> VersionHistory {
        let histories = self.histories.read();
        let (versions, counter) = histories
            .get(policy_id)
            .map(|h| (h.versions.iter().cloned().collect::<Vec<_>>(), h.counter))
            .unwrap_or_default();
        VersionHistory {
            policy_id: policy_id.to_string(),
            total_versions: versions.len(),
            versions,
            current_version: counter,
        }
    }

    /// Ids of every policy with a history, sorted.
    pub fn policy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.histories.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Diff two kept versions of a policy.
    pub fn compare_versions(
        &self,
        policy_id: &str,
        from: u64,
        to: u64,
    ) -> Result<VersionDiff, FlowguardError> {
        let old = self.get_version(policy_id, from)?;
        let new = self.get_version(policy_id, to)?;
        Ok(VersionDiff::between(&old, &new))
    }

    /// Append a copy of version `version` as the new latest version.
    ///
    /// Fails with `NotFound` if the version is not kept and `InvalidState`
    /// if it is already the current version.
    pub fn restore_version(
        &self,
        policy_id: &str,
        version: u64,
        restored_by: &str,
    ) -> Result<PolicyVersion, FlowguardError> {
        let target = self.get_version(policy_id, version)?;
        if self.current_version(policy_id) == Some(version) {
            return Err(FlowguardError::InvalidState(format!(
                "version {version} is already the current version of policy {policy_id}"
            )));
        }
        let mut metadata = BTreeMap::new();
        metadata.insert("restoredFrom".to_string(), serde_json::Value::from(version));
        let reason = format!("Restored from version {version}");
        Ok(self.append(target.policy, restored_by, Some(&reason), metadata))
    }

    /// Delete one kept version. The current version cannot be deleted.
    pub fn delete_version(&self, policy_id: &str, version: u64) -> Result<PolicyVersion, FlowguardError> {
        let mut histories = self.histories.write();
        let history = histories
            .get_mut(policy_id)
            .ok_or_else(|| FlowguardError::not_found("version", format!("{policy_id}@{version}")))?;
        if history.counter == version {
            return Err(FlowguardError::InvalidState(format!(
                "cannot delete current version {version} of policy {policy_id}"
            )));
        }
        let index = history
            .versions
            .iter()
            .position(|v| v.version == version)
            .ok_or_else(|| FlowguardError::not_found("version", format!("{policy_id}@{version}")))?;
        history
            .versions
            .remove(index)
            .ok_or_else(|| FlowguardError::not_found("version", format!("{policy_id}@{version}")))
    }

    /// Drop a policy's entire history and reset its counter. Returns the
    /// number of versions removed.
    pub fn delete_all_versions(&self, policy_id: &str) -> usize {
        let removed = self
            .histories
            .write()
            .remove(policy_id)
            .map(|h| h.versions.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::info!(policy_id, removed, "version history deleted");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(name: &str) -> Policy {
        Policy::new(name, "alice").with_id("pol-1")
    }

    #[test]
    fn first_version_is_one_and_increments() {
        let store = VersionStore::default();
        assert_eq!(store.create_version(&policy("a"), "alice", None).version, 1);
        assert_eq!(store.create_version(&policy("b"), "alice", Some("rename")).version, 2);
        assert_eq!(store.current_version("pol-1"), Some(2));
        let latest = store.get_latest_version("pol-1").unwrap();
        assert_eq!(latest.policy.name, "b");
        assert_eq!(latest.change_reason.as_deref(), Some("rename"));
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let store = VersionStore::default();
        let mut live = policy("original");
        store.create_version(&live, "alice", None);
        live.name = "mutated".into();
        assert_eq!(store.get_version("pol-1", 1).unwrap().policy.name, "original");
    }

    #[test]
    fn pruning_keeps_numbers_and_counter() {
        let store = VersionStore::new(VersionConfig {
            max_versions_per_policy: 3,
        });
        for i in 0..5 {
            store.create_version(&policy(&format!("v{i}")), "alice", None);
        }
        let history = store.get_version_history("pol-1");
        assert_eq!(history.current_version, 5);
        assert_eq!(history.total_versions, 3);
        let numbers: Vec<u64> = history.versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
        assert!(store.get_version("pol-1", 1).is_err());
    }

    #[test]
    fn restore_appends_instead_of_rewriting() {
        let store = VersionStore::default();
        store.create_version(&policy("original"), "alice", None);
        store.create_version(&policy("renamed"), "alice", None);
        let restored = store.restore_version("pol-1", 1, "bob").unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.policy.name, "original");
        assert_eq!(restored.change_reason.as_deref(), Some("Restored from version 1"));
        assert_eq!(restored.metadata["restoredFrom"], 1);
        assert_eq!(store.get_version("pol-1", 1).unwrap().policy.name, "original");
        assert_eq!(store.get_version_history("pol-1").total_versions, 3);
    }

    #[test]
    fn restore_current_or_missing_version_fails() {
        let store = VersionStore::default();
        store.create_version(&policy("a"), "alice", None);
        assert_eq!(store.restore_version("pol-1", 1, "bob").unwrap_err().status_code(), 400);
        assert_eq!(store.restore_version("pol-1", 9, "bob").unwrap_err().status_code(), 404);
    }

    #[test]
    fn delete_version_rejects_current() {
        let store = VersionStore::default();
        store.create_version(&policy("a"), "alice", None);
        store.create_version(&policy("b"), "alice", None);
        assert!(store.delete_version("pol-1", 2).is_err());
        assert_eq!(store.delete_version("pol-1", 1).unwrap().version, 1);
        assert!(store.delete_version("pol-1", 1).is_err());
        // Numbers are not reused after a delete.
        assert_eq!(store.create_version(&policy("c"), "alice", None).version, 3);
    }

    #[test]
    fn delete_all_resets_counter() {
        let store = VersionStore::default();
        store.create_version(&policy("a"), "alice", None);
        store.create_version(&policy("b"), "alice", None);
        assert_eq!(store.delete_all_versions("pol-1"), 2);
        assert_eq!(store.current_version("pol-1"), None);
        assert_eq!(store.get_version_history("pol-1").current_version, 0);
        assert_eq!(store.create_version(&policy("c"), "alice", None).version, 1);
    }

    #[test]
    fn unknown_policy_has_empty_history() {
        let store = VersionStore::default();
        let history = store.get_version_history("ghost");
        assert!(history.versions.is_empty());
        assert_eq!(history.current_version, 0);
        assert!(store.get_latest_version("ghost").is_none());
    }

    #[test]
    fn policy_ids_sorted() {
        let store = VersionStore::default();
        store.create_version(&Policy::new("b", "x").with_id("b"), "x", None);
        store.create_version(&Policy::new("a", "x").with_id("a"), "x", None);
        assert_eq!(store.policy_ids(), vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn numbers_strictly_increase_by_one(appends in 1usize..120, restores in proptest::collection::vec(any::<bool>(), 0..20)) {
            let store = VersionStore::default();
            let mut expected = 0u64;
            for i in 0..appends {
                let v = store.create_version(&policy(&format!("n{i}")), "alice", None);
                expected += 1;
                prop_assert_eq!(v.version, expected);
            }
            for restore in restores {
                if !restore {
                    continue;
                }
                let oldest = store.get_version_history("pol-1").versions[0].version;
                if oldest == expected {
                    continue;
                }
                let v = store.restore_version("pol-1", oldest, "bob").unwrap();
                expected += 1;
                prop_assert_eq!(v.version, expected);
            }
            let history = store.get_version_history("pol-1");
            prop_assert!(history.total_versions <= 50);
            prop_assert_eq!(history.current_version, expected);
            prop_assert!(history.versions.windows(2).all(|w| w[0].version < w[1].version));
        }
    }
}
