//! # Policy Store
//!
//! The single registry of live [`Policy`] records. Every component that
//! reads or mutates policies receives the same `Arc<PolicyStore>`; there is
//! no second copy of policy state anywhere in the workspace.
//!
//! ## Concurrency
//!
//! Reads take a shared `parking_lot::RwLock` and return clones, so
//! evaluation never holds the lock while rules run. Writers that must keep
//! several stores consistent (store write, version append, cache
//! invalidation) serialize on a per-policy mutex obtained through
//! [`PolicyStore::with_policy_lock`]. Locks for different policies are
//! independent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::FlowguardError;
use crate::policy::Policy;

/// Thread-safe registry of live policies, keyed by policy id.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: RwLock<BTreeMap<String, Policy>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PolicyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy, returning the previous record.
    pub fn insert(&self, policy: Policy) -> Option<Policy> {
        self.policies.write().insert(policy.id.clone(), policy)
    }

    /// Retrieve a policy by id.
    pub fn get(&self, policy_id: &str) -> Option<Policy> {
        self.policies.read().get(policy_id).cloned()
    }

    /// Retrieve a policy by id or fail with `NotFound`.
    pub fn require(&self, policy_id: &str) -> Result<Policy, FlowguardError> {
        self.get(policy_id)
            .ok_or_else(|| FlowguardError::not_found("policy", policy_id))
    }

    /// All policies, ordered by id.
    pub fn list(&self) -> Vec<Policy> {
        self.policies.read().values().cloned().collect()
    }

    /// Enabled policies, ordered by id.
    pub fn list_enabled(&self) -> Vec<Policy> {
        self.policies
            .read()
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect()
    }

    /// Atomically read-validate-update a policy.
    ///
    /// The closure runs under the write lock and may reject the update by
    /// returning `Err`, in which case any partial mutation it made is
    /// discarded. Returns the updated record.
    pub fn try_update(
        &self,
        policy_id: &str,
        f: impl FnOnce(&mut Policy) -> Result<(), FlowguardError>,
    ) -> Result<Policy, FlowguardError> {
        let mut guard = self.policies.write();
        let current = guard
            .get(policy_id)
            .ok_or_else(|| FlowguardError::not_found("policy", policy_id))?;
        let mut draft = current.clone();
        f(&mut draft)?;
        guard.insert(policy_id.to_string(), draft.clone());
        Ok(draft)
    }

    /// Remove a policy by id.
    pub fn remove(&self, policy_id: &str) -> Option<Policy> {
        self.policies.write().remove(policy_id)
    }

    /// Whether a policy exists.
    pub fn contains(&self, policy_id: &str) -> bool {
        self.policies.read().contains_key(policy_id)
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` while holding the mutation lock for `policy_id`.
    ///
    /// Every mutation of a policy (edit, version append, rollback execution)
    /// goes through this so that at most one is in flight per policy.
    /// The lock entry of a policy that no longer exists is dropped once
    /// nobody else holds or waits on it.
    pub fn with_policy_lock<R>(&self, policy_id: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(policy_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let result = {
            let _guard = lock.lock();
            f()
        };
        if !self.contains(policy_id) {
            let mut locks = self.locks.lock();
            // Map entry plus this clone: no other caller is queued.
            let idle = locks
                .get(policy_id)
                .is_some_and(|l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2);
            if idle {
                locks.remove(policy_id);
            }
        }
        result
    }
}
