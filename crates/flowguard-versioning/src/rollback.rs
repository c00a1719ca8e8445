//! # Rollback Orchestrator
//!
//! Request, approve, execute. A rollback reverts a policy to the content of
//! an earlier version by appending a new version; history is never
//! rewritten.
//!
//! ## State Machine
//!
//! ```text
//! PENDING ──▶ APPROVED ──▶ COMPLETED
//!    │            │
//!    │            └──────▶ FAILED
//!    └──▶ REJECTED
//! ```
//!
//! Completed, rejected and failed are terminal. A failed request cannot be
//! retried under the same id.
//!
//! ## Staleness
//!
//! Each request records the policy's version number at creation
//! (`base_version`). Execution runs under the policy's mutation lock and
//! fails fast if the current version has moved since, so of several
//! approved requests created against the same snapshot only the first to
//! execute succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowguard_core::{FlowguardError, Policy, PolicyStore};
use flowguard_engine::{EvaluationCache, InvalidationScope};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::{PolicyVersion, VersionStore};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`RollbackRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved, awaiting execution.
    Approved,
    /// Declined. Terminal.
    Rejected,
    /// Executed. Terminal.
    Completed,
    /// Execution failed. Terminal.
    Failed,
}

impl RollbackStatus {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    /// States reachable in one step.
    pub fn valid_transitions(&self) -> &'static [RollbackStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::Completed, Self::Failed],
            Self::Rejected | Self::Completed | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / Result
// ---------------------------------------------------------------------------

/// A request to revert a policy to an earlier version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    /// Request id.
    pub id: String,
    /// Policy to roll back.
    pub policy_id: String,
    /// Version whose content will be restored.
    pub target_version: u64,
    /// Current version when the request was created.
    pub base_version: u64,
    /// Why the rollback is wanted.
    pub reason: String,
    /// Requester.
    pub requested_by: String,
    /// Request time.
    pub requested_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: RollbackStatus,
    /// Approver.
    pub approved_by: Option<String>,
    /// Approval time.
    pub approved_at: Option<DateTime<Utc>>,
    /// Rejecter.
    pub rejected_by: Option<String>,
    /// Rejection time.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Completion (or failure) time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure or rejection message.
    pub error_message: Option<String>,
}

impl RollbackRequest {
    fn require_status(&self, expected: RollbackStatus, target: RollbackStatus) -> Result<(), FlowguardError> {
        if self.status == expected {
            return Ok(());
        }
        let reason = if self.status.is_terminal() {
            format!("rollback request {} is {}", self.id, self.status)
        } else {
            format!("rollback request {} must be {}", self.id, expected)
        };
        Err(FlowguardError::InvalidTransition {
            from: self.status.to_string(),
            to: target.to_string(),
            reason,
        })
    }
}

/// Outcome of an executed rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    /// Executed request.
    pub request_id: String,
    /// Policy rolled back.
    pub policy_id: String,
    /// Version that was current before execution.
    pub from_version: u64,
    /// Version whose content was restored.
    pub to_version: u64,
    /// Version appended by the rollback.
    pub new_version: u64,
    /// The live policy after rollback; equal to the `to_version` snapshot.
    pub restored_policy: Policy,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Request counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStats {
    /// All requests.
    pub total: usize,
    /// Pending.
    pub pending: usize,
    /// Approved, not yet executed.
    pub approved: usize,
    /// Rejected.
    pub rejected: usize,
    /// Completed.
    pub completed: usize,
    /// Failed.
    pub failed: usize,
    /// Executed rollbacks recorded in history.
    pub executed: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives rollback requests against the shared policy, version and cache
/// stores.
#[derive(Debug)]
pub struct RollbackOrchestrator {
    store: Arc<PolicyStore>,
    versions: Arc<VersionStore>,
    cache: Arc<EvaluationCache>,
    requests: RwLock<HashMap<String, RollbackRequest>>,
    history: RwLock<HashMap<String, Vec<RollbackResult>>>,
}

impl RollbackOrchestrator {
    /// Create an orchestrator over the shared stores.
    pub fn new(
        store: Arc<PolicyStore>,
        versions: Arc<VersionStore>,
        cache: Arc<EvaluationCache>,
    ) -> Self {
        Self {
            store,
            versions,
            cache,
            requests: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Open a pending request.
    ///
    /// Fails with `NotFound` if `target_version` is not kept and with
    /// `InvalidState` if it is the current version.
    pub fn create_request(
        &self,
        policy_id: &str,
        target_version: u64,
        reason: &str,
        requested_by: &str,
    ) -> Result<RollbackRequest, FlowguardError> {
        self.versions.get_version(policy_id, target_version)?;
        let current = self
            .versions
            .current_version(policy_id)
            .ok_or_else(|| FlowguardError::not_found("version", format!("{policy_id}@current")))?;
        if current == target_version {
            return Err(FlowguardError::InvalidState(format!(
                "version {target_version} is already the current version of policy {policy_id}"
            )));
        }
        let request = RollbackRequest {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            target_version,
            base_version: current,
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
            requested_at: Utc::now(),
            status: RollbackStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            completed_at: None,
            error_message: None,
        };
        self.requests
            .write()
            .insert(request.id.clone(), request.clone());
        tracing::info!(
            request_id = %request.id,
            policy_id,
            target_version,
            base_version = current,
            "rollback requested"
        );
        Ok(request)
    }

    /// Approve a pending request.
    pub fn approve(&self, request_id: &str, approver: &str) -> Result<RollbackRequest, FlowguardError> {
        self.transition(request_id, RollbackStatus::Pending, RollbackStatus::Approved, |r| {
            r.approved_by = Some(approver.to_string());
            r.approved_at = Some(Utc::now());
        })
    }

    /// Reject a pending request.
    pub fn reject(
        &self,
        request_id: &str,
        rejecter: &str,
        reason: Option<&str>,
    ) -> Result<RollbackRequest, FlowguardError> {
        self.transition(request_id, RollbackStatus::Pending, RollbackStatus::Rejected, |r| {
            r.rejected_by = Some(rejecter.to_string());
            r.rejected_at = Some(Utc::now());
            r.error_message = reason.map(str::to_string);
        })
    }

    fn transition(
        &self,
        request_id: &str,
        expected: RollbackStatus,
        to: RollbackStatus,
        apply: impl FnOnce(&mut RollbackRequest),
    ) -> Result<RollbackRequest, FlowguardError> {
        let mut requests = self.requests.write();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| FlowguardError::not_found("rollback request", request_id))?;
        if let Err(e) = request.require_status(expected, to) {
            tracing::warn!(request_id, error = %e, "rollback transition rejected");
            return Err(e);
        }
        apply(request);
        request.status = to;
        tracing::info!(request_id, policy_id = %request.policy_id, status = %to, "rollback request updated");
        Ok(request.clone())
    }

    /// Execute an approved request.
    ///
    /// Appends the restore version, writes its snapshot to the live store,
    /// then invalidates the whole cache. Any failure marks the
    /// request failed and is returned.
    pub fn execute(&self, request_id: &str, executed_by: &str) -> Result<RollbackResult, FlowguardError> {
        let policy_id = self.get_request(request_id)?.policy_id;
        self.store.with_policy_lock(&policy_id, || {
            let request = self.get_request(request_id)?;
            request.require_status(RollbackStatus::Approved, RollbackStatus::Completed)?;

            match self.apply_rollback(&request, executed_by) {
                Ok(result) => {
                    self.finish(request_id, RollbackStatus::Completed, None);
                    self.history
                        .write()
                        .entry(result.policy_id.clone())
                        .or_default()
                        .push(result.clone());
                    tracing::info!(
                        request_id,
                        policy_id = %result.policy_id,
                        from_version = result.from_version,
                        to_version = result.to_version,
                        new_version = result.new_version,
                        "rollback completed"
                    );
                    Ok(result)
                }
                Err(e) => {
                    self.finish(request_id, RollbackStatus::Failed, Some(e.to_string()));
                    tracing::warn!(request_id, policy_id = %request.policy_id, error = %e, "rollback failed");
                    Err(e)
                }
            }
        })
    }

    fn apply_rollback(
        &self,
        request: &RollbackRequest,
        executed_by: &str,
    ) -> Result<RollbackResult, FlowguardError> {
        let current = self.versions.get_latest_version(&request.policy_id).ok_or_else(|| {
            FlowguardError::not_found("version", format!("{}@current", request.policy_id))
        })?;
        if current.version != request.base_version {
            return Err(FlowguardError::InvalidState(format!(
                "policy {} moved from version {} to {} since the rollback was requested",
                request.policy_id, request.base_version, current.version
            )));
        }
        // The store is written only once the restore version exists.
        let appended = self.versions.restore_version(
            &request.policy_id,
            request.target_version,
            executed_by,
        )?;
        self.store.insert(appended.policy.clone());
        self.cache.invalidate(InvalidationScope::All);

        Ok(RollbackResult {
            request_id: request.id.clone(),
            policy_id: request.policy_id.clone(),
            from_version: current.version,
            to_version: request.target_version,
            new_version: appended.version,
            restored_policy: appended.policy,
            timestamp: Utc::now(),
        })
    }

    fn finish(&self, request_id: &str, status: RollbackStatus, error: Option<String>) {
        if let Some(request) = self.requests.write().get_mut(request_id) {
            request.status = status;
            request.completed_at = Some(Utc::now());
            request.error_message = error;
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// A request by id.
    pub fn get_request(&self, request_id: &str) -> Result<RollbackRequest, FlowguardError> {
        self.requests
            .read()
            .get(request_id)
            .cloned()
            .ok_or_else(|| FlowguardError::not_found("rollback request", request_id))
    }

    /// Requests for one policy, newest first.
    pub fn requests_for_policy(&self, policy_id: &str) -> Vec<RollbackRequest> {
        let mut out: Vec<RollbackRequest> = self
            .requests
            .read()
            .values()
            .filter(|r| r.policy_id == policy_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    /// Every request, newest first.
    pub fn all_requests(&self) -> Vec<RollbackRequest> {
        let mut out: Vec<RollbackRequest> = self.requests.read().values().cloned().collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    /// Executed rollbacks, oldest first; for one policy or all of them.
    pub fn rollback_history(&self, policy_id: Option<&str>) -> Vec<RollbackResult> {
        let history = self.history.read();
        let mut out: Vec<RollbackResult> = match policy_id {
            Some(id) => history.get(id).cloned().unwrap_or_default(),
            None => history.values().flatten().cloned().collect(),
        };
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        out
    }

    /// Request counts by status.
    pub fn stats(&self) -> RollbackStats {
        let requests = self.requests.read();
        let mut stats = RollbackStats {
            total: requests.len(),
            executed: self.history.read().values().map(Vec::len).sum(),
            ..RollbackStats::default()
        };
        for request in requests.values() {
            match request.status {
                RollbackStatus::Pending => stats.pending += 1,
                RollbackStatus::Approved => stats.approved += 1,
                RollbackStatus::Rejected => stats.rejected += 1,
                RollbackStatus::Completed => stats.completed += 1,
                RollbackStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Kept versions other than the current one, newest first.
    pub fn rollbackable_versions(&self, policy_id: &str) -> Vec<PolicyVersion> {
        let history = self.versions.get_version_history(policy_id);
        let current = history.current_version;
        history
            .versions
            .into_iter()
            .rev()
            .filter(|v| v.version != current)
            .collect()
    }
}
