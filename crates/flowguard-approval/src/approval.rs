//! # Approval Workflow
//!
//! Time-boxed human approval for sensitive workflow steps.
//!
//! ## State Machine
//!
//! ```text
//! PENDING ──▶ APPROVED
//!    │
//!    ├──────▶ REJECTED
//!    │
//!    └──────▶ EXPIRED
//! ```
//!
//! Every transition starts from pending and every other state is terminal.
//!
//! ## Lazy Expiry
//!
//! There is no timer. A pending request whose `expires_at` has passed is
//! flipped to expired (and audited) by whichever access notices first:
//! approve, reject, lookup, listing, or [`ApprovalWorkflow::cleanup_expired_approvals`].
//! An approve or reject that finds the deadline passed fails with
//! `InvalidState` instead of succeeding.
//!
//! Time-dependent operations have an `_at(now)` form; the plain form uses
//! the wall clock.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use flowguard_core::{FlowguardError, ValidationError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{Actor, AuditAction, AuditLog, AuditLogEntry, RESOURCE_APPROVAL};
use crate::change_request::{ChangeRequest, ChangeRequestStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Approval defaults and audit retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Deadline applied when a request does not specify one.
    pub default_expiry_hours: f64,
    /// Audit log capacity.
    pub audit_capacity: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24.0,
            audit_capacity: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Status / Request
// ---------------------------------------------------------------------------

/// Lifecycle state of an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Granted. Terminal.
    Approved,
    /// Declined. Terminal.
    Rejected,
    /// Deadline passed while pending. Terminal.
    Expired,
}

impl ApprovalStatus {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// States reachable in one step.
    pub fn valid_transitions(&self) -> &'static [ApprovalStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected, Self::Expired],
            Self::Approved | Self::Rejected | Self::Expired => &[],
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-boxed request to approve a sensitive step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Request id.
    pub id: String,
    /// Policy that demanded approval.
    pub policy_id: String,
    /// Workflow run.
    pub workflow_id: String,
    /// Step awaiting approval.
    pub step_id: String,
    /// Lifecycle state.
    pub status: ApprovalStatus,
    /// Requester.
    pub requested_by: String,
    /// Request time.
    pub requested_at: DateTime<Utc>,
    /// Approver.
    pub approved_by: Option<String>,
    /// Approval time.
    pub approved_at: Option<DateTime<Utc>>,
    /// Rejecter.
    pub rejected_by: Option<String>,
    /// Rejection time.
    pub rejected_at: Option<DateTime<Utc>>,
    /// Approval comment or rejection reason.
    pub reason: Option<String>,
    /// Deadline.
    pub expires_at: DateTime<Utc>,
    /// What the step will change, as supplied by the requester.
    pub changes: serde_json::Value,
}

impl ApprovalRequest {
    /// Whether the request is pending past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.expires_at
    }
}

/// Counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// All requests.
    pub total: usize,
    /// Pending.
    pub pending: usize,
    /// Approved.
    pub approved: usize,
    /// Rejected.
    pub rejected: usize,
    /// Expired (approvals only).
    pub expired: usize,
}

/// Counts for both request kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStats {
    /// Approval requests.
    pub approvals: StatusCounts,
    /// Change requests.
    pub change_requests: StatusCounts,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Approval and change-request store with its audit log.
#[derive(Debug)]
pub struct ApprovalWorkflow {
    config: ApprovalConfig,
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
    pub(crate) change_requests: RwLock<HashMap<String, ChangeRequest>>,
    pub(crate) audit: AuditLog,
}

impl Default for ApprovalWorkflow {
    fn default() -> Self {
        Self::new(ApprovalConfig::default())
    }
}

impl ApprovalWorkflow {
    /// Create an empty workflow.
    pub fn new(config: ApprovalConfig) -> Self {
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            config,
            approvals: RwLock::new(HashMap::new()),
            change_requests: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    // ── Request ─────────────────────────────────────────────────────────

    /// Open a pending approval expiring `expires_in_hours` from now
    /// (default from config).
    pub fn request_approval(
        &self,
        policy_id: &str,
        workflow_id: &str,
        step_id: &str,
        actor: impl Into<Actor>,
        changes: serde_json::Value,
        expires_in_hours: Option<f64>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        self.request_approval_at(
            policy_id,
            workflow_id,
            step_id,
            actor,
            changes,
            expires_in_hours,
            Utc::now(),
        )
    }

    /// [`Self::request_approval`] as of `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn request_approval_at(
        &self,
        policy_id: &str,
        workflow_id: &str,
        step_id: &str,
        actor: impl Into<Actor>,
        changes: serde_json::Value,
        expires_in_hours: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        let actor = actor.into();
        let hours = expires_in_hours.unwrap_or(self.config.default_expiry_hours);
        let window = expiry_window(hours)?;
        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
            status: ApprovalStatus::Pending,
            requested_by: actor.user_id.clone(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            reason: None,
            expires_at: now + window,
            changes,
        };
        self.approvals
            .write()
            .insert(request.id.clone(), request.clone());
        self.audit_approval(&actor, AuditAction::ApprovalRequested, &request, now);
        tracing::info!(
            request_id = %request.id,
            policy_id,
            workflow_id,
            step_id,
            expires_at = %request.expires_at,
            "approval requested"
        );
        Ok(request)
    }

    // ── Decide ──────────────────────────────────────────────────────────

    /// Approve a pending request.
    pub fn approve(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        comment: Option<&str>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        self.approve_at(request_id, actor, comment, Utc::now())
    }

    /// [`Self::approve`] as of `now`.
    pub fn approve_at(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        let actor = actor.into();
        self.decide(request_id, &actor, ApprovalStatus::Approved, now, |r| {
            r.approved_by = Some(actor.user_id.clone());
            r.approved_at = Some(now);
            r.reason = comment.map(str::to_string);
        })
    }

    /// Reject a pending request.
    pub fn reject(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        self.reject_at(request_id, actor, reason, Utc::now())
    }

    /// [`Self::reject`] as of `now`.
    pub fn reject_at(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        let actor = actor.into();
        self.decide(request_id, &actor, ApprovalStatus::Rejected, now, |r| {
            r.rejected_by = Some(actor.user_id.clone());
            r.rejected_at = Some(now);
            r.reason = reason.map(str::to_string);
        })
    }

    fn decide(
        &self,
        request_id: &str,
        actor: &Actor,
        to: ApprovalStatus,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut ApprovalRequest),
    ) -> Result<ApprovalRequest, FlowguardError> {
        let mut approvals = self.approvals.write();
        let request = approvals
            .get_mut(request_id)
            .ok_or_else(|| FlowguardError::not_found("approval request", request_id))?;

        if request.is_overdue(now) {
            self.expire(request, actor, now);
            return Err(FlowguardError::InvalidState(format!(
                "approval request {request_id} expired at {}",
                request.expires_at
            )));
        }
        if request.status != ApprovalStatus::Pending {
            let err = FlowguardError::InvalidTransition {
                from: request.status.to_string(),
                to: to.to_string(),
                reason: format!("approval request {request_id} is not pending"),
            };
            tracing::warn!(request_id, error = %err, "approval transition rejected");
            return Err(err);
        }

        apply(request);
        request.status = to;
        let action = match to {
            ApprovalStatus::Rejected => AuditAction::ApprovalRejected,
            _ => AuditAction::ApprovalGranted,
        };
        self.audit_approval(actor, action, request, now);
        tracing::info!(
            request_id,
            policy_id = %request.policy_id,
            status = %to,
            user_id = %actor.user_id,
            "approval decided"
        );
        Ok(request.clone())
    }

    fn expire(&self, request: &mut ApprovalRequest, actor: &Actor, now: DateTime<Utc>) {
        request.status = ApprovalStatus::Expired;
        self.audit_approval(actor, AuditAction::ApprovalExpired, request, now);
        tracing::warn!(
            request_id = %request.id,
            policy_id = %request.policy_id,
            expires_at = %request.expires_at,
            "approval request expired"
        );
    }

    // ── Sweep ───────────────────────────────────────────────────────────

    /// Expire every overdue pending request. Returns how many flipped.
    pub fn cleanup_expired_approvals(&self) -> usize {
        self.cleanup_expired_approvals_at(Utc::now())
    }

    /// [`Self::cleanup_expired_approvals`] as of `now`.
    pub fn cleanup_expired_approvals_at(&self, now: DateTime<Utc>) -> usize {
        let system = Actor::new("system");
        let mut approvals = self.approvals.write();
        let mut flipped = 0;
        for request in approvals.values_mut() {
            if request.is_overdue(now) {
                self.expire(request, &system, now);
                flipped += 1;
            }
        }
        flipped
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// A request by id, with lazy expiry applied.
    pub fn get_approval(&self, request_id: &str) -> Result<ApprovalRequest, FlowguardError> {
        self.get_approval_at(request_id, Utc::now())
    }

    /// [`Self::get_approval`] as of `now`.
    pub fn get_approval_at(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, FlowguardError> {
        let mut approvals = self.approvals.write();
        let request = approvals
            .get_mut(request_id)
            .ok_or_else(|| FlowguardError::not_found("approval request", request_id))?;
        if request.is_overdue(now) {
            self.expire(request, &Actor::new("system"), now);
        }
        Ok(request.clone())
    }

    /// Pending requests, optionally for one policy, newest first. Overdue
    /// requests are expired rather than listed.
    pub fn pending_approvals(&self, policy_id: Option<&str>) -> Vec<ApprovalRequest> {
        self.pending_approvals_at(policy_id, Utc::now())
    }

    /// [`Self::pending_approvals`] as of `now`.
    pub fn pending_approvals_at(
        &self,
        policy_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ApprovalRequest> {
        self.cleanup_expired_approvals_at(now);
        let mut out: Vec<ApprovalRequest> = self
            .approvals
            .read()
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .filter(|r| policy_id.map_or(true, |p| r.policy_id == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    /// Every approval request, newest first, with lazy expiry applied.
    pub fn all_approvals(&self) -> Vec<ApprovalRequest> {
        self.all_approvals_at(Utc::now())
    }

    /// [`Self::all_approvals`] as of `now`.
    pub fn all_approvals_at(&self, now: DateTime<Utc>) -> Vec<ApprovalRequest> {
        self.cleanup_expired_approvals_at(now);
        let mut out: Vec<ApprovalRequest> = self.approvals.read().values().cloned().collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    /// Counts by status for approvals and change requests. Overdue
    /// requests are counted as expired.
    pub fn stats(&self) -> ApprovalStats {
        self.stats_at(Utc::now())
    }

    /// [`Self::stats`] as of `now`.
    pub fn stats_at(&self, now: DateTime<Utc>) -> ApprovalStats {
        self.cleanup_expired_approvals_at(now);
        let mut stats = ApprovalStats::default();
        for request in self.approvals.read().values() {
            let counts = &mut stats.approvals;
            counts.total += 1;
            match request.status {
                ApprovalStatus::Pending => counts.pending += 1,
                ApprovalStatus::Approved => counts.approved += 1,
                ApprovalStatus::Rejected => counts.rejected += 1,
                ApprovalStatus::Expired => counts.expired += 1,
            }
        }
        for request in self.change_requests.read().values() {
            let counts = &mut stats.change_requests;
            counts.total += 1;
            match request.status {
                ChangeRequestStatus::Pending => counts.pending += 1,
                ChangeRequestStatus::Approved => counts.approved += 1,
                ChangeRequestStatus::Rejected => counts.rejected += 1,
            }
        }
        stats
    }

    fn audit_approval(
        &self,
        actor: &Actor,
        action: AuditAction,
        request: &ApprovalRequest,
        now: DateTime<Utc>,
    ) {
        self.audit.record(AuditLogEntry::new(
            actor,
            action,
            RESOURCE_APPROVAL,
            &request.id,
            json!({
                "policyId": request.policy_id,
                "workflowId": request.workflow_id,
                "stepId": request.step_id,
                "status": request.status.as_str(),
                "reason": request.reason,
            }),
            now,
        ));
    }
}

fn expiry_window(hours: f64) -> Result<Duration, ValidationError> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(ValidationError::InvalidRequest(format!(
            "expiry must be a positive number of hours, got {hours}"
        )));
    }
    let millis = (hours * 3_600_000.0).round();
    if millis < 1.0 || millis > i64::MAX as f64 / 2.0 {
        return Err(ValidationError::InvalidRequest(format!(
            "expiry of {hours} hours is out of range"
        )));
    }
    Ok(Duration::milliseconds(millis as i64))
}
