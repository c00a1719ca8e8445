//! # Change Requests
//!
//! Review gate for policy-document mutations. Same shape as approval
//! requests (pending, then approved or rejected) but with no deadline and
//! an independent id space. Applying an approved request to the policy
//! store is the management layer's job; this module only records that it
//! happened, at most once.

use chrono::{DateTime, Utc};
use flowguard_core::{FlowguardError, Policy, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::approval::ApprovalWorkflow;
use crate::audit::{Actor, AuditAction, AuditLogEntry, RESOURCE_CHANGE_REQUEST};

/// The mutation a change request proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Create a new policy.
    Create,
    /// Replace an existing policy's document.
    Update,
    /// Delete a policy.
    Delete,
    /// Enable a policy.
    Enable,
    /// Disable a policy.
    Disable,
}

impl ChangeType {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }

    /// Whether the change carries a policy document.
    pub fn needs_document(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a [`ChangeRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    /// Awaiting review.
    Pending,
    /// Approved. Terminal for review; may still be applied once.
    Approved,
    /// Rejected. Terminal.
    Rejected,
}

impl ChangeRequestStatus {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ChangeRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed policy mutation awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    /// Request id.
    pub id: String,
    /// Proposed mutation.
    pub change_type: ChangeType,
    /// Target policy; required for everything but `create`.
    pub policy_id: Option<String>,
    /// Proposed document for `create` and `update`.
    pub policy: Option<Policy>,
    /// Why the change is wanted.
    pub justification: String,
    /// Lifecycle state.
    pub status: ChangeRequestStatus,
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
    /// Reviewer comment or rejection reason.
    pub review_comment: Option<String>,
    /// Who applied the approved change.
    pub applied_by: Option<String>,
    /// When the approved change was applied.
    pub applied_at: Option<DateTime<Utc>>,
}

impl ChangeRequest {
    /// Whether the approved change has been applied.
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    fn require_pending(&self, target: ChangeRequestStatus) -> Result<(), FlowguardError> {
        if self.status == ChangeRequestStatus::Pending {
            return Ok(());
        }
        Err(FlowguardError::InvalidTransition {
            from: self.status.to_string(),
            to: target.to_string(),
            reason: format!("change request {} is not pending", self.id),
        })
    }
}

fn check_shape(
    change_type: ChangeType,
    policy_id: Option<&str>,
    policy: Option<&Policy>,
) -> Result<(), ValidationError> {
    if change_type.needs_document() && policy.is_none() {
        return Err(ValidationError::InvalidRequest(format!(
            "{change_type} change requires a policy document"
        )));
    }
    if change_type != ChangeType::Create && policy_id.is_none() {
        return Err(ValidationError::InvalidRequest(format!(
            "{change_type} change requires a policy id"
        )));
    }
    if let Some(policy) = policy {
        policy.validate()?;
    }
    Ok(())
}

impl ApprovalWorkflow {
    /// File a change request.
    ///
    /// For `update`, the proposed document's id is forced to `policy_id`.
    pub fn request_change(
        &self,
        change_type: ChangeType,
        policy_id: Option<&str>,
        policy: Option<Policy>,
        justification: &str,
        actor: impl Into<Actor>,
    ) -> Result<ChangeRequest, FlowguardError> {
        let actor = actor.into();
        check_shape(change_type, policy_id, policy.as_ref())?;
        let policy = match (change_type, policy, policy_id) {
            (ChangeType::Update, Some(mut doc), Some(id)) => {
                doc.id = id.to_string();
                Some(doc)
            }
            (_, doc, _) => doc,
        };
        let policy_id = policy_id
            .map(str::to_string)
            .or_else(|| policy.as_ref().map(|p| p.id.clone()));
        let now = Utc::now();
        let request = ChangeRequest {
            id: uuid::Uuid::new_v4().to_string(),
            change_type,
            policy_id,
            policy,
            justification: justification.to_string(),
            status: ChangeRequestStatus::Pending,
            requested_by: actor.user_id.clone(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            review_comment: None,
            applied_by: None,
            applied_at: None,
        };
        self.change_requests
            .write()
            .insert(request.id.clone(), request.clone());
        self.audit_change(&actor, AuditAction::ChangeRequested, &request, now);
        tracing::info!(
            request_id = %request.id,
            change_type = change_type.as_str(),
            policy_id = ?request.policy_id,
            "change requested"
        );
        Ok(request)
    }

    /// Approve a pending change request.
    pub fn approve_change(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        comment: Option<&str>,
    ) -> Result<ChangeRequest, FlowguardError> {
        let actor = actor.into();
        self.review_change(request_id, &actor, ChangeRequestStatus::Approved, |r, now| {
            r.approved_by = Some(actor.user_id.clone());
            r.approved_at = Some(now);
            r.review_comment = comment.map(str::to_string);
        })
    }

    /// Reject a pending change request.
    pub fn reject_change(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
        reason: Option<&str>,
    ) -> Result<ChangeRequest, FlowguardError> {
        let actor = actor.into();
        self.review_change(request_id, &actor, ChangeRequestStatus::Rejected, |r, now| {
            r.rejected_by = Some(actor.user_id.clone());
            r.rejected_at = Some(now);
            r.review_comment = reason.map(str::to_string);
        })
    }

    fn review_change(
        &self,
        request_id: &str,
        actor: &Actor,
        to: ChangeRequestStatus,
        apply: impl FnOnce(&mut ChangeRequest, DateTime<Utc>),
    ) -> Result<ChangeRequest, FlowguardError> {
        let now = Utc::now();
        let mut requests = self.change_requests.write();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| FlowguardError::not_found("change request", request_id))?;
        if let Err(e) = request.require_pending(to) {
            tracing::warn!(request_id, error = %e, "change request transition rejected");
            return Err(e);
        }
        apply(request, now);
        request.status = to;
        let action = match to {
            ChangeRequestStatus::Rejected => AuditAction::ChangeRejected,
            _ => AuditAction::ChangeApproved,
        };
        self.audit_change(actor, action, request, now);
        tracing::info!(request_id, status = %to, "change request reviewed");
        Ok(request.clone())
    }

    /// Record that an approved change request has been applied.
    ///
    /// Refuses requests that are not approved or were already applied.
    pub fn mark_change_applied(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
    ) -> Result<ChangeRequest, FlowguardError> {
        let actor = actor.into();
        let now = Utc::now();
        let mut requests = self.change_requests.write();
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| FlowguardError::not_found("change request", request_id))?;
        if request.status != ChangeRequestStatus::Approved {
            return Err(FlowguardError::InvalidState(format!(
                "change request {request_id} is {} and cannot be applied",
                request.status
            )));
        }
        if request.is_applied() {
            return Err(FlowguardError::InvalidState(format!(
                "change request {request_id} was already applied"
            )));
        }
        request.applied_by = Some(actor.user_id.clone());
        request.applied_at = Some(now);
        self.audit_change(&actor, AuditAction::ChangeApplied, request, now);
        Ok(request.clone())
    }

    /// A change request by id.
    pub fn get_change_request(&self, request_id: &str) -> Result<ChangeRequest, FlowguardError> {
        self.change_requests
            .read()
            .get(request_id)
            .cloned()
            .ok_or_else(|| FlowguardError::not_found("change request", request_id))
    }

    /// Change requests, optionally filtered by status, newest first.
    pub fn change_requests(&self, status: Option<ChangeRequestStatus>) -> Vec<ChangeRequest> {
        let mut out: Vec<ChangeRequest> = self
            .change_requests
            .read()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        out
    }

    fn audit_change(&self, actor: &Actor, action: AuditAction, request: &ChangeRequest, now: DateTime<Utc>) {
        self.audit.record(AuditLogEntry::new(
            actor,
            action,
            RESOURCE_CHANGE_REQUEST,
            &request.id,
            json!({
                "changeType": request.change_type.as_str(),
                "policyId": request.policy_id,
                "status": request.status.as_str(),
                "comment": request.review_comment,
            }),
            now,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalConfig;
    use crate::audit::AuditQuery;

    fn workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(ApprovalConfig::default())
    }

    fn doc() -> Policy {
        Policy::new("Shell safety", "alice").with_id("pol-1")
    }

    #[test]
    fn create_requires_document() {
        let wf = workflow();
        let err = wf
            .request_change(ChangeType::Create, None, None, "new", "alice")
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        let ok = wf
            .request_change(ChangeType::Create, None, Some(doc()), "new", "alice")
            .unwrap();
        assert_eq!(ok.policy_id.as_deref(), Some("pol-1"));
        assert_eq!(ok.status, ChangeRequestStatus::Pending);
    }

    #[test]
    fn toggles_require_policy_id() {
        let wf = workflow();
        assert!(wf
            .request_change(ChangeType::Disable, None, None, "x", "alice")
            .is_err());
        assert!(wf
            .request_change(ChangeType::Disable, Some("pol-1"), None, "x", "alice")
            .is_ok());
    }

    #[test]
    fn invalid_document_is_rejected() {
        let wf = workflow();
        let bad = Policy::new("", "alice");
        assert!(wf
            .request_change(ChangeType::Create, None, Some(bad), "x", "alice")
            .is_err());
    }

    #[test]
    fn update_document_takes_target_id() {
        let wf = workflow();
        let request = wf
            .request_change(ChangeType::Update, Some("pol-9"), Some(doc()), "x", "alice")
            .unwrap();
        assert_eq!(request.policy.unwrap().id, "pol-9");
    }

    #[test]
    fn review_is_one_way() {
        let wf = workflow();
        let request = wf
            .request_change(ChangeType::Enable, Some("pol-1"), None, "x", "alice")
            .unwrap();
        let approved = wf.approve_change(&request.id, "bob", Some("lgtm")).unwrap();
        assert_eq!(approved.status, ChangeRequestStatus::Approved);
        assert_eq!(approved.review_comment.as_deref(), Some("lgtm"));
        assert!(wf.reject_change(&request.id, "bob", None).is_err());
        assert!(wf.approve_change(&request.id, "bob", None).is_err());
    }

    #[test]
    fn apply_at_most_once_and_only_when_approved() {
        let wf = workflow();
        let pending = wf
            .request_change(ChangeType::Delete, Some("pol-1"), None, "x", "alice")
            .unwrap();
        assert!(wf.mark_change_applied(&pending.id, "bob").is_err());
        wf.approve_change(&pending.id, "bob", None).unwrap();
        assert!(wf.mark_change_applied(&pending.id, "bob").unwrap().is_applied());
        assert!(wf.mark_change_applied(&pending.id, "bob").is_err());

        let rejected = wf
            .request_change(ChangeType::Delete, Some("pol-1"), None, "x", "alice")
            .unwrap();
        wf.reject_change(&rejected.id, "bob", Some("no")).unwrap();
        assert!(wf.mark_change_applied(&rejected.id, "bob").is_err());
    }

    #[test]
    fn transitions_are_audited() {
        let wf = workflow();
        let request = wf
            .request_change(ChangeType::Enable, Some("pol-1"), None, "x", "alice")
            .unwrap();
        wf.reject_change(&request.id, Actor::new("bob").with_ip("10.1.1.1"), Some("no"))
            .unwrap();
        let entries = wf.audit().query(&AuditQuery::new().resource(&request.id));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::ChangeRejected);
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.1.1.1"));
        assert_eq!(entries[1].action, AuditAction::ChangeRequested);
    }

    #[test]
    fn listing_by_status() {
        let wf = workflow();
        let a = wf
            .request_change(ChangeType::Enable, Some("p"), None, "x", "alice")
            .unwrap();
        wf.request_change(ChangeType::Disable, Some("p"), None, "x", "alice")
            .unwrap();
        wf.approve_change(&a.id, "bob", None).unwrap();
        assert_eq!(wf.change_requests(None).len(), 2);
        assert_eq!(wf.change_requests(Some(ChangeRequestStatus::Pending)).len(), 1);
        assert_eq!(wf.change_requests(Some(ChangeRequestStatus::Approved)).len(), 1);
        assert!(wf.get_change_request("ghost").is_err());
    }
}
