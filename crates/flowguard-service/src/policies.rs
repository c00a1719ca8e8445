//! # Policy Management
//!
//! [`PolicyService`] is the mutation surface over the shared stores:
//! policy CRUD, rule edits, and application of approved change requests.
//!
//! ## Write Ordering
//!
//! Every mutation of a policy runs under that policy's lock and performs,
//! in order:
//!
//! 1. the store write (validated; a failing edit leaves the store untouched)
//! 2. a version append recording the new document
//! 3. cache invalidation for the policy
//!
//! so a reader can never fill the cache from a store state older than the
//! newest version. Deleting a policy removes it from the store and the
//! cache; its version history is kept and it can be brought back by a
//! rollback.

use std::sync::Arc;

use chrono::Utc;
use flowguard_approval::{Actor, ApprovalWorkflow, ChangeRequestStatus, ChangeType};
use flowguard_core::{
    Action, Condition, FlowguardError, Policy, PolicyPriority, PolicyStore, Rule, RuleType,
    ValidationError,
};
use flowguard_engine::{EvaluationCache, InvalidationScope};
use flowguard_versioning::VersionStore;
use serde::Deserialize;

/// Partial update of a policy's basic fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<PolicyPriority>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

/// Partial update of a rule. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New rule type.
    #[serde(rename = "type")]
    pub rule_type: Option<RuleType>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// Replacement conditions.
    pub conditions: Option<Vec<Condition>>,
    /// Replacement actions.
    pub actions: Option<Vec<Action>>,
}

/// Policy and rule mutations over the shared stores.
#[derive(Debug, Clone)]
pub struct PolicyService {
    store: Arc<PolicyStore>,
    versions: Arc<VersionStore>,
    cache: Arc<EvaluationCache>,
    approvals: Arc<ApprovalWorkflow>,
}

impl PolicyService {
    /// Create a service over the shared stores.
    pub fn new(
        store: Arc<PolicyStore>,
        versions: Arc<VersionStore>,
        cache: Arc<EvaluationCache>,
        approvals: Arc<ApprovalWorkflow>,
    ) -> Self {
        Self {
            store,
            versions,
            cache,
            approvals,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// A policy by id.
    pub fn get_policy(&self, policy_id: &str) -> Result<Policy, FlowguardError> {
        self.store.require(policy_id)
    }

    /// Every policy, ordered by id.
    pub fn list_policies(&self) -> Vec<Policy> {
        self.store.list()
    }

    // ── Policies ────────────────────────────────────────────────────────

    /// Register a new policy and record version 1 (or the next number, if
    /// the id has history from an earlier deletion).
    pub fn create_policy(&self, policy: Policy, actor: &str) -> Result<Policy, FlowguardError> {
        let policy_id = policy.id.clone();
        self.store
            .with_policy_lock(&policy_id, || self.create_locked(policy, actor, "Policy created"))
    }

    /// Apply a partial update to the basic fields.
    pub fn update_policy(
        &self,
        policy_id: &str,
        update: PolicyUpdate,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        self.mutate(policy_id, actor, "Policy updated", |policy| {
            if let Some(name) = update.name {
                policy.name = name;
            }
            if let Some(description) = update.description {
                policy.description = description;
            }
            if let Some(priority) = update.priority {
                policy.priority = priority;
            }
            if let Some(enabled) = update.enabled {
                policy.enabled = enabled;
            }
            Ok(())
        })
    }

    /// Replace a policy's document, keeping its id and provenance.
    pub fn replace_policy(
        &self,
        policy_id: &str,
        document: Policy,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        self.store.with_policy_lock(policy_id, || {
            self.replace_locked(policy_id, document, actor, "Policy replaced")
        })
    }

    /// Enable or disable a policy.
    pub fn set_enabled(
        &self,
        policy_id: &str,
        enabled: bool,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        let reason = if enabled { "Policy enabled" } else { "Policy disabled" };
        self.mutate(policy_id, actor, reason, |policy| {
            policy.enabled = enabled;
            Ok(())
        })
    }

    /// Remove a policy from the store and the cache. Its version history
    /// is kept.
    pub fn delete_policy(&self, policy_id: &str, actor: &str) -> Result<Policy, FlowguardError> {
        self.store
            .with_policy_lock(policy_id, || self.delete_locked(policy_id, actor))
    }

    // ── Rules ───────────────────────────────────────────────────────────

    /// Append a rule. Fails if the rule id is already used in the policy.
    pub fn add_rule(&self, policy_id: &str, rule: Rule, actor: &str) -> Result<Policy, FlowguardError> {
        let reason = format!("Rule {} added", rule.id);
        self.mutate(policy_id, actor, &reason, |policy| {
            policy.rules.push(rule);
            Ok(())
        })
    }

    /// Apply a partial update to one rule.
    pub fn update_rule(
        &self,
        policy_id: &str,
        rule_id: &str,
        update: RuleUpdate,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        let reason = format!("Rule {rule_id} updated");
        self.mutate(policy_id, actor, &reason, |policy| {
            let rule = require_rule(policy, rule_id)?;
            if let Some(name) = update.name {
                rule.name = name;
            }
            if let Some(rule_type) = update.rule_type {
                rule.rule_type = rule_type;
            }
            if let Some(enabled) = update.enabled {
                rule.enabled = enabled;
            }
            if let Some(conditions) = update.conditions {
                rule.conditions = conditions;
            }
            if let Some(actions) = update.actions {
                rule.actions = actions;
            }
            Ok(())
        })
    }

    /// Remove one rule.
    pub fn remove_rule(
        &self,
        policy_id: &str,
        rule_id: &str,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        let reason = format!("Rule {rule_id} removed");
        self.mutate(policy_id, actor, &reason, |policy| {
            let before = policy.rules.len();
            policy.rules.retain(|r| r.id != rule_id);
            if policy.rules.len() == before {
                return Err(rule_not_found(policy_id, rule_id));
            }
            Ok(())
        })
    }

    /// Flip one rule's enabled flag.
    pub fn toggle_rule(
        &self,
        policy_id: &str,
        rule_id: &str,
        actor: &str,
    ) -> Result<Policy, FlowguardError> {
        self.store.with_policy_lock(policy_id, || {
            let enabled = !self
                .store
                .require(policy_id)?
                .rule(rule_id)
                .ok_or_else(|| rule_not_found(policy_id, rule_id))?
                .enabled;
            let state = if enabled { "enabled" } else { "disabled" };
            let reason = format!("Rule {rule_id} {state}");
            self.mutate_locked(policy_id, actor, &reason, |policy| {
                require_rule(policy, rule_id)?.enabled = enabled;
                Ok(())
            })
        })
    }

    // ── Change requests ─────────────────────────────────────────────────

    /// Carry out an approved change request and mark it applied.
    ///
    /// Pending and rejected requests are refused, as is a request that was
    /// already applied. Returns the policy as it stands afterwards (for a
    /// delete, the removed document).
    pub fn apply_change_request(
        &self,
        request_id: &str,
        actor: impl Into<Actor>,
    ) -> Result<Policy, FlowguardError> {
        let actor = actor.into();
        let policy_id = self
            .approvals
            .get_change_request(request_id)?
            .policy_id
            .ok_or_else(|| {
                ValidationError::InvalidRequest(format!("change request {request_id} has no policy id"))
            })?;

        self.store.with_policy_lock(&policy_id, || {
            let request = self.approvals.get_change_request(request_id)?;
            if request.status != ChangeRequestStatus::Approved {
                return Err(FlowguardError::InvalidState(format!(
                    "change request {request_id} is {}, not approved",
                    request.status
                )));
            }
            if request.is_applied() {
                return Err(FlowguardError::InvalidState(format!(
                    "change request {request_id} was already applied"
                )));
            }

            let user = actor.user_id.as_str();
            let reason = format!("Change request {}: {}", request.id, request.justification);
            let document = || {
                request.policy.clone().ok_or_else(|| {
                    FlowguardError::from(ValidationError::InvalidRequest(format!(
                        "change request {request_id} carries no policy document"
                    )))
                })
            };
            let policy = match request.change_type {
                ChangeType::Create => self.create_locked(document()?, user, &reason)?,
                ChangeType::Update => self.replace_locked(&policy_id, document()?, user, &reason)?,
                ChangeType::Delete => self.delete_locked(&policy_id, user)?,
                ChangeType::Enable | ChangeType::Disable => {
                    let enabled = request.change_type == ChangeType::Enable;
                    self.mutate_locked(&policy_id, user, &reason, |policy| {
                        policy.enabled = enabled;
                        Ok(())
                    })?
                }
            };
            self.approvals.mark_change_applied(request_id, actor.clone())?;
            tracing::info!(
                request_id,
                policy_id = %policy_id,
                change_type = request.change_type.as_str(),
                "change request applied"
            );
            Ok(policy)
        })
    }

    // ── Internals (caller holds the policy lock) ────────────────────────

    fn mutate(
        &self,
        policy_id: &str,
        actor: &str,
        reason: &str,
        edit: impl FnOnce(&mut Policy) -> Result<(), FlowguardError>,
    ) -> Result<Policy, FlowguardError> {
        self.store
            .with_policy_lock(policy_id, || self.mutate_locked(policy_id, actor, reason, edit))
    }

    fn mutate_locked(
        &self,
        policy_id: &str,
        actor: &str,
        reason: &str,
        edit: impl FnOnce(&mut Policy) -> Result<(), FlowguardError>,
    ) -> Result<Policy, FlowguardError> {
        let updated = self.store.try_update(policy_id, |policy| {
            edit(policy)?;
            policy.validate()?;
            policy.updated_at = Utc::now();
            Ok(())
        })?;
        self.record(&updated, actor, reason);
        Ok(updated)
    }

    fn create_locked(
        &self,
        mut policy: Policy,
        actor: &str,
        reason: &str,
    ) -> Result<Policy, FlowguardError> {
        if policy.id.trim().is_empty() {
            return Err(ValidationError::InvalidRequest("policy id must be non-empty".into()).into());
        }
        policy.validate()?;
        if self.store.contains(&policy.id) {
            return Err(FlowguardError::InvalidState(format!(
                "policy {} already exists",
                policy.id
            )));
        }
        policy.updated_at = Utc::now();
        self.store.insert(policy.clone());
        self.record(&policy, actor, reason);
        Ok(policy)
    }

    fn replace_locked(
        &self,
        policy_id: &str,
        document: Policy,
        actor: &str,
        reason: &str,
    ) -> Result<Policy, FlowguardError> {
        self.mutate_locked(policy_id, actor, reason, |policy| {
            let created_at = policy.created_at;
            let created_by = std::mem::take(&mut policy.created_by);
            *policy = document;
            policy.id = policy_id.to_string();
            policy.created_at = created_at;
            policy.created_by = created_by;
            Ok(())
        })
    }

    fn delete_locked(&self, policy_id: &str, actor: &str) -> Result<Policy, FlowguardError> {
        let removed = self
            .store
            .remove(policy_id)
            .ok_or_else(|| FlowguardError::not_found("policy", policy_id))?;
        self.cache
            .invalidate(InvalidationScope::Policy(policy_id.to_string()));
        tracing::info!(
            policy_id,
            actor,
            retained_versions = self.versions.get_version_history(policy_id).total_versions,
            "policy deleted"
        );
        Ok(removed)
    }

    fn record(&self, policy: &Policy, actor: &str, reason: &str) {
        let version = self.versions.create_version(policy, actor, Some(reason));
        self.cache
            .invalidate(InvalidationScope::Policy(policy.id.clone()));
        tracing::info!(
            policy_id = %policy.id,
            version = version.version,
            actor,
            reason,
            "policy changed"
        );
    }
}

fn require_rule<'a>(policy: &'a mut Policy, rule_id: &str) -> Result<&'a mut Rule, FlowguardError> {
    let policy_id = policy.id.clone();
    policy
        .rule_mut(rule_id)
        .ok_or_else(|| rule_not_found(&policy_id, rule_id))
}

fn rule_not_found(policy_id: &str, rule_id: &str) -> FlowguardError {
    FlowguardError::not_found("rule", format!("{policy_id}/{rule_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowguard_approval::ApprovalConfig;
    use flowguard_core::{ConditionOperator, EvaluationContext, Severity};
    use flowguard_engine::{CacheConfig, PolicyValidator, RuleEvaluator};
    use flowguard_versioning::VersionConfig;
    use serde_json::json;

    struct Fixture {
        service: PolicyService,
        store: Arc<PolicyStore>,
        versions: Arc<VersionStore>,
        cache: Arc<EvaluationCache>,
        approvals: Arc<ApprovalWorkflow>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(PolicyStore::new());
        let versions = Arc::new(VersionStore::new(VersionConfig::default()));
        let cache = Arc::new(EvaluationCache::new(CacheConfig::default()));
        let approvals = Arc::new(ApprovalWorkflow::new(ApprovalConfig::default()));
        let service = PolicyService::new(store.clone(), versions.clone(), cache.clone(), approvals.clone());
        Fixture {
            service,
            store,
            versions,
            cache,
            approvals,
        }
    }

    fn rm_rule() -> Rule {
        Rule::new("no-rm", "No recursive delete", RuleType::Custom)
            .with_condition(Condition::new("command", ConditionOperator::Contains, json!("rm -rf")))
            .with_action(Action::block(Severity::Critical, "recursive delete"))
    }

    fn policy() -> Policy {
        Policy::new("Shell safety", "alice").with_id("pol-1")
    }

    #[test]
    fn create_records_first_version() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        assert_eq!(f.versions.current_version("pol-1"), Some(1));
        let v1 = f.versions.get_version("pol-1", 1).unwrap();
        assert_eq!(v1.change_reason.as_deref(), Some("Policy created"));
        assert_eq!(f.service.list_policies().len(), 1);
    }

    #[test]
    fn duplicate_or_invalid_create_is_refused() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        assert!(matches!(
            f.service.create_policy(policy(), "alice"),
            Err(FlowguardError::InvalidState(_))
        ));
        let nameless = Policy::new(" ", "alice").with_id("pol-2");
        assert_eq!(f.service.create_policy(nameless, "alice").unwrap_err().status_code(), 400);
        assert_eq!(f.versions.current_version("pol-2"), None);
    }

    #[test]
    fn every_edit_appends_a_version() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        f.service
            .update_policy(
                "pol-1",
                PolicyUpdate {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
                "bob",
            )
            .unwrap();
        f.service.add_rule("pol-1", rm_rule(), "bob").unwrap();
        f.service.toggle_rule("pol-1", "no-rm", "bob").unwrap();
        f.service.set_enabled("pol-1", false, "bob").unwrap();
        assert_eq!(f.versions.current_version("pol-1"), Some(5));

        let latest = f.versions.get_latest_version("pol-1").unwrap();
        assert_eq!(latest.policy, f.store.get("pol-1").unwrap());
        assert_eq!(latest.change_reason.as_deref(), Some("Policy disabled"));
        assert!(!latest.policy.rules[0].enabled);
        let v4 = f.versions.get_version("pol-1", 4).unwrap();
        assert_eq!(v4.change_reason.as_deref(), Some("Rule no-rm disabled"));
    }

    #[test]
    fn failed_edit_leaves_everything_untouched() {
        let f = fixture();
        f.service.create_policy(policy().with_rule(rm_rule()), "alice").unwrap();
        assert!(f.service.add_rule("pol-1", rm_rule(), "bob").is_err());
        assert!(matches!(
            f.service.remove_rule("pol-1", "ghost", "bob"),
            Err(FlowguardError::NotFound { resource: "rule", .. })
        ));
        assert!(f
            .service
            .update_policy(
                "pol-1",
                PolicyUpdate {
                    name: Some(String::new()),
                    ..Default::default()
                },
                "bob"
            )
            .is_err());
        assert_eq!(f.versions.current_version("pol-1"), Some(1));
        assert_eq!(f.store.get("pol-1").unwrap().name, "Shell safety");
    }

    #[test]
    fn rule_update_and_removal() {
        let f = fixture();
        f.service.create_policy(policy().with_rule(rm_rule()), "alice").unwrap();
        let updated = f
            .service
            .update_rule(
                "pol-1",
                "no-rm",
                RuleUpdate {
                    name: Some("Renamed rule".into()),
                    actions: Some(vec![Action::warn("careful")]),
                    ..Default::default()
                },
                "bob",
            )
            .unwrap();
        let rule = updated.rule("no-rm").unwrap();
        assert_eq!(rule.name, "Renamed rule");
        assert_eq!(rule.actions.len(), 1);
        assert_eq!(rule.conditions.len(), 1);

        let removed = f.service.remove_rule("pol-1", "no-rm", "bob").unwrap();
        assert!(removed.rules.is_empty());
        assert!(f.service.update_rule("pol-1", "no-rm", RuleUpdate::default(), "bob").is_err());
    }

    #[test]
    fn mutations_invalidate_cached_evaluations() {
        let f = fixture();
        f.service.create_policy(policy().with_rule(rm_rule()), "alice").unwrap();
        let validator = PolicyValidator::new(f.store.clone(), f.cache.clone(), RuleEvaluator::default());
        let ctx = EvaluationContext::new("wf", "s1");
        assert!(!validator.validate(&ctx, Some("rm -rf /"), None).is_valid);
        assert!(f.cache.stats().size > 0);

        f.service.toggle_rule("pol-1", "no-rm", "bob").unwrap();
        assert!(validator.validate(&ctx, Some("rm -rf /"), None).is_valid);
    }

    #[test]
    fn delete_keeps_history() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        f.service.delete_policy("pol-1", "bob").unwrap();
        assert!(f.service.get_policy("pol-1").is_err());
        assert_eq!(f.versions.get_version_history("pol-1").total_versions, 1);
        assert!(f.service.delete_policy("pol-1", "bob").is_err());

        // Re-creating continues the numbering.
        f.service.create_policy(policy(), "alice").unwrap();
        assert_eq!(f.versions.current_version("pol-1"), Some(2));
    }

    #[test]
    fn replace_keeps_id_and_provenance() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        let doc = Policy::new("Replacement", "mallory").with_id("other").with_rule(rm_rule());
        let replaced = f.service.replace_policy("pol-1", doc, "bob").unwrap();
        assert_eq!(replaced.id, "pol-1");
        assert_eq!(replaced.created_by, "alice");
        assert_eq!(replaced.name, "Replacement");
        assert!(!f.store.contains("other"));
    }

    #[test]
    fn applies_approved_change_requests_once() {
        let f = fixture();
        let create = f
            .approvals
            .request_change(ChangeType::Create, None, Some(policy()), "new policy", "alice")
            .unwrap();
        assert!(matches!(
            f.service.apply_change_request(&create.id, "ops"),
            Err(FlowguardError::InvalidState(_))
        ));
        f.approvals.approve_change(&create.id, "bob", None).unwrap();
        f.service.apply_change_request(&create.id, "ops").unwrap();
        assert!(f.store.contains("pol-1"));
        assert!(f.service.apply_change_request(&create.id, "ops").is_err());
        assert!(f.approvals.get_change_request(&create.id).unwrap().is_applied());

        let disable = f
            .approvals
            .request_change(ChangeType::Disable, Some("pol-1"), None, "noisy", "alice")
            .unwrap();
        f.approvals.approve_change(&disable.id, "bob", None).unwrap();
        let disabled = f.service.apply_change_request(&disable.id, "ops").unwrap();
        assert!(!disabled.enabled);
        assert_eq!(f.versions.current_version("pol-1"), Some(2));

        let delete = f
            .approvals
            .request_change(ChangeType::Delete, Some("pol-1"), None, "retire", "alice")
            .unwrap();
        f.approvals.approve_change(&delete.id, "bob", None).unwrap();
        f.service.apply_change_request(&delete.id, "ops").unwrap();
        assert!(!f.store.contains("pol-1"));
    }

    #[test]
    fn rejected_change_request_is_refused() {
        let f = fixture();
        f.service.create_policy(policy(), "alice").unwrap();
        let update = f
            .approvals
            .request_change(
                ChangeType::Update,
                Some("pol-1"),
                Some(Policy::new("Other", "alice")),
                "rename",
                "alice",
            )
            .unwrap();
        f.approvals.reject_change(&update.id, "bob", Some("no")).unwrap();
        assert!(f.service.apply_change_request(&update.id, "ops").is_err());
        assert_eq!(f.store.get("pol-1").unwrap().name, "Shell safety");
    }
}
