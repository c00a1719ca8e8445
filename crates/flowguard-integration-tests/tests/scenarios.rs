//! # End-to-End Governance Scenarios
//!
//! Evaluation, management, versioning, rollback and approvals exercised
//! together through the `Governance` facade.

use chrono::{Duration, Utc};
use flowguard_approval::{ApprovalStatus, AuditAction, AuditQuery, ChangeType};
use flowguard_core::{
    Action, Condition, ConditionOperator, EvaluationContext, FlowguardError, Policy, Rule,
    RuleType, Severity,
};
use flowguard_service::{Governance, PolicyUpdate};
use flowguard_versioning::RollbackStatus;
use serde_json::json;

fn rm_policy() -> Policy {
    Policy::new("Shell safety", "alice").with_id("pol-shell").with_rule(
        Rule::new("no-rm", "No recursive delete", RuleType::Custom)
            .with_condition(Condition::new(
                "command",
                ConditionOperator::Contains,
                json!("rm -rf"),
            ))
            .with_action(Action::block(Severity::Critical, "Recursive delete is blocked")),
    )
}

fn governance_with(policy: Policy) -> Governance {
    let gov = Governance::default();
    gov.policies()
        .create_policy(policy, "alice")
        .expect("create policy");
    gov
}

fn ctx() -> EvaluationContext {
    EvaluationContext::new("wf-1", "step-1").with_user("alice")
}

// =========================================================================
// Evaluation
// =========================================================================

#[test]
fn dangerous_command_is_blocked() {
    let gov = governance_with(rm_policy());
    let result = gov.validate(&ctx(), Some("rm -rf /tmp/x"), None);
    assert!(!result.is_valid);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].severity, Severity::Critical);
    assert_eq!(result.violations[0].rule_id, "no-rm");
    assert!(!result.recommendations.is_empty());
}

#[test]
fn harmless_command_passes_cleanly() {
    let gov = governance_with(rm_policy());
    let result = gov.validate(&ctx(), Some("ls -la"), None);
    assert!(result.is_valid);
    assert!(result.violations.is_empty());
    assert!(result.warnings.is_empty());
}

#[test]
fn disabled_policy_is_skipped() {
    let gov = governance_with(rm_policy());
    gov.validate(&ctx(), Some("rm -rf /tmp/x"), None);
    gov.policies()
        .set_enabled("pol-shell", false, "bob")
        .expect("disable");
    assert!(gov.validate(&ctx(), Some("rm -rf /tmp/x"), None).is_valid);
}

#[test]
fn builtin_checks_apply_alongside_declared_actions() {
    let policy = Policy::new("Builtins", "alice")
        .with_id("pol-builtins")
        .with_rule(Rule::new("cmd", "Command filter", RuleType::CommandFilter).with_action(Action::log("seen")))
        .with_rule(Rule::new("paths", "Path restriction", RuleType::PathRestriction).with_action(Action::log("seen")))
        .with_rule(Rule::new("secrets", "Secrets", RuleType::SensitiveData).with_action(Action::log("seen")));
    let gov = governance_with(policy);

    let result = gov.validate(&ctx(), Some("sudo cat /etc/shadow"), Some("/etc/shadow"));
    assert!(!result.is_valid);
    let rules: Vec<&str> = result.violations.iter().map(|v| v.rule_id.as_str()).collect();
    assert!(rules.contains(&"cmd"));
    assert!(rules.contains(&"paths"));

    let leaked = gov.validate(&ctx(), Some("export password=hunter2"), None);
    let secret = leaked
        .violations
        .iter()
        .find(|v| v.rule_id == "secrets")
        .expect("secret finding");
    assert_eq!(secret.severity, Severity::High);
    assert!(!secret.message.contains("hunter2"));
}

// =========================================================================
// Versioning and rollback
// =========================================================================

#[test]
fn rename_then_rollback_appends_a_third_version() {
    let gov = governance_with(rm_policy());
    gov.policies()
        .update_policy(
            "pol-shell",
            PolicyUpdate {
                name: Some("Renamed".into()),
                ..Default::default()
            },
            "bob",
        )
        .expect("rename");
    assert_eq!(gov.versions().current_version("pol-shell"), Some(2));

    let request = gov
        .rollbacks()
        .create_request("pol-shell", 1, "bad rename", "bob")
        .expect("create rollback");
    gov.rollbacks().approve(&request.id, "carol").expect("approve");
    let result = gov.rollbacks().execute(&request.id, "ops").expect("execute");

    assert_eq!(result.from_version, 2);
    assert_eq!(result.to_version, 1);
    assert_eq!(result.new_version, 3);
    let latest = gov.versions().get_latest_version("pol-shell").expect("latest");
    assert_eq!(latest.version, 3);
    assert_eq!(latest.policy.name, "Shell safety");
    assert_eq!(gov.store().get("pol-shell").expect("live").name, "Shell safety");
    assert_eq!(
        gov.rollbacks().get_request(&request.id).expect("request").status,
        RollbackStatus::Completed
    );
}

#[test]
fn rollback_result_matches_target_snapshot() {
    let gov = governance_with(rm_policy());
    gov.policies()
        .remove_rule("pol-shell", "no-rm", "bob")
        .expect("remove rule");
    let v1 = gov.versions().get_version("pol-shell", 1).expect("v1");

    let request = gov
        .rollbacks()
        .create_request("pol-shell", 1, "restore rule", "bob")
        .expect("create");
    gov.rollbacks().approve(&request.id, "carol").expect("approve");
    let result = gov.rollbacks().execute(&request.id, "ops").expect("execute");
    assert_eq!(result.restored_policy, v1.policy);

    // The restored rule is live again and the cache did not serve the
    // pre-rollback evaluation.
    assert!(!gov.validate(&ctx(), Some("rm -rf /tmp/x"), None).is_valid);
}

#[test]
fn stale_rollback_fails_fast() {
    let gov = governance_with(rm_policy());
    gov.policies()
        .update_policy(
            "pol-shell",
            PolicyUpdate {
                description: Some("v2".into()),
                ..Default::default()
            },
            "bob",
        )
        .expect("update");

    let first = gov
        .rollbacks()
        .create_request("pol-shell", 1, "first", "bob")
        .expect("first");
    let second = gov
        .rollbacks()
        .create_request("pol-shell", 1, "second", "dave")
        .expect("second");
    gov.rollbacks().approve(&first.id, "carol").expect("approve first");
    gov.rollbacks().approve(&second.id, "carol").expect("approve second");

    gov.rollbacks().execute(&first.id, "ops").expect("first execute");
    let err = gov.rollbacks().execute(&second.id, "ops").unwrap_err();
    assert!(matches!(err, FlowguardError::InvalidState(_)));

    let failed = gov.rollbacks().get_request(&second.id).expect("second");
    assert_eq!(failed.status, RollbackStatus::Failed);
    assert!(failed.error_message.is_some());
    assert_eq!(gov.versions().current_version("pol-shell"), Some(3));
    // Failed requests are terminal.
    assert!(gov.rollbacks().execute(&second.id, "ops").is_err());
}

#[test]
fn rollback_guards() {
    let gov = governance_with(rm_policy());
    let rollbacks = gov.rollbacks();
    assert!(matches!(
        rollbacks.create_request("pol-shell", 9, "x", "bob"),
        Err(FlowguardError::NotFound { .. })
    ));
    assert!(matches!(
        rollbacks.create_request("pol-shell", 1, "x", "bob"),
        Err(FlowguardError::InvalidState(_))
    ));

    gov.policies()
        .set_enabled("pol-shell", false, "bob")
        .expect("disable");
    let request = rollbacks
        .create_request("pol-shell", 1, "x", "bob")
        .expect("create");
    // Executing before approval is refused and leaves the request pending.
    assert!(rollbacks.execute(&request.id, "ops").is_err());
    rollbacks.reject(&request.id, "carol", Some("no")).expect("reject");
    assert!(rollbacks.approve(&request.id, "carol").is_err());
    assert_eq!(rollbacks.stats().rejected, 1);
}

#[test]
fn deleted_policy_can_be_rolled_back() {
    let gov = governance_with(rm_policy());
    gov.policies()
        .set_enabled("pol-shell", false, "bob")
        .expect("disable");
    gov.policies().delete_policy("pol-shell", "bob").expect("delete");
    assert!(gov.validate(&ctx(), Some("rm -rf /tmp/x"), None).is_valid);

    let request = gov
        .rollbacks()
        .create_request("pol-shell", 1, "undelete", "bob")
        .expect("create");
    gov.rollbacks().approve(&request.id, "carol").expect("approve");
    gov.rollbacks().execute(&request.id, "ops").expect("execute");
    assert!(gov.store().contains("pol-shell"));
    assert!(!gov.validate(&ctx(), Some("rm -rf /tmp/x"), None).is_valid);
}

// =========================================================================
// Approvals and change requests
// =========================================================================

#[test]
fn short_lived_approval_expires() {
    let gov = Governance::default();
    let now = Utc::now();
    let request = gov
        .approvals()
        .request_approval_at("pol-shell", "wf-1", "deploy", "alice", json!({}), Some(0.001), now)
        .expect("request");
    assert_eq!(request.expires_at - now, Duration::milliseconds(3600));

    let later = now + Duration::seconds(5);
    assert_eq!(
        gov.approvals().get_approval_at(&request.id, later).expect("get").status,
        ApprovalStatus::Expired
    );
    assert!(matches!(
        gov.approvals().approve_at(&request.id, "bob", None, later),
        Err(FlowguardError::InvalidState(_))
    ));
    assert!(matches!(
        gov.approvals().reject_at(&request.id, "bob", None, later),
        Err(FlowguardError::InvalidState(_))
    ));
}

#[test]
fn change_request_lifecycle_is_audited_and_versioned() {
    let gov = Governance::default();
    let create = gov
        .approvals()
        .request_change(ChangeType::Create, None, Some(rm_policy()), "new guard", "alice")
        .expect("request");
    gov.approvals()
        .approve_change(&create.id, "bob", Some("ok"))
        .expect("approve");
    gov.policies()
        .apply_change_request(&create.id, "ops")
        .expect("apply");

    assert_eq!(gov.versions().current_version("pol-shell"), Some(1));
    assert!(!gov.validate(&ctx(), Some("rm -rf /tmp/x"), None).is_valid);

    let trail = gov
        .approvals()
        .audit()
        .query(&AuditQuery::new().resource(&create.id));
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::ChangeApplied,
            AuditAction::ChangeApproved,
            AuditAction::ChangeRequested
        ]
    );
    assert!(trail.iter().all(|e| e.digest().is_some()));
}

#[test]
fn maintenance_sweeps_expired_state() {
    let gov = governance_with(rm_policy());
    let now = Utc::now();
    gov.approvals()
        .request_approval_at("pol-shell", "wf-1", "deploy", "alice", json!({}), Some(1.0), now)
        .expect("request");
    gov.validate(&ctx(), Some("ls"), None);

    let report = gov.maintenance().run_once_at(now + Duration::hours(2));
    assert_eq!(report.expired_approvals, 1);
    assert!(report.expired_cache_entries > 0);
    assert_eq!(gov.cache().stats().size, 0);
}
