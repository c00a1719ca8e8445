//! # Concurrent Access
//!
//! Per-policy mutation serialization, cache coherence under concurrent
//! evaluation, and single-winner rollback execution.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use flowguard_core::{
    Action, Condition, ConditionOperator, EvaluationContext, Policy, Rule, RuleType, Severity,
};
use flowguard_service::{Governance, PolicyUpdate};
use flowguard_versioning::RollbackStatus;
use serde_json::json;

fn rm_rule() -> Rule {
    Rule::new("no-rm", "No recursive delete", RuleType::Custom)
        .with_condition(Condition::new(
            "command",
            ConditionOperator::Contains,
            json!("rm -rf"),
        ))
        .with_action(Action::block(Severity::Critical, "blocked"))
}

#[test]
fn concurrent_edits_get_distinct_consecutive_versions() {
    let gov = Arc::new(Governance::default());
    gov.policies()
        .create_policy(Policy::new("p", "alice").with_id("p"), "alice")
        .expect("create");

    const WRITERS: usize = 8;
    const EDITS: usize = 5;
    thread::scope(|s| {
        for w in 0..WRITERS {
            let gov = Arc::clone(&gov);
            s.spawn(move || {
                for e in 0..EDITS {
                    gov.policies()
                        .update_policy(
                            "p",
                            PolicyUpdate {
                                description: Some(format!("writer {w} edit {e}")),
                                ..Default::default()
                            },
                            "writer",
                        )
                        .expect("update");
                }
            });
        }
    });

    let history = gov.versions().get_version_history("p");
    let expected = (1 + WRITERS * EDITS) as u64;
    assert_eq!(history.current_version, expected);
    let numbers: BTreeSet<u64> = history.versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers.len(), history.versions.len());
    assert_eq!(numbers, (1..=expected).collect::<BTreeSet<u64>>());

    // The newest version is the live document.
    let latest = gov.versions().get_latest_version("p").expect("latest");
    assert_eq!(latest.policy, gov.store().get("p").expect("live"));
}

#[test]
fn readers_never_see_stale_results_after_writes_settle() {
    let gov = Arc::new(Governance::default());
    gov.policies()
        .create_policy(Policy::new("p", "alice").with_id("p").with_rule(rm_rule()), "alice")
        .expect("create");
    let ctx = EvaluationContext::new("wf", "s");

    thread::scope(|s| {
        for _ in 0..4 {
            let gov = Arc::clone(&gov);
            let ctx = ctx.clone();
            s.spawn(move || {
                for _ in 0..50 {
                    gov.validate(&ctx, Some("rm -rf /tmp/x"), None);
                }
            });
        }
        let gov = Arc::clone(&gov);
        s.spawn(move || {
            for _ in 0..10 {
                gov.policies().toggle_rule("p", "no-rm", "ops").expect("toggle");
            }
            gov.policies().toggle_rule("p", "no-rm", "ops").expect("toggle");
        });
    });

    // Eleven toggles leave the rule disabled.
    assert!(!gov.store().get("p").expect("live").rules[0].enabled);
    assert!(gov.validate(&ctx, Some("rm -rf /tmp/x"), None).is_valid);
}

#[test]
fn only_one_of_two_racing_rollbacks_completes() {
    let gov = Arc::new(Governance::default());
    gov.policies()
        .create_policy(Policy::new("original", "alice").with_id("p"), "alice")
        .expect("create");
    gov.policies()
        .update_policy(
            "p",
            PolicyUpdate {
                name: Some("changed".into()),
                ..Default::default()
            },
            "bob",
        )
        .expect("update");

    let ids: Vec<String> = (0..2)
        .map(|i| {
            let request = gov
                .rollbacks()
                .create_request("p", 1, &format!("attempt {i}"), "bob")
                .expect("create");
            gov.rollbacks().approve(&request.id, "carol").expect("approve");
            request.id
        })
        .collect();

    let outcomes: Vec<bool> = thread::scope(|s| {
        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let gov = Arc::clone(&gov);
                s.spawn(move || gov.rollbacks().execute(id, "ops").is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let statuses: Vec<RollbackStatus> = ids
        .iter()
        .map(|id| gov.rollbacks().get_request(id).expect("request").status)
        .collect();
    assert!(statuses.contains(&RollbackStatus::Completed));
    assert!(statuses.contains(&RollbackStatus::Failed));
    assert_eq!(gov.versions().current_version("p"), Some(3));
    assert_eq!(gov.store().get("p").expect("live").name, "original");
}
