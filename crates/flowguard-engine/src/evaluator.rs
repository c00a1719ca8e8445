//! # Rule Evaluator
//!
//! Evaluates one [`Policy`] at a time against an [`EvaluationTarget`],
//! producing a [`PolicyEvaluation`]. Aggregation across policies and
//! caching live in [`crate::validator`].
//!
//! ## Failure isolation
//!
//! Each enabled rule produces a `Result<RuleFindings, RuleEvaluationError>`.
//! An `Err` is converted into a single low-severity warning attributed to
//! that rule; evaluation always continues with the next rule. The policy
//! level therefore has no error path at all.
//!
//! ## Action semantics
//!
//! - `block` emits a finding at the action's severity.
//! - `warn` always emits a `low` finding, whatever severity was declared.
//! - `log`, `notify`, `rollback` and `custom` are dispatched to the
//!   [`ActionSink`] and emit nothing.
//! - A rule with no actions emits a `low` "Rule has no actions defined"
//!   warning whenever it is evaluated.

use std::sync::Arc;

use flowguard_core::{
    ActionType, EvaluationContext, Policy, Rule, RuleType, Severity, Violation,
};
use serde::{Deserialize, Serialize};

use crate::action::{ActionError, ActionEvent, ActionSink, TracingActionSink};
use crate::builtin::{run_builtin, BuiltinLimits};
use crate::condition::{all_conditions_hold, EvaluationTarget};

/// Message of the warning emitted for rules without actions.
pub const NO_ACTIONS_MESSAGE: &str = "Rule has no actions defined";

// ---------------------------------------------------------------------------
// Per-rule outcome
// ---------------------------------------------------------------------------

/// Findings produced by one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleFindings {
    /// Findings in emission order: built-in first, then actions.
    pub findings: Vec<Violation>,
}

impl RuleFindings {
    /// Whether the rule produced anything.
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// A failure while evaluating one rule. Never crosses the evaluation
/// boundary; the evaluator downgrades it to a warning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleEvaluationError {
    /// A side-effecting action failed.
    #[error(transparent)]
    Action(#[from] ActionError),
}

// ---------------------------------------------------------------------------
// Per-policy outcome
// ---------------------------------------------------------------------------

/// Outcome of evaluating one policy against one target.
///
/// This is the unit the evaluation cache stores, so a cache hit replays
/// exactly the findings (ids and timestamps included) of the original run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    /// Evaluated policy.
    pub policy_id: String,
    /// All findings, both blocking and non-blocking.
    pub findings: Vec<Violation>,
    /// Rule types that produced at least one finding, first-seen order.
    pub flagged_rule_types: Vec<RuleType>,
}

impl PolicyEvaluation {
    fn new(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            findings: Vec::new(),
            flagged_rule_types: Vec::new(),
        }
    }

    fn absorb(&mut self, rule_type: RuleType, findings: Vec<Violation>) {
        if findings.is_empty() {
            return;
        }
        if !self.flagged_rule_types.contains(&rule_type) {
            self.flagged_rule_types.push(rule_type);
        }
        self.findings.extend(findings);
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Stateless policy evaluator.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    limits: BuiltinLimits,
    sink: Arc<dyn ActionSink>,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(BuiltinLimits::default())
    }
}

impl RuleEvaluator {
    /// Create an evaluator that logs side-effecting actions through `tracing`.
    pub fn new(limits: BuiltinLimits) -> Self {
        Self {
            limits,
            sink: Arc::new(TracingActionSink),
        }
    }

    /// Replace the action sink.
    pub fn with_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Limits used by the numeric built-ins.
    pub fn limits(&self) -> &BuiltinLimits {
        &self.limits
    }

    /// Evaluate every enabled rule of `policy`.
    ///
    /// Disabled policies yield an empty evaluation.
    pub fn evaluate_policy(
        &self,
        policy: &Policy,
        target: &EvaluationTarget<'_>,
    ) -> PolicyEvaluation {
        let mut evaluation = PolicyEvaluation::new(&policy.id);
        if !policy.enabled {
            return evaluation;
        }
        for rule in policy.enabled_rules() {
            let findings = match self.evaluate_rule(&policy.id, rule, target) {
                Ok(outcome) => outcome.findings,
                Err(e) => {
                    tracing::warn!(
                        policy_id = %policy.id,
                        rule_id = %rule.id,
                        error = %e,
                        "rule evaluation failed; downgraded to warning"
                    );
                    vec![Violation::new(
                        &policy.id,
                        &rule.id,
                        Severity::Low,
                        format!("Rule evaluation failed: {e}"),
                        target_context(target),
                    )]
                }
            };
            evaluation.absorb(rule.rule_type, findings);
        }
        evaluation
    }

    /// Evaluate a single rule.
    pub fn evaluate_rule(
        &self,
        policy_id: &str,
        rule: &Rule,
        target: &EvaluationTarget<'_>,
    ) -> Result<RuleFindings, RuleEvaluationError> {
        let mut out = RuleFindings::default();
        let finding = |severity: Severity, message: &str| {
            Violation::new(policy_id, &rule.id, severity, message, target_context(target))
        };

        if rule.actions.is_empty() {
            out.findings.push(finding(Severity::Low, NO_ACTIONS_MESSAGE));
        }

        if !all_conditions_hold(&rule.conditions, target) {
            return Ok(out);
        }

        for builtin in run_builtin(rule.rule_type, target, &self.limits) {
            out.findings.push(finding(builtin.severity, &builtin.message));
        }

        for action in &rule.actions {
            match action.action_type {
                ActionType::Block => out.findings.push(finding(action.severity, &action.message)),
                ActionType::Warn => out.findings.push(finding(Severity::Low, &action.message)),
                ActionType::Log | ActionType::Notify | ActionType::Rollback | ActionType::Custom => {
                    self.sink.dispatch(&ActionEvent {
                        policy_id,
                        rule_id: &rule.id,
                        action_type: action.action_type,
                        severity: action.severity,
                        message: &action.message,
                        context: target.context,
                    })?;
                }
            }
        }
        Ok(out)
    }
}

/// The context recorded on findings: the caller's context with the
/// effective command and file path filled in.
fn target_context(target: &EvaluationTarget<'_>) -> EvaluationContext {
    let mut context = target.context.clone();
    context.command = target.command().map(str::to_string);
    context.file_path = target.file_path().map(str::to_string);
    context
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Remediation hints for the aggregated findings.
///
/// One summary line per non-empty class (violations, warnings), followed by
/// one hint per flagged rule type in first-seen order. Empty when there are
/// no findings.
pub fn recommendations(
    violation_count: usize,
    warning_count: usize,
    flagged: &[RuleType],
) -> Vec<String> {
    let mut out = Vec::new();
    if violation_count > 0 {
        out.push(format!(
            "Resolve {violation_count} blocking policy violation(s) before executing this step"
        ));
    }
    if warning_count > 0 {
        out.push(format!(
            "Review {warning_count} policy warning(s); they do not block execution"
        ));
    }
    if violation_count + warning_count == 0 {
        return out;
    }
    let mut seen: Vec<RuleType> = Vec::new();
    for rule_type in flagged {
        if seen.contains(rule_type) {
            continue;
        }
        seen.push(*rule_type);
        if let Some(hint) = rule_type_hint(*rule_type) {
            out.push(hint.to_string());
        }
    }
    out
}

fn rule_type_hint(rule_type: RuleType) -> Option<&'static str> {
    match rule_type {
        RuleType::CommandFilter => {
            Some("Avoid destructive or privilege-escalating commands; run steps with least privilege")
        }
        RuleType::PathRestriction => {
            Some("Keep file operations inside the workflow workspace rather than system directories")
        }
        RuleType::SensitiveData => {
            Some("Move credentials into a secret manager and pass them through environment variables")
        }
        RuleType::FileSizeLimit => Some("Split or compress large files, or raise the policy limit"),
        RuleType::ExecutionTime => {
            Some("Break long-running steps into smaller units or add checkpoints")
        }
        RuleType::ResourceUsage => {
            Some("Reduce the step's memory and CPU footprint or request a larger execution profile")
        }
        RuleType::Custom => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowguard_core::{Action, Condition, ConditionOperator};
    use parking_lot::Mutex;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new("wf-1", "step-1").with_user("alice")
    }

    fn rm_policy() -> Policy {
        Policy::new("Shell safety", "alice").with_id("pol-1").with_rule(
            Rule::new("no-rm", "No recursive delete", RuleType::Custom)
                .with_condition(Condition::new(
                    "command",
                    ConditionOperator::Contains,
                    "rm -rf",
                ))
                .with_action(Action::block(Severity::Critical, "Recursive delete blocked")),
        )
    }

    fn eval(policy: &Policy, command: &str) -> PolicyEvaluation {
        let context = ctx();
        let target = EvaluationTarget::new(&context, Some(command), None);
        RuleEvaluator::default().evaluate_policy(policy, &target)
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, ActionType)>>,
        fail_on: Option<ActionType>,
    }

    impl ActionSink for RecordingSink {
        fn dispatch(&self, event: &ActionEvent<'_>) -> Result<(), ActionError> {
            self.seen
                .lock()
                .push((event.rule_id.to_string(), event.action_type));
            if self.fail_on == Some(event.action_type) {
                return Err(ActionError::new(event.action_type, "sink offline"));
            }
            Ok(())
        }
    }

    #[test]
    fn block_action_emits_declared_severity() {
        let evaluation = eval(&rm_policy(), "rm -rf /tmp/x");
        assert_eq!(evaluation.findings.len(), 1);
        assert_eq!(evaluation.findings[0].severity, Severity::Critical);
        assert_eq!(evaluation.findings[0].rule_id, "no-rm");
        assert_eq!(evaluation.findings[0].context.command.as_deref(), Some("rm -rf /tmp/x"));
    }

    #[test]
    fn non_matching_command_is_clean() {
        let evaluation = eval(&rm_policy(), "ls -la");
        assert!(evaluation.findings.is_empty());
        assert!(evaluation.flagged_rule_types.is_empty());
    }

    #[test]
    fn warn_is_forced_to_low() {
        let policy = Policy::new("p", "a").with_rule(
            Rule::new("w", "warn", RuleType::Custom)
                .with_action(Action::new(ActionType::Warn, Severity::Critical, "careful")),
        );
        let evaluation = eval(&policy, "anything");
        assert_eq!(evaluation.findings.len(), 1);
        assert_eq!(evaluation.findings[0].severity, Severity::Low);
    }

    #[test]
    fn rule_without_actions_warns_even_when_conditions_fail() {
        let policy = Policy::new("p", "a").with_rule(
            Rule::new("empty", "no actions", RuleType::Custom).with_condition(Condition::new(
                "command",
                ConditionOperator::Equals,
                "never",
            )),
        );
        let evaluation = eval(&policy, "ls");
        assert_eq!(evaluation.findings.len(), 1);
        assert_eq!(evaluation.findings[0].message, NO_ACTIONS_MESSAGE);
        assert_eq!(evaluation.findings[0].severity, Severity::Low);
    }

    #[test]
    fn builtin_runs_alongside_actions() {
        let policy = Policy::new("p", "a").with_rule(
            Rule::new("cmd", "commands", RuleType::CommandFilter)
                .with_action(Action::log("command checked")),
        );
        let evaluation = eval(&policy, "sudo reboot");
        assert_eq!(evaluation.findings.len(), 1);
        assert_eq!(evaluation.findings[0].severity, Severity::Critical);
        assert_eq!(evaluation.flagged_rule_types, vec![RuleType::CommandFilter]);
    }

    #[test]
    fn builtin_is_gated_by_conditions() {
        let policy = Policy::new("p", "a").with_rule(
            Rule::new("cmd", "commands", RuleType::CommandFilter)
                .with_condition(Condition::new("userId", ConditionOperator::Equals, "bob"))
                .with_action(Action::log("checked")),
        );
        assert!(eval(&policy, "sudo reboot").findings.is_empty());
    }

    #[test]
    fn disabled_rules_and_policies_are_skipped() {
        let mut policy = rm_policy();
        policy.rules[0].enabled = false;
        assert!(eval(&policy, "rm -rf /").findings.is_empty());

        let policy = rm_policy().with_enabled(false);
        assert!(eval(&policy, "rm -rf /").findings.is_empty());
    }

    #[test]
    fn side_effect_actions_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let evaluator = RuleEvaluator::default().with_sink(sink.clone());
        let policy = Policy::new("p", "a").with_rule(
            Rule::new("r", "r", RuleType::Custom)
                .with_action(Action::log("seen"))
                .with_action(Action::new(ActionType::Notify, Severity::High, "page")),
        );
        let context = ctx();
        let target = EvaluationTarget::new(&context, Some("ls"), None);
        let evaluation = evaluator.evaluate_policy(&policy, &target);
        assert!(evaluation.findings.is_empty());
        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, ActionType::Notify);
    }

    #[test]
    fn failing_rule_is_downgraded_and_others_still_run() {
        let sink = Arc::new(RecordingSink {
            fail_on: Some(ActionType::Notify),
            ..RecordingSink::default()
        });
        let evaluator = RuleEvaluator::default().with_sink(sink);
        let policy = Policy::new("p", "a")
            .with_rule(
                Rule::new("broken", "notify fails", RuleType::Custom)
                    .with_action(Action::new(ActionType::Notify, Severity::High, "page")),
            )
            .with_rule(
                Rule::new("blocker", "blocks", RuleType::Custom)
                    .with_action(Action::block(Severity::High, "blocked")),
            );
        let context = ctx();
        let target = EvaluationTarget::new(&context, Some("ls"), None);
        let evaluation = evaluator.evaluate_policy(&policy, &target);
        assert_eq!(evaluation.findings.len(), 2);
        assert_eq!(evaluation.findings[0].rule_id, "broken");
        assert_eq!(evaluation.findings[0].severity, Severity::Low);
        assert!(evaluation.findings[0].message.starts_with("Rule evaluation failed"));
        assert_eq!(evaluation.findings[1].severity, Severity::High);
    }

    #[test]
    fn evaluate_rule_surfaces_sink_error_as_result() {
        let sink = Arc::new(RecordingSink {
            fail_on: Some(ActionType::Rollback),
            ..RecordingSink::default()
        });
        let evaluator = RuleEvaluator::default().with_sink(sink);
        let rule = Rule::new("r", "r", RuleType::Custom)
            .with_action(Action::new(ActionType::Rollback, Severity::High, "revert"));
        let context = ctx();
        let target = EvaluationTarget::new(&context, None, None);
        let err = evaluator.evaluate_rule("p", &rule, &target).unwrap_err();
        assert!(matches!(err, RuleEvaluationError::Action(_)));
    }

    #[test]
    fn recommendations_summarize_and_deduplicate() {
        let recs = recommendations(
            2,
            1,
            &[RuleType::CommandFilter, RuleType::Custom, RuleType::CommandFilter],
        );
        assert_eq!(recs.len(), 3);
        assert!(recs[0].contains("2 blocking"));
        assert!(recs[1].contains("1 policy warning"));
        assert!(recs[2].contains("least privilege"));
    }

    #[test]
    fn recommendations_empty_without_findings() {
        assert!(recommendations(0, 0, &[RuleType::SensitiveData]).is_empty());
    }

    #[test]
    fn recommendations_present_for_custom_only_findings() {
        let recs = recommendations(0, 1, &[RuleType::Custom]);
        assert_eq!(recs.len(), 1);
    }
}
