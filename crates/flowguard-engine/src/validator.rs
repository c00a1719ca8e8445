//! # Policy Validator
//!
//! The evaluation entry point used by the workflow executor. Reads enabled
//! policies from the shared [`PolicyStore`] through the [`EvaluationCache`],
//! evaluates each (or replays its cached evaluation), and aggregates the
//! findings into a [`PolicyValidationResult`].
//!
//! The validator never fails: broken rules surface as warnings and a cache
//! key that cannot be derived only disables caching for that call.

use std::sync::Arc;

use flowguard_core::{
    EvaluationContext, FlowguardError, Policy, PolicyStore, PolicyValidationResult, RuleType,
    Violation,
};

use crate::cache::{evaluation_key, EvaluationCache, ENABLED_POLICIES_KEY};
use crate::condition::EvaluationTarget;
use crate::evaluator::{recommendations, PolicyEvaluation, RuleEvaluator};

/// Read-through evaluator over the shared policy store.
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    store: Arc<PolicyStore>,
    cache: Arc<EvaluationCache>,
    evaluator: RuleEvaluator,
}

impl PolicyValidator {
    /// Create a validator over `store`, caching through `cache`.
    pub fn new(store: Arc<PolicyStore>, cache: Arc<EvaluationCache>, evaluator: RuleEvaluator) -> Self {
        Self {
            store,
            cache,
            evaluator,
        }
    }

    /// The underlying evaluator.
    pub fn evaluator(&self) -> &RuleEvaluator {
        &self.evaluator
    }

    /// Validate a step against every enabled policy.
    pub fn validate(
        &self,
        context: &EvaluationContext,
        command: Option<&str>,
        file_path: Option<&str>,
    ) -> PolicyValidationResult {
        let generation = self.cache.generation();
        let target = EvaluationTarget::new(context, command, file_path);
        let evaluations: Vec<PolicyEvaluation> = self
            .enabled_policies_since(generation)
            .iter()
            .map(|policy| self.evaluate_cached(policy, &target, generation))
            .collect();
        let result = aggregate(evaluations);
        tracing::debug!(
            workflow_id = %context.workflow_id,
            step_id = %context.step_id,
            is_valid = result.is_valid,
            violations = result.violations.len(),
            warnings = result.warnings.len(),
            "step validated"
        );
        result
    }

    /// Validate a step against a single policy, enabled or not.
    pub fn validate_policy(
        &self,
        policy_id: &str,
        context: &EvaluationContext,
        command: Option<&str>,
        file_path: Option<&str>,
    ) -> Result<PolicyValidationResult, FlowguardError> {
        let policy = self.store.require(policy_id)?.with_enabled(true);
        let target = EvaluationTarget::new(context, command, file_path);
        Ok(aggregate(vec![self.evaluator.evaluate_policy(&policy, &target)]))
    }

    /// Enabled policies, through the list cache.
    pub fn enabled_policies(&self) -> Vec<Policy> {
        self.enabled_policies_since(self.cache.generation())
    }

    /// A policy by id, through the policy cache.
    pub fn policy(&self, policy_id: &str) -> Option<Policy> {
        if let Some(policy) = self.cache.get_policy(policy_id) {
            return Some(policy);
        }
        let generation = self.cache.generation();
        let policy = self.store.get(policy_id)?;
        self.cache.set_policy_if_current(policy.clone(), generation);
        Some(policy)
    }

    fn enabled_policies_since(&self, generation: u64) -> Vec<Policy> {
        if let Some(policies) = self.cache.get_policy_list(ENABLED_POLICIES_KEY) {
            return policies;
        }
        let policies = self.store.list_enabled();
        self.cache
            .set_policy_list_if_current(ENABLED_POLICIES_KEY, policies.clone(), generation);
        policies
    }

    fn evaluate_cached(
        &self,
        policy: &Policy,
        target: &EvaluationTarget<'_>,
        generation: u64,
    ) -> PolicyEvaluation {
        let key = match evaluation_key(&policy.id, target) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(policy_id = %policy.id, error = %e, "evaluation key unavailable; skipping cache");
                return self.evaluator.evaluate_policy(policy, target);
            }
        };
        if let Some(hit) = self.cache.get_evaluation(&key) {
            return hit;
        }
        let evaluation = self.evaluator.evaluate_policy(policy, target);
        self.cache
            .set_evaluation_if_current(key, evaluation.clone(), generation);
        evaluation
    }
}

/// Merge per-policy evaluations into the caller-facing result.
pub fn aggregate(evaluations: Vec<PolicyEvaluation>) -> PolicyValidationResult {
    let mut findings: Vec<Violation> = Vec::new();
    let mut flagged: Vec<RuleType> = Vec::new();
    for evaluation in evaluations {
        findings.extend(evaluation.findings);
        flagged.extend(evaluation.flagged_rule_types);
    }
    let mut result = PolicyValidationResult::from_findings(findings, Vec::new());
    result.recommendations =
        recommendations(result.violations.len(), result.warnings.len(), &flagged);
    result
}
