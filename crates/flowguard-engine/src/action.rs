//! # Action Dispatch
//!
//! `block` and `warn` actions turn into findings inside the evaluator. The
//! side-effecting kinds (`log`, `notify`, `rollback`, `custom`) are handed
//! to an [`ActionSink`], which a deployment replaces to wire notifications
//! or rollback triggers. A sink failure fails only the rule that raised it.

use flowguard_core::{ActionType, EvaluationContext, Severity};

/// A side-effecting action fired by a matching rule.
#[derive(Debug, Clone, Copy)]
pub struct ActionEvent<'a> {
    /// Owning policy.
    pub policy_id: &'a str,
    /// Rule whose conditions held.
    pub rule_id: &'a str,
    /// Action kind.
    pub action_type: ActionType,
    /// Declared severity.
    pub severity: Severity,
    /// Declared message.
    pub message: &'a str,
    /// Step being evaluated.
    pub context: &'a EvaluationContext,
}

/// Error raised by an [`ActionSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{action} action failed: {reason}")]
pub struct ActionError {
    /// Action kind that failed.
    pub action: &'static str,
    /// Sink-provided reason.
    pub reason: String,
}

impl ActionError {
    /// Create an error for the given action kind.
    pub fn new(action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            action: action.as_str(),
            reason: reason.into(),
        }
    }
}

/// Receiver for side-effecting actions.
///
/// Called synchronously on the evaluation path, so implementations must
/// not block; queue work elsewhere if a notification needs I/O.
pub trait ActionSink: Send + Sync + std::fmt::Debug {
    /// Handle one action.
    fn dispatch(&self, event: &ActionEvent<'_>) -> Result<(), ActionError>;
}

/// Default sink: emits every action as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActionSink;

impl ActionSink for TracingActionSink {
    fn dispatch(&self, event: &ActionEvent<'_>) -> Result<(), ActionError> {
        match event.action_type {
            ActionType::Log => tracing::info!(
                policy_id = event.policy_id,
                rule_id = event.rule_id,
                workflow_id = %event.context.workflow_id,
                step_id = %event.context.step_id,
                severity = event.severity.as_str(),
                "{}",
                event.message
            ),
            ActionType::Notify | ActionType::Rollback | ActionType::Custom => tracing::warn!(
                policy_id = event.policy_id,
                rule_id = event.rule_id,
                action = event.action_type.as_str(),
                workflow_id = %event.context.workflow_id,
                step_id = %event.context.step_id,
                severity = event.severity.as_str(),
                "{}",
                event.message
            ),
            ActionType::Block | ActionType::Warn => {}
        }
        Ok(())
    }
}
