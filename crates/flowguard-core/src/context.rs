//! # Evaluation Context and Results
//!
//! The boundary types exchanged with the workflow executor: an
//! [`EvaluationContext`] describing the step about to run, and the
//! [`PolicyValidationResult`] it gets back.
//!
//! The engine never halts a workflow on its own. A result with
//! `is_valid == false` must be acted on by the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::Severity;

/// Everything the executor knows about the step being evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    /// Workflow run identifier.
    pub workflow_id: String,
    /// Step identifier within the workflow.
    pub step_id: String,
    /// Shell command the step will run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// File the step touches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Acting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form fields addressable by condition `field` names.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EvaluationContext {
    /// Create a context for a workflow step.
    pub fn new(workflow_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            ..Self::default()
        }
    }

    /// Builder: set the command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Builder: set the file path.
    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    /// Builder: set the user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Builder: set the session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Builder: add a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single finding produced by a rule.
///
/// `severity == Low` findings are warnings; all others are blocking
/// violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Unique finding identifier.
    pub id: String,
    /// Policy that produced the finding.
    pub policy_id: String,
    /// Rule that produced the finding.
    pub rule_id: String,
    /// Finding severity.
    pub severity: Severity,
    /// Human-readable explanation.
    pub message: String,
    /// Context the finding was produced for.
    pub context: EvaluationContext,
    /// When the finding was produced.
    pub timestamp: DateTime<Utc>,
    /// Whether an operator has marked the finding resolved.
    pub resolved: bool,
}

impl Violation {
    /// Create an unresolved finding stamped with the current time.
    pub fn new(
        policy_id: impl Into<String>,
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        context: EvaluationContext,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.into(),
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            context,
            timestamp: Utc::now(),
            resolved: false,
        }
    }

    /// Whether this finding blocks execution.
    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

/// Aggregate outcome of validating a step against every enabled policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyValidationResult {
    /// `true` iff `violations` is empty. Warnings never block.
    pub is_valid: bool,
    /// Blocking findings.
    pub violations: Vec<Violation>,
    /// Non-blocking (low severity) findings.
    pub warnings: Vec<Violation>,
    /// Remediation hints; non-empty whenever any finding exists.
    pub recommendations: Vec<String>,
}

impl PolicyValidationResult {
    /// Route findings by severity and derive `is_valid`.
    pub fn from_findings(findings: Vec<Violation>, recommendations: Vec<String>) -> Self {
        let (violations, warnings): (Vec<_>, Vec<_>) =
            findings.into_iter().partition(Violation::is_blocking);
        Self {
            is_valid: violations.is_empty(),
            violations,
            warnings,
            recommendations,
        }
    }
}
