//! # Policy Definitions
//!
//! Declarative policy records: a [`Policy`] bundles typed [`Rule`]s, each of
//! which pairs AND-combined [`Condition`]s with [`Action`]s. Policies are data,
//! not code; the engine crate interprets them.
//!
//! Wire format: struct fields are camelCase, enum values snake_case, matching
//! the JSON documents exchanged with the management layer.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Severity / Priority
// ---------------------------------------------------------------------------

/// Severity of an action or violation. `Low` findings never block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; routed to warnings.
    Low,
    /// Blocking.
    Medium,
    /// Blocking.
    High,
    /// Blocking.
    Critical,
}

impl Severity {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Whether a finding at this severity blocks execution.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::Low)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPriority {
    /// Low priority.
    Low,
    /// Medium priority (default).
    Medium,
    /// High priority.
    High,
    /// Critical priority.
    Critical,
}

impl PolicyPriority {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for PolicyPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for PolicyPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleType
// ---------------------------------------------------------------------------

/// The kind of check a rule performs.
///
/// Closed set. Unknown type strings deserialize to [`RuleType::Custom`],
/// which runs only the rule's declared actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Deny-listed shell command patterns.
    CommandFilter,
    /// Sensitive filesystem locations.
    PathRestriction,
    /// File size ceiling.
    FileSizeLimit,
    /// Embedded credentials and secrets.
    SensitiveData,
    /// Step wall-clock ceiling.
    ExecutionTime,
    /// Memory / CPU ceilings.
    ResourceUsage,
    /// Declared actions only; no built-in check.
    #[serde(other)]
    Custom,
}

impl RuleType {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandFilter => "command_filter",
            Self::PathRestriction => "path_restriction",
            Self::FileSizeLimit => "file_size_limit",
            Self::SensitiveData => "sensitive_data",
            Self::ExecutionTime => "execution_time",
            Self::ResourceUsage => "resource_usage",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Strict JSON equality.
    Equals,
    /// Substring (or array element) match.
    Contains,
    /// Regular expression match.
    Regex,
    /// Numeric `>`.
    GreaterThan,
    /// Numeric `<`.
    LessThan,
    /// Membership in an array operand.
    In,
    /// Non-membership in an array operand.
    NotIn,
}

impl ConditionOperator {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }
}

/// A single predicate over one context field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Field name: `command`, `filePath`, `workflowId`, `stepId`, `userId`,
    /// or a key into the context metadata.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Operand.
    pub value: serde_json::Value,
    /// Case-sensitive `contains`/`regex` matching. Absent means case-insensitive.
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Condition {
    /// Create a case-insensitive condition.
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            case_sensitive: false,
        }
    }

    /// Builder: match case-sensitively.
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// What a rule does when its conditions hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Emit a violation at the action's severity.
    Block,
    /// Emit a low-severity warning.
    Warn,
    /// Side effect only: record the match.
    Log,
    /// Side effect only: notify interested parties.
    Notify,
    /// Side effect only: signal that a rollback is warranted.
    Rollback,
    /// Side effect only: deployment-specific handler.
    #[serde(other)]
    Custom,
}

impl ActionType {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Warn => "warn",
            Self::Log => "log",
            Self::Notify => "notify",
            Self::Rollback => "rollback",
            Self::Custom => "custom",
        }
    }
}

/// A rule action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Action kind.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Declared severity.
    pub severity: Severity,
    /// Message carried into the resulting finding.
    pub message: String,
}

impl Action {
    /// Create an action.
    pub fn new(action_type: ActionType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            action_type,
            severity,
            message: message.into(),
        }
    }

    /// A blocking action.
    pub fn block(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(ActionType::Block, severity, message)
    }

    /// A warning action.
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(ActionType::Warn, Severity::Low, message)
    }

    /// A log action.
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ActionType::Log, Severity::Low, message)
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A typed condition + action unit inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Identifier, unique within the owning policy.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Rule kind; selects the built-in check.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Disabled rules are skipped.
    pub enabled: bool,
    /// AND-combined predicates. Empty means always true.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Actions executed when the conditions hold.
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create an enabled rule with no conditions and no actions.
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rule_type,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Builder: add a condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Builder: add an action.
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Builder: set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A named, enable-able bundle of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Disabled policies are skipped by evaluation.
    pub enabled: bool,
    /// Policy priority.
    #[serde(default)]
    pub priority: PolicyPriority,
    /// Rules; ids are unique within the policy.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Author.
    pub created_by: String,
}

impl Policy {
    /// Create an enabled, empty policy with a fresh id.
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            priority: PolicyPriority::default(),
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
            created_by: created_by.into(),
        }
    }

    /// Builder: set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the priority.
    pub fn with_priority(mut self, priority: PolicyPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: add a rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Builder: set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Look up a rule by id.
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// Look up a rule by id, mutably.
    pub fn rule_mut(&mut self, rule_id: &str) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.id == rule_id)
    }

    /// Enabled rules in declaration order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Check structural invariants: non-empty name, non-empty and unique
    /// rule ids.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyPolicyName);
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(ValidationError::EmptyRuleId {
                    rule_name: rule.name.clone(),
                });
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(ValidationError::DuplicateRuleId {
                    policy_id: self.id.clone(),
                    rule_id: rule.id.clone(),
                });
            }
        }
        Ok(())
    }
}
