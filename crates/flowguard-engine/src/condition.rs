//! # Condition Matching
//!
//! Resolves a condition's `field` against the step being evaluated and
//! applies its operator. Conditions inside a rule are AND-combined; an empty
//! list holds vacuously.
//!
//! Malformed conditions (an invalid regex, a non-array operand for
//! `in`/`not_in`, non-numeric operands for comparisons) evaluate as
//! non-match. They are logged at `debug` and never raised.

use std::borrow::Cow;

use flowguard_core::{Condition, ConditionOperator, EvaluationContext};
use regex::RegexBuilder;
use serde_json::Value;

/// Upper bound on compiled regex size for user-supplied patterns.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// The step under evaluation: its context plus the command and file path
/// supplied by the caller.
///
/// Explicit `command`/`file_path` arguments take precedence over the
/// fields of the same name on the context.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationTarget<'a> {
    /// Step context.
    pub context: &'a EvaluationContext,
    /// Command override.
    pub command: Option<&'a str>,
    /// File path override.
    pub file_path: Option<&'a str>,
}

impl<'a> EvaluationTarget<'a> {
    /// Build a target from a context and optional overrides.
    pub fn new(
        context: &'a EvaluationContext,
        command: Option<&'a str>,
        file_path: Option<&'a str>,
    ) -> Self {
        Self {
            context,
            command,
            file_path,
        }
    }

    /// The effective command.
    pub fn command(&self) -> Option<&'a str> {
        self.command.or(self.context.command.as_deref())
    }

    /// The effective file path.
    pub fn file_path(&self) -> Option<&'a str> {
        self.file_path.or(self.context.file_path.as_deref())
    }

    /// A numeric metadata value, accepting numbers and numeric strings.
    pub fn metadata_number(&self, key: &str) -> Option<f64> {
        self.context.metadata.get(key).and_then(as_number)
    }

    /// Resolve a condition field name to a value.
    ///
    /// `command` and `filePath` come from the effective arguments,
    /// `workflowId`, `stepId` and `userId` from the context, anything else
    /// from the context metadata.
    pub fn resolve(&self, field: &str) -> Option<Cow<'a, Value>> {
        let owned = |s: &str| Some(Cow::Owned(Value::String(s.to_string())));
        match field {
            "command" => self.command().and_then(owned),
            "filePath" => self.file_path().and_then(owned),
            "workflowId" => owned(&self.context.workflow_id),
            "stepId" => owned(&self.context.step_id),
            "userId" => self.context.user_id.as_deref().and_then(owned),
            other => self.context.metadata.get(other).map(Cow::Borrowed),
        }
    }
}

/// Whether every condition holds. Empty slices hold vacuously.
pub fn all_conditions_hold(conditions: &[Condition], target: &EvaluationTarget<'_>) -> bool {
    conditions.iter().all(|c| condition_holds(c, target))
}

/// Evaluate a single condition against the target.
pub fn condition_holds(condition: &Condition, target: &EvaluationTarget<'_>) -> bool {
    let field = target.resolve(&condition.field);
    let field = field.as_deref();
    match condition.operator {
        ConditionOperator::Equals => field == Some(&condition.value),
        ConditionOperator::Contains => contains(field, &condition.value, condition.case_sensitive),
        ConditionOperator::Regex => regex_matches(field, condition),
        ConditionOperator::GreaterThan => compare(field, &condition.value, |a, b| a > b),
        ConditionOperator::LessThan => compare(field, &condition.value, |a, b| a < b),
        ConditionOperator::In => match condition.value.as_array() {
            Some(items) => field.is_some_and(|f| items.contains(f)),
            None => malformed(condition, "operand is not an array"),
        },
        ConditionOperator::NotIn => match condition.value.as_array() {
            Some(items) => !field.is_some_and(|f| items.contains(f)),
            None => malformed(condition, "operand is not an array"),
        },
    }
}

fn contains(field: Option<&Value>, needle: &Value, case_sensitive: bool) -> bool {
    match field {
        Some(Value::Array(items)) => items.contains(needle),
        Some(value) => match (scalar_text(value), scalar_text(needle)) {
            (Some(haystack), Some(needle)) => {
                if case_sensitive {
                    haystack.contains(needle.as_ref())
                } else {
                    haystack
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                }
            }
            _ => false,
        },
        None => false,
    }
}

fn regex_matches(field: Option<&Value>, condition: &Condition) -> bool {
    let Some(pattern) = condition.value.as_str() else {
        return malformed(condition, "regex operand is not a string");
    };
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(!condition.case_sensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
    {
        Ok(regex) => regex,
        Err(e) => return malformed(condition, &e.to_string()),
    };
    field
        .and_then(scalar_text)
        .is_some_and(|text| regex.is_match(&text))
}

fn compare(field: Option<&Value>, operand: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (field.and_then(as_number), as_number(operand)) {
        (Some(lhs), Some(rhs)) => op(lhs, rhs),
        _ => false,
    }
}

/// Numeric coercion: JSON numbers as-is, strings parsed after trimming.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn malformed(condition: &Condition, reason: &str) -> bool {
    tracing::debug!(
        field = %condition.field,
        operator = condition.operator.as_str(),
        reason,
        "malformed condition evaluated as non-match"
    );
    false
}
