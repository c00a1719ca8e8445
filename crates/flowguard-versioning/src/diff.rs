//! # Version Diff
//!
//! Structural comparison of two policy snapshots: the basic fields
//! (`name`, `description`, `enabled`, `priority`) and the rules keyed by
//! rule id. A rule present in both snapshots counts as modified when the
//! two copies are not deep-equal.

use std::collections::BTreeMap;

use flowguard_core::{Policy, Rule};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::PolicyVersion;

/// Whether a compared item changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Values differ.
    Modified,
    /// Values are equal.
    Unchanged,
}

/// Comparison of one basic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// Field name in wire format.
    pub field: String,
    /// Outcome.
    pub status: ChangeStatus,
    /// Value in the older snapshot.
    pub old_value: Value,
    /// Value in the newer snapshot.
    pub new_value: Value,
}

/// A rule present in both snapshots with different content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleModification {
    /// Rule id.
    pub rule_id: String,
    /// Rule in the older snapshot.
    pub old: Rule,
    /// Rule in the newer snapshot.
    pub new: Rule,
}

/// Rule-level differences, each list sorted by rule id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChanges {
    /// Only in the newer snapshot.
    pub added: Vec<Rule>,
    /// Only in the older snapshot.
    pub removed: Vec<Rule>,
    /// In both, content differs.
    pub modified: Vec<RuleModification>,
    /// In both, deep-equal.
    pub unchanged: Vec<String>,
}

/// Difference between two versions of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    /// Policy compared.
    pub policy_id: String,
    /// Older side.
    pub from_version: u64,
    /// Newer side.
    pub to_version: u64,
    /// Basic field comparisons, in fixed order.
    pub fields: Vec<FieldChange>,
    /// Rule comparisons.
    pub rules: RuleChanges,
}

impl VersionDiff {
    /// Compare `old` against `new`.
    pub fn between(old: &PolicyVersion, new: &PolicyVersion) -> Self {
        Self {
            policy_id: new.policy_id.clone(),
            from_version: old.version,
            to_version: new.version,
            fields: diff_fields(&old.policy, &new.policy),
            rules: diff_rules(&old.policy.rules, &new.policy.rules),
        }
    }

    /// Whether anything differs.
    pub fn has_changes(&self) -> bool {
        self.fields.iter().any(|f| f.status == ChangeStatus::Modified)
            || !self.rules.added.is_empty()
            || !self.rules.removed.is_empty()
            || !self.rules.modified.is_empty()
    }

    /// Names of the modified basic fields.
    pub fn modified_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.status == ChangeStatus::Modified)
            .map(|f| f.field.as_str())
            .collect()
    }
}

fn diff_fields(old: &Policy, new: &Policy) -> Vec<FieldChange> {
    let pairs = [
        ("name", Value::from(old.name.as_str()), Value::from(new.name.as_str())),
        (
            "description",
            Value::from(old.description.as_str()),
            Value::from(new.description.as_str()),
        ),
        ("enabled", Value::from(old.enabled), Value::from(new.enabled)),
        (
            "priority",
            Value::from(old.priority.as_str()),
            Value::from(new.priority.as_str()),
        ),
    ];
    pairs
        .into_iter()
        .map(|(field, old_value, new_value)| FieldChange {
            field: field.to_string(),
            status: if old_value == new_value {
                ChangeStatus::Unchanged
            } else {
                ChangeStatus::Modified
            },
            old_value,
            new_value,
        })
        .collect()
}

fn diff_rules(old: &[Rule], new: &[Rule]) -> RuleChanges {
    let old: BTreeMap<&str, &Rule> = old.iter().map(|r| (r.id.as_str(), r)).collect();
    let new: BTreeMap<&str, &Rule> = new.iter().map(|r| (r.id.as_str(), r)).collect();
    let mut changes = RuleChanges::default();

    for (id, old_rule) in &old {
        match new.get(id) {
            None => changes.removed.push((*old_rule).clone()),
            Some(new_rule) if new_rule == old_rule => changes.unchanged.push(id.to_string()),
            Some(new_rule) => changes.modified.push(RuleModification {
                rule_id: id.to_string(),
                old: (*old_rule).clone(),
                new: (*new_rule).clone(),
            }),
        }
    }
    changes.added = new
        .iter()
        .filter(|(id, _)| !old.contains_key(*id))
        .map(|(_, rule)| (*rule).clone())
        .collect();
    changes
}
