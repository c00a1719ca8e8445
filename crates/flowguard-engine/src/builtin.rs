//! # Built-in Checks
//!
//! The fixed check each recognized [`RuleType`] runs in addition to the
//! rule's declared actions, once the rule's conditions hold.
//!
//! | type | inspects | severity |
//! |---|---|---|
//! | `command_filter` | command against a deny-list | critical |
//! | `path_restriction` | file path against sensitive prefixes | high |
//! | `sensitive_data` | command, path and string metadata for `key=value` secrets | high |
//! | `file_size_limit` | `metadata.fileSize` | medium |
//! | `execution_time` | `metadata.executionTime` | medium |
//! | `resource_usage` | `metadata.memoryUsage`, `metadata.cpuUsage` | medium |
//!
//! `custom` has no built-in. Secret values are never echoed into findings;
//! only the matched key names are reported.

use std::sync::LazyLock;

use flowguard_core::{RuleType, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::condition::EvaluationTarget;

/// Command fragments that are never allowed, matched case-insensitively.
pub const DENIED_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "sudo",
    "chmod 777",
    "chmod -r 777",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "mkfs",
    "> /dev/sda",
    ":(){ :|:& };:",
    "format c:",
];

/// Path fragments that mark a sensitive location, matched case-insensitively.
pub const SENSITIVE_PATH_PREFIXES: &[&str] = &[
    "/etc/",
    "/root/",
    "/boot/",
    "/sys/",
    "/proc/",
    "/.ssh/",
    "/.aws/",
    "c:\\windows\\",
    "c:\\program files\\",
];

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(api[_-]?key|password|passwd|secret|token|private[_-]?key)[a-z0-9_]*["']?\s*[:=]\s*(?:"[^"]+"|'[^']+'|[^\s"',;]+)"#,
    )
    .expect("secret pattern is a valid regex")
});

/// Ceilings for the numeric built-ins.
///
/// Per-step metadata (`maxFileSize`, `maxExecutionTime`) overrides the
/// configured file-size and execution-time ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinLimits {
    /// Largest file a step may touch, in bytes.
    pub max_file_size_bytes: u64,
    /// Longest a step may run, in milliseconds.
    pub max_execution_time_ms: u64,
    /// Memory ceiling, in bytes.
    pub max_memory_bytes: u64,
    /// CPU ceiling, in percent.
    pub max_cpu_percent: f64,
}

impl Default for BuiltinLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 100 * 1024 * 1024,
            max_execution_time_ms: 3_600_000,
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_cpu_percent: 90.0,
        }
    }
}

/// A finding produced by a built-in check, before it is attributed to a
/// policy and rule.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinFinding {
    /// Finding severity.
    pub severity: Severity,
    /// Explanation.
    pub message: String,
}

impl BuiltinFinding {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Run the built-in check for `rule_type`.
pub fn run_builtin(
    rule_type: RuleType,
    target: &EvaluationTarget<'_>,
    limits: &BuiltinLimits,
) -> Vec<BuiltinFinding> {
    match rule_type {
        RuleType::CommandFilter => check_command(target),
        RuleType::PathRestriction => check_path(target),
        RuleType::SensitiveData => check_sensitive_data(target),
        RuleType::FileSizeLimit => check_file_size(target, limits),
        RuleType::ExecutionTime => check_execution_time(target, limits),
        RuleType::ResourceUsage => check_resource_usage(target, limits),
        RuleType::Custom => Vec::new(),
    }
}

fn matched_fragments<'p>(haystack: &str, fragments: &[&'p str]) -> Vec<&'p str> {
    let haystack = haystack.to_lowercase();
    fragments
        .iter()
        .copied()
        .filter(|f| haystack.contains(f))
        .collect()
}

fn check_command(target: &EvaluationTarget<'_>) -> Vec<BuiltinFinding> {
    let Some(command) = target.command() else {
        return Vec::new();
    };
    let matched = matched_fragments(command, DENIED_COMMAND_PATTERNS);
    if matched.is_empty() {
        return Vec::new();
    }
    vec![BuiltinFinding::new(
        Severity::Critical,
        format!("Dangerous command pattern detected: {}", matched.join(", ")),
    )]
}

fn check_path(target: &EvaluationTarget<'_>) -> Vec<BuiltinFinding> {
    let Some(path) = target.file_path() else {
        return Vec::new();
    };
    let matched = matched_fragments(path, SENSITIVE_PATH_PREFIXES);
    if matched.is_empty() {
        return Vec::new();
    }
    vec![BuiltinFinding::new(
        Severity::High,
        format!("Access to restricted path: {path}"),
    )]
}

fn check_sensitive_data(target: &EvaluationTarget<'_>) -> Vec<BuiltinFinding> {
    let texts = target
        .command()
        .into_iter()
        .chain(target.file_path())
        .chain(target.context.metadata.values().filter_map(|v| v.as_str()));

    let mut keys: Vec<String> = Vec::new();
    for text in texts {
        for captures in SECRET_ASSIGNMENT.captures_iter(text) {
            if let Some(key) = captures.get(1) {
                let key = key.as_str().to_lowercase();
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
    }
    if keys.is_empty() {
        return Vec::new();
    }
    vec![BuiltinFinding::new(
        Severity::High,
        format!("Potential sensitive data exposure: {}", keys.join(", ")),
    )]
}

fn check_file_size(target: &EvaluationTarget<'_>, limits: &BuiltinLimits) -> Vec<BuiltinFinding> {
    let Some(size) = target.metadata_number("fileSize") else {
        return Vec::new();
    };
    let limit = target
        .metadata_number("maxFileSize")
        .unwrap_or(limits.max_file_size_bytes as f64);
    if size <= limit {
        return Vec::new();
    }
    vec![BuiltinFinding::new(
        Severity::Medium,
        format!("File size {size} bytes exceeds limit of {limit} bytes"),
    )]
}

fn check_execution_time(
    target: &EvaluationTarget<'_>,
    limits: &BuiltinLimits,
) -> Vec<BuiltinFinding> {
    let Some(elapsed) = target.metadata_number("executionTime") else {
        return Vec::new();
    };
    let limit = target
        .metadata_number("maxExecutionTime")
        .unwrap_or(limits.max_execution_time_ms as f64);
    if elapsed <= limit {
        return Vec::new();
    }
    vec![BuiltinFinding::new(
        Severity::Medium,
        format!("Execution time {elapsed}ms exceeds limit of {limit}ms"),
    )]
}

fn check_resource_usage(
    target: &EvaluationTarget<'_>,
    limits: &BuiltinLimits,
) -> Vec<BuiltinFinding> {
    let mut findings = Vec::new();
    if let Some(memory) = target.metadata_number("memoryUsage") {
        if memory > limits.max_memory_bytes as f64 {
            findings.push(BuiltinFinding::new(
                Severity::Medium,
                format!(
                    "Memory usage {memory} bytes exceeds limit of {} bytes",
                    limits.max_memory_bytes
                ),
            ));
        }
    }
    if let Some(cpu) = target.metadata_number("cpuUsage") {
        if cpu > limits.max_cpu_percent {
            findings.push(BuiltinFinding::new(
                Severity::Medium,
                format!(
                    "CPU usage {cpu}% exceeds limit of {}%",
                    limits.max_cpu_percent
                ),
            ));
        }
    }
    findings
}
