//! # Error Types — Structured Error Hierarchy
//!
//! Management-path errors for policy mutation, versioning, rollback, and
//! approval transitions. All errors use `thiserror`.
//!
//! ## Design
//!
//! - Management-path errors are returned synchronously and never retried.
//! - Evaluation-path failures never surface here: a broken rule becomes a
//!   low-severity warning inside the evaluator.
//! - [`FlowguardError::status_code()`] gives a transport adapter the HTTP
//!   status for each error kind.

use thiserror::Error;

/// Top-level management-path error.
#[derive(Error, Debug)]
pub enum FlowguardError {
    /// An addressed resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource type ("policy", "rule", "version", ...).
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation is not legal in the resource's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A state machine transition was rejected.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
        /// Why the transition was rejected.
        reason: String,
    },

    /// A policy document failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Missing or invalid admin credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),
}

/// Coarse classification of a [`FlowguardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown id.
    NotFound,
    /// Acting on a resource in the wrong state.
    InvalidState,
    /// Malformed input.
    Validation,
    /// Missing or wrong admin token.
    Unauthorized,
    /// Anything the caller cannot fix.
    Internal,
}

impl FlowguardError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_) | Self::InvalidTransition { .. } => ErrorKind::InvalidState,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Canonicalization(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code a transport adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState | ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Internal => 500,
        }
    }
}

/// Validation failures for policy documents at the management boundary.
///
/// Malformed conditions are not listed here: they evaluate as non-match.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Policy name is empty or whitespace.
    #[error("policy name must be non-empty")]
    EmptyPolicyName,

    /// A rule id is empty.
    #[error("rule id must be non-empty (rule \"{rule_name}\")")]
    EmptyRuleId {
        /// Name of the offending rule.
        rule_name: String,
    },

    /// Two rules in one policy share an id.
    #[error("duplicate rule id \"{rule_id}\" in policy {policy_id}")]
    DuplicateRuleId {
        /// The policy containing the duplicates.
        policy_id: String,
        /// The repeated rule id.
        rule_id: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An approval or change request is malformed (missing policy document,
    /// non-positive expiry, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}
