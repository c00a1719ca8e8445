#![deny(missing_docs)]

//! # flowguard-core — Shared Types for Workflow Policy Governance
//!
//! Defines the types every other crate in the workspace depends on. It
//! depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **One policy registry.** [`PolicyStore`] is the only place live policy
//!    state is held. Evaluator, management, and rollback all share one
//!    injected instance; there are no process-wide singletons.
//!
//! 2. **Closed rule taxonomy.** [`RuleType`] is an enum with an exhaustive
//!    `match` per type and a `Custom` arm for everything else.
//!
//! 3. **`CanonicalBytes` for every digest.** Cache keys and audit digests
//!    are SHA-256 over RFC 8785 canonical JSON, so they do not depend on
//!    map insertion order.
//!
//! 4. **[`FlowguardError`] hierarchy.** Structured errors with `thiserror`,
//!    classified into the kinds a transport adapter maps to status codes.

pub mod canonical;
pub mod context;
pub mod digest;
pub mod error;
pub mod policy;
pub mod store;

// Re-export primary types for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use context::{EvaluationContext, PolicyValidationResult, Violation};
pub use digest::{sha256_digest, sha256_hex, ContentDigest};
pub use error::{CanonicalizationError, ErrorKind, FlowguardError, ValidationError};
pub use policy::{
    Action, ActionType, Condition, ConditionOperator, Policy, PolicyPriority, Rule, RuleType,
    Severity,
};
pub use store::PolicyStore;
