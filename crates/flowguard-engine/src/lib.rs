#![deny(missing_docs)]

//! # flowguard-engine — Rule Evaluation and Caching
//!
//! Turns declarative policies into findings for a workflow step.
//!
//! - [`condition`]: field resolution and the seven condition operators.
//! - [`builtin`]: the fixed check attached to each recognized rule type.
//! - [`action`]: the [`ActionSink`] seam for side-effecting actions.
//! - [`evaluator`]: per-policy evaluation with per-rule failure isolation.
//! - [`cache`]: the three-bucket read-through [`EvaluationCache`].
//! - [`validator`]: [`PolicyValidator`], the executor-facing entry point.
//!
//! Evaluation is side-effect free apart from the action sink and cache
//! fills, and may run on any number of threads concurrently.

pub mod action;
pub mod builtin;
pub mod cache;
pub mod condition;
pub mod evaluator;
pub mod validator;

pub use action::{ActionError, ActionEvent, ActionSink, TracingActionSink};
pub use builtin::{BuiltinFinding, BuiltinLimits};
pub use cache::{
    evaluation_key, CacheConfig, CacheEntry, CacheStats, EvaluationCache, InvalidationScope,
    ENABLED_POLICIES_KEY,
};
pub use condition::EvaluationTarget;
pub use evaluator::{PolicyEvaluation, RuleEvaluationError, RuleEvaluator, RuleFindings};
pub use validator::PolicyValidator;
