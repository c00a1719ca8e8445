#![deny(missing_docs)]

//! # flowguard-versioning — Policy History and Rollback
//!
//! - [`store`]: [`VersionStore`], the append-only per-policy snapshot
//!   history with monotonic numbering, bounded retention and restore.
//! - [`diff`]: [`VersionDiff`], field- and rule-level comparison of two
//!   snapshots.
//! - [`rollback`]: [`RollbackOrchestrator`], the approval-gated rollback
//!   state machine over the shared policy store, version store and
//!   evaluation cache.
//!
//! Version numbers are never reused and history is never rewritten:
//! restores and rollbacks append.

pub mod diff;
pub mod rollback;
pub mod store;

pub use diff::{ChangeStatus, FieldChange, RuleChanges, RuleModification, VersionDiff};
pub use rollback::{
    RollbackOrchestrator, RollbackRequest, RollbackResult, RollbackStats, RollbackStatus,
};
pub use store::{PolicyVersion, VersionConfig, VersionHistory, VersionStore};
