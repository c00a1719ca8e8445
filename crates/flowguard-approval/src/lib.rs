#![deny(missing_docs)]

//! # flowguard-approval — Human Approval and Change Review
//!
//! - [`approval`]: [`ApprovalWorkflow`] and [`ApprovalRequest`], the
//!   pending → approved | rejected | expired state machine with lazy
//!   deadline enforcement.
//! - [`change_request`]: [`ChangeRequest`], reviewed proposals to create,
//!   update, delete, enable or disable a policy. Applied at most once by
//!   the management layer.
//! - [`audit`]: [`AuditLog`], one entry per transition, with query filters
//!   and per-entry content digests.

pub mod approval;
pub mod audit;
pub mod change_request;

pub use approval::{
    ApprovalConfig, ApprovalRequest, ApprovalStats, ApprovalStatus, ApprovalWorkflow, StatusCounts,
};
pub use audit::{Actor, AuditAction, AuditLog, AuditLogEntry, AuditQuery};
pub use change_request::{ChangeRequest, ChangeRequestStatus, ChangeType};
