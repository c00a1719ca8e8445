//! # Audit Log
//!
//! Append-only record of every approval, rejection, expiry and
//! change-request transition.
//!
//! ## Tamper Evidence
//!
//! Every entry is individually digestable via `CanonicalBytes` +
//! `sha256_digest`. The log keeps at most `capacity` entries and trims the
//! oldest 10% on overflow; deployments that need the full history should
//! export entries before they age out.

use chrono::{DateTime, Utc};
use flowguard_core::{sha256_digest, CanonicalBytes, ContentDigest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Resource type recorded for approval requests.
pub const RESOURCE_APPROVAL: &str = "approval_request";
/// Resource type recorded for change requests.
pub const RESOURCE_CHANGE_REQUEST: &str = "change_request";

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Who performed an action, with optional request provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Acting user.
    pub user_id: String,
    /// Client address, when known.
    pub ip_address: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
}

impl Actor {
    /// An actor with no provenance.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Builder: set the client address.
    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Builder: set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl From<&str> for Actor {
    fn from(user_id: &str) -> Self {
        Self::new(user_id)
    }
}

impl From<String> for Actor {
    fn from(user_id: String) -> Self {
        Self::new(user_id)
    }
}

// ---------------------------------------------------------------------------
// AuditAction
// ---------------------------------------------------------------------------

/// The kind of audited transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An approval was requested.
    ApprovalRequested,
    /// An approval was granted.
    ApprovalGranted,
    /// An approval was rejected.
    ApprovalRejected,
    /// A pending approval passed its deadline.
    ApprovalExpired,
    /// A change request was filed.
    ChangeRequested,
    /// A change request was approved.
    ChangeApproved,
    /// A change request was rejected.
    ChangeRejected,
    /// An approved change request was applied to the policy store.
    ChangeApplied,
}

impl AuditAction {
    /// Return the string value for serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalExpired => "approval_expired",
            Self::ChangeRequested => "change_requested",
            Self::ChangeApproved => "change_approved",
            Self::ChangeRejected => "change_rejected",
            Self::ChangeApplied => "change_applied",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditLogEntry
// ---------------------------------------------------------------------------

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Entry id.
    pub id: String,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Acting user.
    pub user_id: String,
    /// What happened.
    pub action: AuditAction,
    /// Kind of resource acted on.
    pub resource_type: String,
    /// Id of the resource acted on.
    pub resource_id: String,
    /// Structured context.
    pub details: serde_json::Value,
    /// Client address, when known.
    pub ip_address: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
}

impl AuditLogEntry {
    /// Create an entry stamped `timestamp`.
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            user_id: actor.user_id.clone(),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            ip_address: actor.ip_address.clone(),
            user_agent: actor.user_agent.clone(),
        }
    }

    /// Content digest of this entry for tamper-evidence checks.
    ///
    /// Returns `None` if canonicalization fails.
    pub fn digest(&self) -> Option<ContentDigest> {
        match CanonicalBytes::new(self) {
            Ok(canonical) => Some(sha256_digest(&canonical)),
            Err(e) => {
                tracing::warn!(entry_id = %self.id, error = %e, "audit entry canonicalization failed; digest unavailable");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuditQuery
// ---------------------------------------------------------------------------

/// Filter for [`AuditLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Acting user.
    pub user_id: Option<String>,
    /// Resource type.
    pub resource_type: Option<String>,
    /// Resource id.
    pub resource_id: Option<String>,
    /// Action kind.
    pub action: Option<AuditAction>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of entries returned.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Match everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: filter by user.
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Builder: filter by resource type.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Builder: filter by resource id.
    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Builder: filter by action.
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Builder: restrict to `[from, to]`.
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Builder: cap the result size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.user_id.as_deref().map_or(true, |u| entry.user_id == u)
            && self
                .resource_type
                .as_deref()
                .map_or(true, |t| entry.resource_type == t)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |r| entry.resource_id == r)
            && self.action.map_or(true, |a| entry.action == a)
            && self.from.map_or(true, |from| entry.timestamp >= from)
            && self.to.map_or(true, |to| entry.timestamp <= to)
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Bounded append-only audit log, safe to share across threads.
pub struct AuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
    capacity: usize,
}

impl AuditLog {
    /// Create a log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, trimming the oldest 10% on overflow.
    pub fn record(&self, entry: AuditLogEntry) {
        tracing::debug!(
            action = entry.action.as_str(),
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            user_id = %entry.user_id,
            "audit entry recorded"
        );
        let mut entries = self.entries.write();
        entries.push(entry);
        if entries.len() > self.capacity {
            let trim_count = (self.capacity / 10).max(1);
            entries.drain(..trim_count);
        }
    }

    /// Matching entries, newest first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditLogEntry> {
        let entries = self.entries.read();
        let matching = entries.iter().rev().filter(|e| query.matches(e)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Every entry, newest first.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.query(&AuditQuery::new())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Digests of every entry, oldest first. Entries that fail
    /// canonicalization are skipped.
    pub fn compute_digests(&self) -> Vec<(String, ContentDigest)> {
        self.entries
            .read()
            .iter()
            .filter_map(|e| e.digest().map(|d| (e.id.clone(), d)))
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(user: &str, action: AuditAction, resource_id: &str, at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry::new(
            &Actor::from(user),
            action,
            RESOURCE_APPROVAL,
            resource_id,
            json!({"policyId": "pol-1"}),
            at,
        )
    }

    #[test]
    fn actor_provenance_is_recorded() {
        let actor = Actor::new("alice").with_ip("10.0.0.7").with_user_agent("cli/1.0");
        let e = AuditLogEntry::new(
            &actor,
            AuditAction::ChangeRequested,
            RESOURCE_CHANGE_REQUEST,
            "cr-1",
            json!({}),
            Utc::now(),
        );
        assert_eq!(e.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(e.user_agent.as_deref(), Some("cli/1.0"));
        let wire = serde_json::to_value(&e).unwrap();
        assert_eq!(wire["resourceType"], "change_request");
        assert_eq!(wire["action"], "change_requested");
    }

    #[test]
    fn digest_is_deterministic_and_content_sensitive() {
        let at = DateTime::parse_from_rfc3339("2026-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let e = entry("alice", AuditAction::ApprovalGranted, "ap-1", at);
        assert_eq!(e.digest().unwrap(), e.digest().unwrap());
        assert_eq!(e.digest().unwrap().to_hex().len(), 64);

        let mut tampered = e.clone();
        tampered.user_id = "mallory".into();
        assert_ne!(e.digest().unwrap(), tampered.digest().unwrap());
    }

    #[test]
    fn query_filters_newest_first() {
        let log = AuditLog::default();
        let t0 = Utc::now();
        log.record(entry("alice", AuditAction::ApprovalRequested, "ap-1", t0));
        log.record(entry("bob", AuditAction::ApprovalGranted, "ap-1", t0 + Duration::seconds(1)));
        log.record(entry("alice", AuditAction::ApprovalRequested, "ap-2", t0 + Duration::seconds(2)));

        let alice = log.query(&AuditQuery::new().user("alice"));
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].resource_id, "ap-2");

        assert_eq!(log.query(&AuditQuery::new().resource("ap-1")).len(), 2);
        assert_eq!(
            log.query(&AuditQuery::new().action(AuditAction::ApprovalGranted)).len(),
            1
        );
        assert_eq!(
            log.query(&AuditQuery::new().resource_type(RESOURCE_CHANGE_REQUEST)).len(),
            0
        );
        let window = log.query(&AuditQuery::new().between(t0 + Duration::seconds(1), t0 + Duration::seconds(2)));
        assert_eq!(window.len(), 2);
        assert_eq!(log.query(&AuditQuery::new().limit(1)).len(), 1);
    }

    #[test]
    fn trimming_drops_oldest_tenth() {
        let log = AuditLog::new(10);
        let t0 = Utc::now();
        for i in 0..11 {
            log.record(entry("alice", AuditAction::ApprovalRequested, &format!("ap-{i}"), t0));
        }
        assert_eq!(log.len(), 10);
        let ids: Vec<String> = log.entries().into_iter().map(|e| e.resource_id).collect();
        assert!(!ids.contains(&"ap-0".to_string()));
        assert!(ids.contains(&"ap-10".to_string()));
    }

    #[test]
    fn compute_digests_covers_every_entry() {
        let log = AuditLog::default();
        log.record(entry("alice", AuditAction::ApprovalRequested, "ap-1", Utc::now()));
        log.record(entry("bob", AuditAction::ApprovalRejected, "ap-1", Utc::now()));
        assert_eq!(log.compute_digests().len(), 2);
        assert!(!log.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn log_never_exceeds_capacity(capacity in 1usize..50, writes in 0usize..200) {
                let log = AuditLog::new(capacity);
                let t0 = Utc::now();
                for i in 0..writes {
                    log.record(entry("alice", AuditAction::ApprovalRequested, &format!("ap-{i}"), t0));
                }
                prop_assert!(log.len() <= capacity);
                if writes > 0 {
                    let newest = format!("ap-{}", writes - 1);
                    prop_assert_eq!(&log.entries()[0].resource_id, &newest);
                }
            }
        }
    }
}
