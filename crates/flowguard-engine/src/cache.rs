//! # Evaluation Cache
//!
//! Read-through cache with three independent buckets:
//!
//! - **policies**: single policies by id,
//! - **policy lists**: aggregate lists by key,
//! - **evaluations**: per-policy [`PolicyEvaluation`]s keyed by
//!   [`evaluation_key`].
//!
//! Each bucket holds at most `max_entries_per_bucket` entries. When a full
//! bucket receives a new key, the entry with the oldest *insertion*
//! timestamp is evicted. Reads never refresh timestamps, so eviction is
//! FIFO rather than LRU.
//!
//! ## Invalidation ordering
//!
//! Every invalidation bumps a generation counter before clearing the
//! buckets. Read-through fills capture [`EvaluationCache::generation`]
//! before reading the store and insert through the `*_if_current` setters,
//! which re-check the generation under the bucket's write lock and refuse
//! to insert once an invalidation has happened in between. A fill
//! computed from pre-mutation state can therefore never survive the
//! mutation's invalidation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use flowguard_core::{sha256_hex, CanonicalBytes, CanonicalizationError, Policy};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::condition::EvaluationTarget;
use crate::evaluator::PolicyEvaluation;

/// Key under which the enabled-policy list is cached.
pub const ENABLED_POLICIES_KEY: &str = "policies:enabled";

// ---------------------------------------------------------------------------
// Configuration and stats
// ---------------------------------------------------------------------------

/// Cache sizing and default TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of each bucket.
    pub max_entries_per_bucket: usize,
    /// TTL applied when a setter is called without one.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries_per_bucket: 1000,
            default_ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    fn default_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.default_ttl_secs).unwrap_or(i64::MAX / 1000))
    }
}

/// Counters and sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries across all buckets, expired ones included until swept.
    pub size: usize,
    /// `hits / (hits + misses) * 100`, two decimals; `0.0` before any read.
    pub hit_rate: f64,
    /// Entries in the policy bucket.
    pub policy_entries: usize,
    /// Entries in the policy-list bucket.
    pub list_entries: usize,
    /// Entries in the evaluation bucket.
    pub evaluation_entries: usize,
}

/// What to invalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Everything cached for one policy, plus every aggregate list.
    Policy(String),
    /// One key, in whichever bucket holds it.
    Key(String),
    /// Every bucket.
    All,
}

// ---------------------------------------------------------------------------
// Entries and buckets
// ---------------------------------------------------------------------------

/// A cached value with its insertion time and TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Cached value.
    pub data: T,
    /// Insertion time. Not refreshed on read.
    pub timestamp: DateTime<Utc>,
    /// Time to live.
    pub ttl: Duration,
    seq: u64,
}

impl<T> CacheEntry<T> {
    /// Stale once `now - timestamp > ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp > self.ttl
    }
}

#[derive(Debug)]
struct Bucket<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    capacity: usize,
}

impl<T: Clone> Bucket<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.data.clone())
    }

    fn insert(&self, key: String, entry: CacheEntry<T>, guard: impl FnOnce() -> bool) -> bool {
        let mut entries = self.entries.write();
        if !guard() {
            return false;
        }
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| (e.timestamp, e.seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, entry);
        true
    }

    fn retain(&self, mut keep: impl FnMut(&str, &CacheEntry<T>) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, e| keep(k, e));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Three-bucket TTL cache with hit/miss accounting.
#[derive(Debug)]
pub struct EvaluationCache {
    config: CacheConfig,
    policies: Bucket<Policy>,
    lists: Bucket<Vec<Policy>>,
    evaluations: Bucket<PolicyEvaluation>,
    hits: AtomicU64,
    misses: AtomicU64,
    seq: AtomicU64,
    generation: AtomicU64,
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl EvaluationCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = config.max_entries_per_bucket;
        Self {
            config,
            policies: Bucket::new(capacity),
            lists: Bucket::new(capacity),
            evaluations: Bucket::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // ── Policies ────────────────────────────────────────────────────────

    /// Look up a policy.
    pub fn get_policy(&self, policy_id: &str) -> Option<Policy> {
        self.get_policy_at(policy_id, Utc::now())
    }

    /// Look up a policy as of `now`.
    pub fn get_policy_at(&self, policy_id: &str, now: DateTime<Utc>) -> Option<Policy> {
        self.record(&self.policies, policy_id, now)
    }

    /// Cache a policy under its id.
    pub fn set_policy(&self, policy: Policy, ttl: Option<Duration>) {
        self.set_policy_at(policy, ttl, Utc::now());
    }

    /// Cache a policy, stamped `now`.
    pub fn set_policy_at(&self, policy: Policy, ttl: Option<Duration>, now: DateTime<Utc>) {
        let key = policy.id.clone();
        self.store(&self.policies, key, policy, ttl, now, None);
    }

    /// Cache a policy unless an invalidation happened since `generation`.
    pub fn set_policy_if_current(&self, policy: Policy, generation: u64) -> bool {
        let key = policy.id.clone();
        self.store(&self.policies, key, policy, None, Utc::now(), Some(generation))
    }

    // ── Policy lists ────────────────────────────────────────────────────

    /// Look up a policy list.
    pub fn get_policy_list(&self, key: &str) -> Option<Vec<Policy>> {
        self.get_policy_list_at(key, Utc::now())
    }

    /// Look up a policy list as of `now`.
    pub fn get_policy_list_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<Policy>> {
        self.record(&self.lists, key, now)
    }

    /// Cache a policy list.
    pub fn set_policy_list(&self, key: impl Into<String>, policies: Vec<Policy>, ttl: Option<Duration>) {
        self.set_policy_list_at(key, policies, ttl, Utc::now());
    }

    /// Cache a policy list, stamped `now`.
    pub fn set_policy_list_at(
        &self,
        key: impl Into<String>,
        policies: Vec<Policy>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        self.store(&self.lists, key.into(), policies, ttl, now, None);
    }

    /// Cache a policy list unless an invalidation happened since `generation`.
    pub fn set_policy_list_if_current(
        &self,
        key: impl Into<String>,
        policies: Vec<Policy>,
        generation: u64,
    ) -> bool {
        self.store(&self.lists, key.into(), policies, None, Utc::now(), Some(generation))
    }

    // ── Evaluations ─────────────────────────────────────────────────────

    /// Look up an evaluation.
    pub fn get_evaluation(&self, key: &str) -> Option<PolicyEvaluation> {
        self.get_evaluation_at(key, Utc::now())
    }

    /// Look up an evaluation as of `now`.
    pub fn get_evaluation_at(&self, key: &str, now: DateTime<Utc>) -> Option<PolicyEvaluation> {
        self.record(&self.evaluations, key, now)
    }

    /// Cache an evaluation.
    pub fn set_evaluation(&self, key: impl Into<String>, evaluation: PolicyEvaluation, ttl: Option<Duration>) {
        self.set_evaluation_at(key, evaluation, ttl, Utc::now());
    }

    /// Cache an evaluation, stamped `now`.
    pub fn set_evaluation_at(
        &self,
        key: impl Into<String>,
        evaluation: PolicyEvaluation,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        self.store(&self.evaluations, key.into(), evaluation, ttl, now, None);
    }

    /// Cache an evaluation unless an invalidation happened since `generation`.
    pub fn set_evaluation_if_current(
        &self,
        key: impl Into<String>,
        evaluation: PolicyEvaluation,
        generation: u64,
    ) -> bool {
        self.store(&self.evaluations, key.into(), evaluation, None, Utc::now(), Some(generation))
    }

    // ── Administration ──────────────────────────────────────────────────

    /// Drop cached entries.
    ///
    /// Invalidating a policy removes its policy entry, every evaluation for
    /// it, and every aggregate list (any of which may contain it).
    pub fn invalidate(&self, scope: InvalidationScope) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed = match &scope {
            InvalidationScope::Policy(policy_id) => {
                let prefix = evaluation_key_prefix(policy_id);
                self.policies.retain(|k, _| k != policy_id)
                    + self.lists.retain(|_, _| false)
                    + self.evaluations.retain(|k, _| !k.starts_with(&prefix))
            }
            InvalidationScope::Key(key) => {
                self.policies.retain(|k, _| k != key)
                    + self.lists.retain(|k, _| k != key)
                    + self.evaluations.retain(|k, _| k != key)
            }
            InvalidationScope::All => {
                self.policies.retain(|_, _| false)
                    + self.lists.retain(|_, _| false)
                    + self.evaluations.retain(|_, _| false)
            }
        };
        tracing::debug!(?scope, removed, "cache invalidated");
        removed
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired_entries(&self) -> usize {
        self.cleanup_expired_entries_at(Utc::now())
    }

    /// Remove every entry expired as of `now`.
    pub fn cleanup_expired_entries_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.policies.retain(|_, e| !e.is_expired(now))
            + self.lists.retain(|_, e| !e.is_expired(now))
            + self.evaluations.retain(|_, e| !e.is_expired(now));
        if removed > 0 {
            tracing::debug!(removed, "expired cache entries swept");
        }
        removed
    }

    /// Clear every bucket and zero the counters.
    pub fn reset(&self) {
        self.invalidate(InvalidationScope::All);
        self.hits.store(0, Ordering::SeqCst);
        self.misses.store(0, Ordering::SeqCst);
    }

    /// Snapshot of counters and sizes.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::SeqCst);
        let misses = self.misses.load(Ordering::SeqCst);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            ((hits as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        };
        let policy_entries = self.policies.len();
        let list_entries = self.lists.len();
        let evaluation_entries = self.evaluations.len();
        CacheStats {
            hits,
            misses,
            size: policy_entries + list_entries + evaluation_entries,
            hit_rate,
            policy_entries,
            list_entries,
            evaluation_entries,
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn record<T: Clone>(&self, bucket: &Bucket<T>, key: &str, now: DateTime<Utc>) -> Option<T> {
        let found = bucket.get(key, now);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache miss");
        }
        found
    }

    fn store<T: Clone>(
        &self,
        bucket: &Bucket<T>,
        key: String,
        data: T,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
        expected_generation: Option<u64>,
    ) -> bool {
        let entry = CacheEntry {
            data,
            timestamp: now,
            ttl: ttl.unwrap_or_else(|| self.config.default_ttl()),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        bucket.insert(key, entry, || match expected_generation {
            Some(expected) => self.generation() == expected,
            None => true,
        })
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

fn evaluation_key_prefix(policy_id: &str) -> String {
    format!("eval:{policy_id}:")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationKeyMaterial<'a> {
    policy_id: &'a str,
    context: &'a flowguard_core::EvaluationContext,
    command: Option<&'a str>,
    file_path: Option<&'a str>,
}

/// Deterministic cache key for evaluating `policy_id` against `target`.
///
/// SHA-256 over the canonical JSON of the policy id, the context and the
/// effective command and path, so the key does not depend on metadata
/// insertion order.
pub fn evaluation_key(
    policy_id: &str,
    target: &EvaluationTarget<'_>,
) -> Result<String, CanonicalizationError> {
    let material = EvaluationKeyMaterial {
        policy_id,
        context: target.context,
        command: target.command(),
        file_path: target.file_path(),
    };
    let canonical = CanonicalBytes::new(&material)?;
    Ok(format!(
        "{}{}",
        evaluation_key_prefix(policy_id),
        sha256_hex(&canonical)
    ))
}
