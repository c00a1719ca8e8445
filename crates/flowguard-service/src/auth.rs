//! # Admin Token Guard
//!
//! Mutating administrative calls (policy edits, rollback execution, cache
//! resets) present an out-of-band token that is compared against the
//! configured secret. Evaluation never goes through the guard.
//!
//! The secret is held in a [`SecretToken`]: zeroized on drop, redacted in
//! `Debug`, never serialized.

use flowguard_core::FlowguardError;
use serde::{Deserialize, Deserializer};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

// ── Secret ──────────────────────────────────────────────────────────────────

/// A configured admin secret.
#[derive(Clone)]
pub struct SecretToken(Zeroizing<String>);

impl SecretToken {
    /// Wrap a secret value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// The raw secret. Do not log the result.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for SecretToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

// ── Guard ───────────────────────────────────────────────────────────────────

/// Authorizes mutating admin calls against the configured secret.
///
/// With no secret configured every call is refused.
#[derive(Debug, Clone, Default)]
pub struct AdminGuard {
    token: Option<SecretToken>,
}

impl AdminGuard {
    /// Create a guard. An empty secret counts as not configured.
    pub fn new(token: Option<SecretToken>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Whether a secret is configured.
    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Check a presented token.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), FlowguardError> {
        let Some(expected) = &self.token else {
            tracing::warn!("admin call refused: no admin token configured");
            return Err(FlowguardError::Unauthorized(
                "admin token not configured".into(),
            ));
        };
        let Some(presented) = presented else {
            tracing::warn!("admin call refused: token missing");
            return Err(FlowguardError::Unauthorized("admin token missing".into()));
        };
        if constant_time_token_eq(presented, expected.expose()) {
            Ok(())
        } else {
            tracing::warn!("admin call refused: token mismatch");
            Err(FlowguardError::Unauthorized("invalid admin token".into()))
        }
    }
}

/// Constant-time token comparison. On a length mismatch a dummy comparison
/// still runs so timing does not depend on where the inputs differ.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}
