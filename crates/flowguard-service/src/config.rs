//! # Governance Configuration
//!
//! One [`GovernanceConfig`] aggregates the tunables of every component.
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a YAML file ([`GovernanceConfig::load`])
//! 3. environment overrides:
//!    - `FLOWGUARD_ADMIN_TOKEN`
//!    - `FLOWGUARD_CACHE_TTL_SECS`
//!    - `FLOWGUARD_MAX_VERSIONS`
//!    - `FLOWGUARD_APPROVAL_EXPIRY_HOURS`
//!
//! Every loader ends with [`GovernanceConfig::validate`].
//!
//! ```yaml
//! cache:
//!   max_entries_per_bucket: 1000
//!   default_ttl_secs: 300
//! versions:
//!   max_versions_per_policy: 50
//! approvals:
//!   default_expiry_hours: 24
//! maintenance_interval_secs: 60
//! ```

use std::path::Path;

use flowguard_approval::ApprovalConfig;
use flowguard_core::ValidationError;
use flowguard_engine::{BuiltinLimits, CacheConfig};
use flowguard_versioning::VersionConfig;
use serde::Deserialize;

use crate::auth::SecretToken;

/// Admin token.
pub const ENV_ADMIN_TOKEN: &str = "FLOWGUARD_ADMIN_TOKEN";
/// Cache TTL in seconds.
pub const ENV_CACHE_TTL_SECS: &str = "FLOWGUARD_CACHE_TTL_SECS";
/// Versions kept per policy.
pub const ENV_MAX_VERSIONS: &str = "FLOWGUARD_MAX_VERSIONS";
/// Default approval expiry in hours.
pub const ENV_APPROVAL_EXPIRY_HOURS: &str = "FLOWGUARD_APPROVAL_EXPIRY_HOURS";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for this schema.
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An environment override did not parse.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value is out of range.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Tunables for every governance component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Evaluation cache.
    pub cache: CacheConfig,
    /// Version retention.
    pub versions: VersionConfig,
    /// Approval defaults and audit retention.
    pub approvals: ApprovalConfig,
    /// Ceilings for the resource built-ins.
    pub limits: BuiltinLimits,
    /// Period of the background maintenance sweep.
    pub maintenance_interval_secs: u64,
    /// Secret for mutating admin calls. `None` refuses all of them.
    pub admin_token: Option<SecretToken>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            versions: VersionConfig::default(),
            approvals: ApprovalConfig::default(),
            limits: BuiltinLimits::default(),
            maintenance_interval_secs: 60,
            admin_token: None,
        }
    }
}

impl GovernanceConfig {
    /// Parse YAML. An empty document yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(path = %path.display(), "governance config loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup` (variable name to value).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(token) = lookup(ENV_ADMIN_TOKEN) {
            self.admin_token = Some(SecretToken::new(token));
        }
        if let Some(ttl) = parse_override(&lookup, ENV_CACHE_TTL_SECS)? {
            self.cache.default_ttl_secs = ttl;
        }
        if let Some(max) = parse_override(&lookup, ENV_MAX_VERSIONS)? {
            self.versions.max_versions_per_policy = max;
        }
        if let Some(hours) = parse_override(&lookup, ENV_APPROVAL_EXPIRY_HOURS)? {
            self.approvals.default_expiry_hours = hours;
        }
        Ok(())
    }

    /// Reject zero capacities and TTLs and non-positive expiry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |msg: &str| Err(ValidationError::InvalidConfig(msg.to_string()));
        if self.cache.max_entries_per_bucket == 0 {
            return fail("cache.max_entries_per_bucket must be positive");
        }
        if self.cache.default_ttl_secs == 0 {
            return fail("cache.default_ttl_secs must be positive");
        }
        if self.versions.max_versions_per_policy == 0 {
            return fail("versions.max_versions_per_policy must be positive");
        }
        let hours = self.approvals.default_expiry_hours;
        if !hours.is_finite() || hours <= 0.0 {
            return fail("approvals.default_expiry_hours must be a positive number");
        }
        if self.approvals.audit_capacity == 0 {
            return fail("approvals.audit_capacity must be positive");
        }
        if self.maintenance_interval_secs == 0 {
            return fail("maintenance_interval_secs must be positive");
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}
