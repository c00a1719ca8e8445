#![deny(missing_docs)]

//! # flowguard-service — Governance Wiring and Management Surface
//!
//! Builds every store from one [`GovernanceConfig`] and shares them
//! through `Arc`; nothing is process-global.
//!
//! - [`config`]: [`GovernanceConfig`], YAML plus environment overrides.
//! - [`auth`]: [`AdminGuard`], constant-time admin token check.
//! - [`telemetry`]: `tracing-subscriber` installation.
//! - [`policies`]: [`PolicyService`], policy and rule mutations.
//! - [`maintenance`]: periodic cache and approval-expiry sweeps.
//!
//! [`Governance`] is the facade a workflow executor or a transport adapter
//! holds: evaluation through [`Governance::validate`], everything else
//! through the component accessors.

pub mod auth;
pub mod config;
pub mod maintenance;
pub mod policies;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use flowguard_approval::ApprovalWorkflow;
use flowguard_core::{EvaluationContext, FlowguardError, PolicyStore, PolicyValidationResult};
use flowguard_engine::{ActionSink, EvaluationCache, PolicyValidator, RuleEvaluator};
use flowguard_versioning::{RollbackOrchestrator, VersionStore};

pub use auth::{AdminGuard, SecretToken};
pub use config::{ConfigError, GovernanceConfig};
pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport};
pub use policies::{PolicyService, PolicyUpdate, RuleUpdate};
pub use telemetry::{init_tracing, LogFormat};

/// Every governance component, wired over shared stores.
#[derive(Debug)]
pub struct Governance {
    config: GovernanceConfig,
    store: Arc<PolicyStore>,
    cache: Arc<EvaluationCache>,
    versions: Arc<VersionStore>,
    approvals: Arc<ApprovalWorkflow>,
    validator: PolicyValidator,
    rollbacks: RollbackOrchestrator,
    policies: PolicyService,
    guard: AdminGuard,
}

impl Governance {
    /// Wire every component from `config`, logging actions via tracing.
    pub fn new(config: GovernanceConfig) -> Self {
        let evaluator = RuleEvaluator::new(config.limits.clone());
        Self::with_evaluator(config, evaluator)
    }

    /// Wire every component, dispatching actions to `sink`.
    pub fn with_sink(config: GovernanceConfig, sink: Arc<dyn ActionSink>) -> Self {
        let evaluator = RuleEvaluator::new(config.limits.clone()).with_sink(sink);
        Self::with_evaluator(config, evaluator)
    }

    fn with_evaluator(config: GovernanceConfig, evaluator: RuleEvaluator) -> Self {
        let store = Arc::new(PolicyStore::new());
        let cache = Arc::new(EvaluationCache::new(config.cache.clone()));
        let versions = Arc::new(VersionStore::new(config.versions.clone()));
        let approvals = Arc::new(ApprovalWorkflow::new(config.approvals.clone()));
        let validator = PolicyValidator::new(store.clone(), cache.clone(), evaluator);
        let rollbacks = RollbackOrchestrator::new(store.clone(), versions.clone(), cache.clone());
        let policies = PolicyService::new(
            store.clone(),
            versions.clone(),
            cache.clone(),
            approvals.clone(),
        );
        let guard = AdminGuard::new(config.admin_token.clone());
        if !guard.is_configured() {
            tracing::warn!("no admin token configured; mutating admin calls will be refused");
        }
        Self {
            config,
            store,
            cache,
            versions,
            approvals,
            validator,
            rollbacks,
            policies,
            guard,
        }
    }

    /// Validate a workflow step against every enabled policy.
    pub fn validate(
        &self,
        context: &EvaluationContext,
        command: Option<&str>,
        file_path: Option<&str>,
    ) -> PolicyValidationResult {
        self.validator.validate(context, command, file_path)
    }

    /// Check an admin token before a mutating admin call.
    pub fn authorize_admin(&self, token: Option<&str>) -> Result<(), FlowguardError> {
        self.guard.authorize(token)
    }

    /// A maintenance sweep over this instance's cache and approvals.
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.cache.clone(),
            self.approvals.clone(),
            Duration::from_secs(self.config.maintenance_interval_secs),
        )
    }

    /// Active configuration.
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// The shared policy store.
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// The evaluation cache.
    pub fn cache(&self) -> &Arc<EvaluationCache> {
        &self.cache
    }

    /// The version store.
    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    /// Approvals, change requests and the audit log.
    pub fn approvals(&self) -> &Arc<ApprovalWorkflow> {
        &self.approvals
    }

    /// The read-through validator.
    pub fn validator(&self) -> &PolicyValidator {
        &self.validator
    }

    /// The rollback orchestrator.
    pub fn rollbacks(&self) -> &RollbackOrchestrator {
        &self.rollbacks
    }

    /// Policy and rule mutations.
    pub fn policies(&self) -> &PolicyService {
        &self.policies
    }
}

impl Default for Governance {
    fn default() -> Self {
        Self::new(GovernanceConfig::default())
    }
}
