//! Reconciliation of EtcdadmConfig resources.
//!
//! One pass walks Validating → Rendering → Materializing and ends with a
//! single status write computed by the condition manager:
//!
//! - Validating: refetch the config and resolve the secrets it references
//! - Rendering: validate, fingerprint, and render only when the fingerprint
//!   differs from the one recorded on the data secret
//! - Materializing: write the data secret, retrying conflicts and
//!   unavailability with bounded exponential backoff
//!
//! Configs whose passes keep failing are requeued with a per-resource backoff.

#[cfg(test)]
mod reconciler_test;

use crate::backoff::ExponentialBackoff;
use crate::conditions::{Observation, Outcome, reconcile_conditions};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::fingerprint::fingerprint;
use crate::materializer::{self, Artifact, WriteKind};
use crate::metrics::Metrics;
use crate::render;
use crate::resolve::resolve_references;
use bootstrap_store::BootstrapStoreTrait;
use chrono::Utc;
use crds::{EtcdadmConfig, INVALID_CONFIGURATION_REASON, MISSING_REFERENCE_REASON};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tunables for reconciliation passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub reconcile_timeout: Duration,
    pub persist_max_attempts: u32,
    pub persist_backoff_min: Duration,
    pub persist_backoff_max: Duration,
    pub missing_reference_resync: Duration,
    pub error_backoff_min: Duration,
    pub error_backoff_max: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ReconcilerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            reconcile_timeout: config.reconcile_timeout,
            persist_max_attempts: config.persist_max_attempts,
            persist_backoff_min: Duration::from_millis(200),
            persist_backoff_max: Duration::from_secs(5),
            missing_reference_resync: config.missing_reference_resync,
            error_backoff_min: Duration::from_secs(5),
            error_backoff_max: Duration::from_secs(300),
        }
    }
}

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Bootstrap data is published for the current spec
    Ready,
    InvalidConfiguration,
    MissingReference,
    /// A secret with the data secret's name belongs to someone else
    OwnershipConflict,
    /// The config disappeared or is being deleted
    Gone,
}

impl PassOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PassOutcome::Ready => "ready",
            PassOutcome::InvalidConfiguration => "invalid_configuration",
            PassOutcome::MissingReference => "missing_reference",
            PassOutcome::OwnershipConflict => "ownership_conflict",
            PassOutcome::Gone => "gone",
        }
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(settings: &ReconcilerSettings) -> Self {
        Self {
            backoff: ExponentialBackoff::new(settings.error_backoff_min, settings.error_backoff_max),
            error_count: 0,
        }
    }
}

/// Reconciles EtcdadmConfig resources into bootstrap data secrets.
pub struct Reconciler {
    pub(crate) store: Box<dyn BootstrapStoreTrait + Send + Sync>,
    pub(crate) metrics: Metrics,
    settings: ReconcilerSettings,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("settings", &self.settings).finish_non_exhaustive()
    }
}

fn resource_key(config: &EtcdadmConfig) -> String {
    format!("{}/{}", config.namespace().unwrap_or_default(), config.name_any())
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: impl BootstrapStoreTrait + Send + Sync + 'static,
        metrics: Metrics,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store: Box::new(store),
            metrics,
            settings,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Run one bounded reconciliation pass for `config`.
    pub async fn reconcile(&self, config: &EtcdadmConfig) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();
        let started = Instant::now();

        let result = match tokio::time::timeout(
            self.settings.reconcile_timeout,
            self.reconcile_pass(&namespace, &name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Timeout(self.settings.reconcile_timeout)),
        };

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(outcome) => {
                self.metrics.record_reconcile(outcome.as_str(), elapsed);
                self.reset_backoff(config);
                debug!("Reconciled EtcdadmConfig {}/{}: {}", namespace, name, outcome.as_str());
                Ok(match outcome {
                    PassOutcome::MissingReference => Action::requeue(self.settings.missing_reference_resync),
                    _ => Action::await_change(),
                })
            }
            Err(e) => {
                self.metrics.record_reconcile(e.kind(), elapsed);
                Err(e)
            }
        }
    }

    /// Requeue delay for a config whose last pass failed.
    pub fn error_action(&self, config: &EtcdadmConfig, error: &ControllerError) -> Action {
        let key = resource_key(config);
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(key.clone()).or_insert_with(|| BackoffState::new(&self.settings));
        state.error_count += 1;
        let delay = state.backoff.next_backoff();
        error!(
            "Reconciliation of EtcdadmConfig {} failed ({} consecutive): {}; retrying in {:?}",
            key, state.error_count, error, delay
        );
        Action::requeue(delay)
    }

    fn reset_backoff(&self, config: &EtcdadmConfig) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = states.get_mut(&resource_key(config)) {
            if state.error_count > 0 {
                debug!("Resetting backoff for {} after {} error(s)", resource_key(config), state.error_count);
            }
            state.error_count = 0;
            state.backoff.reset();
        }
    }

    async fn reconcile_pass(&self, namespace: &str, name: &str) -> Result<PassOutcome, ControllerError> {
        // Validating
        let config = match self.store.get_config(namespace, name).await {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                debug!("EtcdadmConfig {}/{} no longer exists", namespace, name);
                return Ok(PassOutcome::Gone);
            }
            Err(e) => return Err(e.into()),
        };
        if config.metadata.deletion_timestamp.is_some() {
            debug!("EtcdadmConfig {}/{} is being deleted", namespace, name);
            return Ok(PassOutcome::Gone);
        }
        let generation = config.metadata.generation;

        let resolved = match resolve_references(self.store.as_ref(), namespace, &config.spec).await {
            Ok(resolved) => resolved,
            Err(ControllerError::MissingReference(message)) => {
                warn!("EtcdadmConfig {}/{} is waiting for a reference: {}", namespace, name, message);
                let outcome = Outcome::RenderFailed { reason: MISSING_REFERENCE_REASON, message };
                return self.finish(&config, outcome, PassOutcome::MissingReference).await;
            }
            Err(ControllerError::Render(e)) => {
                return self.invalid(&config, e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        // Rendering
        if let Err(e) = render::validate(&config.spec) {
            return self.invalid(&config, e.to_string()).await;
        }
        let format = config.spec.format;
        let fingerprint = match fingerprint(&config.spec, &resolved, format) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return self.invalid(&config, e.to_string()).await,
        };

        let current = materializer::fetch_current(self.store.as_ref(), &config).await?;
        let secret_name = materializer::data_secret_name(&config);
        if let Some(secret) = current.as_ref() {
            if !materializer::is_controlled_by(secret, &config) {
                return self.ownership_conflict(&config, namespace, &secret_name).await;
            }
            if materializer::recorded_fingerprint(secret) == Some(fingerprint.as_str()) {
                debug!("Bootstrap data for {}/{} is up to date ({})", namespace, name, fingerprint);
                let outcome = Outcome::Published { secret_name };
                return self.finish(&config, outcome, PassOutcome::Ready).await;
            }
        }

        let payload = match render::render(&config.spec, &resolved) {
            Ok(payload) => payload,
            Err(e) => return self.invalid(&config, e.to_string()).await,
        };
        let artifact = Artifact { payload, format, fingerprint };
        debug!("Rendered {:?} for EtcdadmConfig {}/{} (generation {:?})", artifact, namespace, name, generation);

        // Materializing
        match self.materialize(&config, &artifact, current).await {
            Ok(kind) => {
                if kind != WriteKind::Unchanged {
                    self.metrics.record_secret_write(kind.as_str());
                }
                let outcome = Outcome::Published { secret_name };
                self.finish(&config, outcome, PassOutcome::Ready).await
            }
            Err(ControllerError::OwnershipConflict(_)) => {
                self.ownership_conflict(&config, namespace, &secret_name).await
            }
            Err(e) => {
                let outcome = Outcome::PersistFailed { message: e.to_string() };
                self.write_status(&config, outcome).await?;
                Err(e)
            }
        }
    }

    /// Write the data secret, retrying transient store errors.
    async fn materialize(
        &self,
        config: &EtcdadmConfig,
        artifact: &Artifact,
        current: Option<Secret>,
    ) -> Result<WriteKind, ControllerError> {
        let max_attempts = self.settings.persist_max_attempts.max(1);
        let mut backoff = ExponentialBackoff::new(self.settings.persist_backoff_min, self.settings.persist_backoff_max);
        let mut prefetched = Some(current);
        let mut attempt = 1;

        loop {
            let result = match prefetched.take() {
                Some(current) => materializer::write(self.store.as_ref(), config, artifact, current.as_ref()).await,
                None => match materializer::fetch_current(self.store.as_ref(), config).await {
                    Ok(current) => materializer::write(self.store.as_ref(), config, artifact, current.as_ref()).await,
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(kind) => return Ok(kind),
                Err(ControllerError::Store(e)) if e.is_transient() || e.is_not_found() => {
                    if attempt >= max_attempts {
                        return Err(ControllerError::PersistFailed { attempts: attempt, source: e });
                    }
                    let delay = backoff.next_backoff();
                    warn!(
                        "Writing bootstrap data for {} failed (attempt {}/{}): {}; retrying in {:?}",
                        resource_key(config),
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn invalid(&self, config: &EtcdadmConfig, message: String) -> Result<PassOutcome, ControllerError> {
        warn!("EtcdadmConfig {} is invalid: {}", resource_key(config), message);
        let outcome = Outcome::RenderFailed { reason: INVALID_CONFIGURATION_REASON, message };
        self.finish(config, outcome, PassOutcome::InvalidConfiguration).await
    }

    async fn ownership_conflict(
        &self,
        config: &EtcdadmConfig,
        namespace: &str,
        secret_name: &str,
    ) -> Result<PassOutcome, ControllerError> {
        let err = ControllerError::OwnershipConflict(format!("{namespace}/{secret_name}"));
        error!("{}", err);
        let outcome = Outcome::OwnershipConflict { message: err.to_string() };
        self.finish(config, outcome, PassOutcome::OwnershipConflict).await
    }

    async fn finish(
        &self,
        config: &EtcdadmConfig,
        outcome: Outcome,
        pass: PassOutcome,
    ) -> Result<PassOutcome, ControllerError> {
        if self.write_status(config, outcome).await? {
            Ok(pass)
        } else {
            Ok(PassOutcome::Gone)
        }
    }

    /// Fold `outcome` into the config's status and write it if it changed.
    ///
    /// Returns `false` when the config was deleted underneath the pass.
    async fn write_status(&self, config: &EtcdadmConfig, outcome: Outcome) -> Result<bool, ControllerError> {
        let observation = Observation { generation: config.metadata.generation, outcome };
        let next = reconcile_conditions(config.status.as_ref(), &observation, Utc::now());
        if config.status.as_ref() == Some(&next) {
            debug!("EtcdadmConfig {} status unchanged", resource_key(config));
            return Ok(true);
        }

        let namespace = config.namespace().unwrap_or_default();
        match self.store.patch_config_status(&namespace, &config.name_any(), &next).await {
            Ok(()) => {
                info!(
                    "EtcdadmConfig {} status: ready={} dataSecretName={:?}",
                    resource_key(config),
                    next.ready,
                    next.data_secret_name
                );
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!("EtcdadmConfig {} deleted before its status was written", resource_key(config));
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
