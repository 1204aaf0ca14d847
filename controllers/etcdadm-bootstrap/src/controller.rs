//! Main controller implementation.
//!
//! Builds everything from the process configuration once at startup (store,
//! metrics, reconciler, watcher) and runs the watcher next to the
//! probe/metrics server.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics, ServerState};
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::watcher::Watcher;
use bootstrap_store::KubeBootstrapStore;
use crds::EtcdadmConfig;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for EtcdadmConfig bootstrap data.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing etcdadm bootstrap controller");

        let client = Client::try_default().await?;
        let (config_api, secret_api): (Api<EtcdadmConfig>, Api<Secret>) = match config.namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

        let metrics = Metrics::new()?;
        let state = Arc::new(ServerState::new(metrics.clone()));
        let reconciler = Arc::new(Reconciler::new(
            KubeBootstrapStore::new(client),
            metrics,
            ReconcilerSettings::from(&config),
        ));

        let server = tokio::spawn(metrics::serve(config.metrics_addr, Arc::clone(&state)));
        let watcher = Watcher::new(reconciler, config_api, secret_api, config.concurrency);
        let watcher = tokio::spawn(watcher.run());
        state.set_ready();

        Ok(Self { watcher, server })
    }

    /// Runs until the watcher stops (on SIGTERM/SIGINT) or the server fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self { watcher, server } = self;
        tokio::select! {
            result = watcher => {
                let result = result.map_err(|e| ControllerError::Watch(e.to_string()))?;
                info!("Watcher finished");
                result
            }
            result = server => {
                let result = result.map_err(|e| ControllerError::Watch(e.to_string()))?;
                if let Err(e) = &result {
                    error!("Probe and metrics server failed: {}", e);
                }
                result
            }
        }
    }
}
