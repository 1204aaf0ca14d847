//! etcdadm bootstrap controller
//!
//! Watches EtcdadmConfig resources and publishes the cloud-config or
//! Bottlerocket bootstrap data each one renders to in an owned Secret, so
//! that the machine controller can hand it to a new etcd node.

mod backoff;
mod conditions;
mod config;
mod controller;
mod error;
mod fingerprint;
mod materializer;
mod metrics;
mod reconciler;
mod render;
mod resolve;
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting etcdadm bootstrap controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Reconcile timeout: {:?}", config.reconcile_timeout);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
