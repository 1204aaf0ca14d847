//! # Probes and metrics
//!
//! HTTP server for Kubernetes probes and Prometheus scraping:
//! - `/healthz` - liveness, always 200
//! - `/readyz` - 200 once the controller has started watching
//! - `/metrics` - Prometheus text format
//!
//! Metrics exposed:
//! - `etcdadm_bootstrap_reconciliations_total{outcome}`
//! - `etcdadm_bootstrap_secret_writes_total{kind}`
//! - `etcdadm_bootstrap_reconcile_duration_seconds`

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Controller metrics, registered in their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    secret_writes: IntCounterVec,
    reconcile_duration: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "etcdadm_bootstrap_reconciliations_total",
                "Reconciliation passes by outcome",
            ),
            &["outcome"],
        )?;
        let secret_writes = IntCounterVec::new(
            Opts::new(
                "etcdadm_bootstrap_secret_writes_total",
                "Bootstrap data secret writes by kind",
            ),
            &["kind"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "etcdadm_bootstrap_reconcile_duration_seconds",
                "Duration of reconciliation passes in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(secret_writes.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            secret_writes,
            reconcile_duration,
        })
    }

    pub fn record_reconcile(&self, outcome: &str, seconds: f64) {
        self.reconciliations.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(seconds);
    }

    pub fn record_secret_write(&self, kind: &str) {
        self.secret_writes.with_label_values(&[kind]).inc();
    }

    /// Number of passes recorded with the given outcome
    #[cfg(test)]
    pub fn reconciliations(&self, outcome: &str) -> u64 {
        self.reconciliations.with_label_values(&[outcome]).get()
    }

    /// Number of secret writes recorded with the given kind
    #[cfg(test)]
    pub fn secret_writes(&self, kind: &str) -> u64 {
        self.secret_writes.with_label_values(&[kind]).get()
    }

    fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Shared state of the probe/metrics server
#[derive(Debug)]
pub struct ServerState {
    pub metrics: Metrics,
    pub is_ready: AtomicBool,
}

impl ServerState {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            is_ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve probes and metrics until the process exits.
pub async fn serve(addr: SocketAddr, state: Arc<ServerState>) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Probe and metrics server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {e}").into_bytes(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
