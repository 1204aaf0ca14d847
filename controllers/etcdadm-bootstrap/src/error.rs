//! Controller-specific error types.
//!
//! `RenderError` covers problems with the spec itself; `ControllerError` is
//! what a reconciliation pass returns to the runtime.

use bootstrap_store::StoreError;
use thiserror::Error;

/// The spec cannot be rendered in its requested format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("{0}")]
    InvalidConfiguration(String),
}

/// Errors that can occur in the etcdadm bootstrap controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client setup error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The spec fails validation for its format
    #[error("Invalid configuration: {0}")]
    Render(#[from] RenderError),

    /// A secret referenced by the spec does not exist or lacks the key
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// Writing the data secret kept failing after all retries
    #[error("Persisting bootstrap data failed after {attempts} attempts: {source}")]
    PersistFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// A secret with the data secret's name exists but belongs to someone else
    #[error("Secret {0} exists and is not controlled by this EtcdadmConfig")]
    OwnershipConflict(String),

    /// The reconciliation pass exceeded its deadline
    #[error("Reconciliation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid process configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe/metrics server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// The watcher or server task panicked or was cancelled
    #[error("Watch error: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Short label used for the outcome metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Store(_) | ControllerError::Kube(_) => "store_error",
            ControllerError::Render(_) => "invalid_configuration",
            ControllerError::MissingReference(_) => "missing_reference",
            ControllerError::PersistFailed { .. } => "persist_failed",
            ControllerError::OwnershipConflict(_) => "ownership_conflict",
            ControllerError::Timeout(_) => "timeout",
            ControllerError::InvalidConfig(_)
            | ControllerError::Metrics(_)
            | ControllerError::Server(_)
            | ControllerError::Watch(_) => "internal",
        }
    }
}
