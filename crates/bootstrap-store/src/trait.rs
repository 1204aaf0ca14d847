//! BootstrapStoreTrait for mocking
//!
//! This trait abstracts the object store the controller reads configs from and
//! writes bootstrap data secrets to. The Kubernetes-backed store implements it,
//! and tests use the in-memory mock.

use crate::error::StoreError;
use crds::{EtcdadmConfig, EtcdadmConfigStatus};
use k8s_openapi::api::core::v1::Secret;

/// Object store operations needed by the bootstrap reconciler
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait BootstrapStoreTrait: Send + Sync {
    /// Fetch the current state of a config.
    async fn get_config(&self, namespace: &str, name: &str) -> Result<EtcdadmConfig, StoreError>;

    /// Write the status subresource of a config.
    async fn patch_config_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EtcdadmConfigStatus,
    ) -> Result<(), StoreError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Create a secret; fails with `AlreadyExists` if the name is taken.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace a secret. `secret.metadata.resource_version` must match the
    /// stored version, otherwise the write fails with `Conflict`.
    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, StoreError>;
}
