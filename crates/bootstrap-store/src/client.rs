//! Kubernetes-backed object store

use crate::error::StoreError;
use crate::store_trait::BootstrapStoreTrait;
use crds::{EtcdadmConfig, EtcdadmConfigStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Field manager recorded on writes made by the controller
pub const FIELD_MANAGER: &str = "etcdadm-bootstrap-controller";

/// Object store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeBootstrapStore {
    client: Client,
}

impl std::fmt::Debug for KubeBootstrapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBootstrapStore").finish_non_exhaustive()
    }
}

impl KubeBootstrapStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn configs(&self, namespace: &str) -> Api<EtcdadmConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl BootstrapStoreTrait for KubeBootstrapStore {
    async fn get_config(&self, namespace: &str, name: &str) -> Result<EtcdadmConfig, StoreError> {
        Ok(self.configs(namespace).get(name).await?)
    }

    async fn patch_config_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EtcdadmConfigStatus,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "status": status });
        self.configs(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Patched EtcdadmConfig {}/{} status", namespace, name);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        Ok(self.secrets(namespace).get(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        Ok(self.secrets(namespace).create(&Self::post_params(), secret).await?)
    }

    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, StoreError> {
        Ok(self.secrets(namespace).replace(name, &Self::post_params(), secret).await?)
    }
}
