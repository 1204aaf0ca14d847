//! Kubernetes resource watchers.
//!
//! Drives the reconciler from a `kube_runtime::Controller` over EtcdadmConfig
//! resources. Secrets trigger a reconcile of:
//! - the config that owns them (data secrets, via `owns`)
//! - every config in the same namespace that references them, or whose data
//!   secret name they occupy (via `watches`)

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::EtcdadmConfig;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::Config as ControllerConfig, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Configs to reconcile when `secret` changes.
pub fn configs_for_secret(configs: &[Arc<EtcdadmConfig>], secret: &Secret) -> Vec<ObjectRef<EtcdadmConfig>> {
    let namespace = secret.namespace();
    let name = secret.name_any();
    configs
        .iter()
        .filter(|config| config.namespace() == namespace)
        .filter(|config| config.name_any() == name || config.spec.referenced_secret_names().contains(&name))
        .map(|config| ObjectRef::from_obj(config.as_ref()))
        .collect()
}

/// Watches EtcdadmConfigs and the secrets around them.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    config_api: Api<EtcdadmConfig>,
    secret_api: Api<Secret>,
    concurrency: u16,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("concurrency", &self.concurrency).finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        config_api: Api<EtcdadmConfig>,
        secret_api: Api<Secret>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            config_api,
            secret_api,
            concurrency,
        }
    }

    /// Run until the watch streams end.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Starting EtcdadmConfig watcher (concurrency {})", self.concurrency);

        let error_policy = |obj: Arc<EtcdadmConfig>, error: &ControllerError, ctx: Arc<Reconciler>| {
            ctx.error_action(&obj, error)
        };

        let reconcile = |obj: Arc<EtcdadmConfig>, ctx: Arc<Reconciler>| async move {
            debug!("Reconciling EtcdadmConfig {}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
            ctx.reconcile(&obj).await
        };

        // Debounce batches bursts of events (e.g. our own status write plus
        // the owned secret update) into a single pass.
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(self.concurrency);

        let controller = Controller::new(self.config_api, watcher::Config::default());
        let configs = controller.store();

        controller
            .with_config(controller_config)
            .owns(self.secret_api.clone(), watcher::Config::default())
            .watches(self.secret_api, watcher::Config::default(), move |secret: Secret| {
                configs_for_secret(&configs.state(), &secret)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled {}", obj),
                    Err(e) => error!("Controller error for EtcdadmConfig: {}", e),
                }
            })
            .await;

        info!("EtcdadmConfig watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{File, FileSource, SecretKeySelector};

    fn config(name: &str, namespace: &str, referenced: Option<&str>) -> Arc<EtcdadmConfig> {
        let mut spec = builtin_cloud_config_spec();
        if let Some(secret) = referenced {
            spec.files.push(File {
                path: "/etc/x".to_string(),
                content_from: Some(FileSource {
                    secret: SecretKeySelector { name: secret.to_string(), key: "k".to_string() },
                }),
                ..Default::default()
            });
        }
        Arc::new(create_test_config(name, namespace, spec))
    }

    fn names(refs: &[ObjectRef<EtcdadmConfig>]) -> Vec<String> {
        let mut names: Vec<String> = refs.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_referencing_configs_are_mapped() {
        let configs = vec![
            config("a", "default", Some("shared-ca")),
            config("b", "default", Some("shared-ca")),
            config("c", "default", None),
            config("d", "other", Some("shared-ca")),
        ];
        let secret = create_test_secret("shared-ca", "default", &[]);
        assert_eq!(names(&configs_for_secret(&configs, &secret)), vec!["a", "b"]);
    }

    #[test]
    fn test_secret_with_data_secret_name_is_mapped() {
        let configs = vec![config("etcd-0", "default", None)];
        let secret = create_test_secret("etcd-0", "default", &[]);
        assert_eq!(names(&configs_for_secret(&configs, &secret)), vec!["etcd-0"]);
    }

    #[test]
    fn test_unrelated_secret_maps_to_nothing() {
        let configs = vec![config("etcd-0", "default", Some("ca"))];
        let secret = create_test_secret("registry-creds", "default", &[]);
        assert!(configs_for_secret(&configs, &secret).is_empty());
    }
}
