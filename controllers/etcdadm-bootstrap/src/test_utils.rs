//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::reconciler::{Reconciler, ReconcilerSettings};
#[cfg(test)]
use bootstrap_store::MockBootstrapStore;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::ByteString;
#[cfg(test)]
use k8s_openapi::api::core::v1::Secret;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::time::Duration;

/// cloud-config spec with etcdadm built into the image
#[cfg(test)]
pub fn builtin_cloud_config_spec() -> EtcdadmConfigSpec {
    EtcdadmConfigSpec {
        format: Format::CloudConfig,
        etcdadm_builtin: true,
        ..Default::default()
    }
}

/// Minimal valid bottlerocket spec
#[cfg(test)]
pub fn bottlerocket_spec() -> EtcdadmConfigSpec {
    EtcdadmConfigSpec {
        format: Format::Bottlerocket,
        bottlerocket_config: Some(BottlerocketConfig {
            etcd_image: "public.ecr.aws/eks-distro/etcd:v3.5.9".to_string(),
            bootstrap_image: "public.ecr.aws/bottlerocket/bootstrap:v0.1".to_string(),
            pause_image: "public.ecr.aws/eks-distro/pause:3.9".to_string(),
        }),
        ..Default::default()
    }
}

/// Helper to create test EtcdadmConfig CRD
#[cfg(test)]
pub fn create_test_config(name: &str, namespace: &str, spec: EtcdadmConfigSpec) -> EtcdadmConfig {
    EtcdadmConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Helper to create a test Secret with the given data
#[cfg(test)]
pub fn create_test_secret(name: &str, namespace: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

/// Settings with millisecond backoffs so retry tests stay fast
#[cfg(test)]
pub fn fast_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        reconcile_timeout: Duration::from_secs(5),
        persist_max_attempts: 5,
        persist_backoff_min: Duration::from_millis(1),
        persist_backoff_max: Duration::from_millis(4),
        missing_reference_resync: Duration::from_secs(300),
        error_backoff_min: Duration::from_secs(5),
        error_backoff_max: Duration::from_secs(300),
    }
}

/// Helper to create a reconciler backed by the given mock store
#[cfg(test)]
pub fn create_test_reconciler(store: &MockBootstrapStore, settings: ReconcilerSettings) -> Reconciler {
    Reconciler::new(store.clone(), Metrics::new().unwrap(), settings)
}
