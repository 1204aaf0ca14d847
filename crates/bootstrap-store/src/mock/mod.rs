//! Mock object store for unit testing
//!
//! Stores configs and secrets in memory, enforces resource-version checks on
//! secret replaces, cascades secret deletion to owners, and can be told to
//! fail upcoming secret writes to exercise retry paths.

use crate::error::StoreError;
use crate::store_trait::BootstrapStoreTrait;
use crds::{EtcdadmConfig, EtcdadmConfigStatus};
use k8s_openapi::api::core::v1::Secret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String);

/// Number of calls made against the mock, for asserting write behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub config_gets: u32,
    pub status_patches: u32,
    pub secret_gets: u32,
    pub secret_creates: u32,
    pub secret_replaces: u32,
}

#[derive(Debug, Default)]
struct Faults {
    secret_write_conflicts: u32,
    secret_write_unavailable: u32,
}

/// Mock BootstrapStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockBootstrapStore {
    pub(crate) configs: Arc<Mutex<HashMap<ObjectKey, EtcdadmConfig>>>,
    pub(crate) secrets: Arc<Mutex<HashMap<ObjectKey, Secret>>>,
    next_resource_version: Arc<Mutex<u64>>,
    faults: Arc<Mutex<Faults>>,
    calls: Arc<Mutex<CallCounts>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

impl MockBootstrapStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        let mut rv = lock(&self.next_resource_version);
        *rv += 1;
        rv.to_string()
    }

    /// Add or overwrite a config (for test setup). Missing UID and generation are filled in.
    pub fn add_config(&self, mut config: EtcdadmConfig) {
        let namespace = config.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = config.metadata.name.clone().unwrap_or_default();
        config.metadata.namespace = Some(namespace.clone());
        if config.metadata.uid.is_none() {
            config.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if config.metadata.generation.is_none() {
            config.metadata.generation = Some(1);
        }
        config.metadata.resource_version = Some(self.next_resource_version());
        lock(&self.configs).insert(key(&namespace, &name), config);
    }

    /// Apply a spec edit the way the API server would: bump the generation.
    pub fn edit_config_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut crds::EtcdadmConfigSpec)) {
        let rv = self.next_resource_version();
        let mut configs = lock(&self.configs);
        if let Some(config) = configs.get_mut(&key(namespace, name)) {
            edit(&mut config.spec);
            config.metadata.generation = Some(config.metadata.generation.unwrap_or(0) + 1);
            config.metadata.resource_version = Some(rv);
        }
    }

    /// Edit metadata only (labels, annotations); the generation is unchanged.
    pub fn edit_config_metadata(
        &self,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta),
    ) {
        let rv = self.next_resource_version();
        let mut configs = lock(&self.configs);
        if let Some(config) = configs.get_mut(&key(namespace, name)) {
            edit(&mut config.metadata);
            config.metadata.resource_version = Some(rv);
        }
    }

    /// Delete a config and, like the garbage collector, every secret it owns.
    pub fn delete_config(&self, namespace: &str, name: &str) {
        let removed = lock(&self.configs).remove(&key(namespace, name));
        let Some(uid) = removed.and_then(|c| c.metadata.uid) else {
            return;
        };
        lock(&self.secrets).retain(|_, secret| {
            !secret
                .metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
        });
    }

    pub fn config(&self, namespace: &str, name: &str) -> Option<EtcdadmConfig> {
        lock(&self.configs).get(&key(namespace, name)).cloned()
    }

    /// Add or overwrite a secret (for test setup)
    pub fn add_secret(&self, mut secret: Secret) {
        let namespace = secret.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = secret.metadata.name.clone().unwrap_or_default();
        secret.metadata.namespace = Some(namespace.clone());
        secret.metadata.resource_version = Some(self.next_resource_version());
        lock(&self.secrets).insert(key(&namespace, &name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.secrets).get(&key(namespace, name)).cloned()
    }

    /// All secrets in a namespace, ordered by name
    pub fn secrets_in(&self, namespace: &str) -> Vec<Secret> {
        let mut secrets: Vec<Secret> = lock(&self.secrets)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect();
        secrets.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        secrets
    }

    /// Make the next `count` secret writes fail with a conflict, as if another
    /// writer modified the secret concurrently.
    pub fn fail_secret_writes_with_conflict(&self, count: u32) {
        lock(&self.faults).secret_write_conflicts = count;
    }

    /// Make the next `count` secret writes fail as if the API server were down.
    pub fn fail_secret_writes_unavailable(&self, count: u32) {
        lock(&self.faults).secret_write_unavailable = count;
    }

    pub fn calls(&self) -> CallCounts {
        *lock(&self.calls)
    }

    /// Consume one injected fault, if any is pending.
    fn take_secret_write_fault(&self, namespace: &str, name: &str) -> Option<StoreError> {
        let mut faults = lock(&self.faults);
        if faults.secret_write_unavailable > 0 {
            faults.secret_write_unavailable -= 1;
            return Some(StoreError::Unavailable("injected: connection refused".to_string()));
        }
        if faults.secret_write_conflicts > 0 {
            faults.secret_write_conflicts -= 1;
            drop(faults);
            // The concurrent writer bumps the stored version, so a retry must re-read.
            let rv = self.next_resource_version();
            if let Some(stored) = lock(&self.secrets).get_mut(&key(namespace, name)) {
                stored.metadata.resource_version = Some(rv);
            }
            return Some(StoreError::Conflict(format!(
                "injected: the object {namespace}/{name} has been modified"
            )));
        }
        None
    }
}

#[async_trait::async_trait]
impl BootstrapStoreTrait for MockBootstrapStore {
    async fn get_config(&self, namespace: &str, name: &str) -> Result<EtcdadmConfig, StoreError> {
        lock(&self.calls).config_gets += 1;
        self.config(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("etcdadmconfigs {namespace}/{name}")))
    }

    async fn patch_config_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EtcdadmConfigStatus,
    ) -> Result<(), StoreError> {
        lock(&self.calls).status_patches += 1;
        let rv = self.next_resource_version();
        let mut configs = lock(&self.configs);
        let config = configs
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("etcdadmconfigs {namespace}/{name}")))?;
        config.status = Some(status.clone());
        config.metadata.resource_version = Some(rv);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        lock(&self.calls).secret_gets += 1;
        self.secret(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("secrets {namespace}/{name}")))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        if let Some(err) = self.take_secret_write_fault(namespace, &name) {
            return Err(err);
        }
        lock(&self.calls).secret_creates += 1;

        let mut created = secret.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(self.next_resource_version());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());

        let mut secrets = lock(&self.secrets);
        if secrets.contains_key(&key(namespace, &name)) {
            return Err(StoreError::AlreadyExists(format!("secrets {namespace}/{name}")));
        }
        secrets.insert(key(namespace, &name), created.clone());
        Ok(created)
    }

    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, StoreError> {
        if let Some(err) = self.take_secret_write_fault(namespace, name) {
            return Err(err);
        }
        lock(&self.calls).secret_replaces += 1;

        let rv = self.next_resource_version();
        let mut secrets = lock(&self.secrets);
        let stored = secrets
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("secrets {namespace}/{name}")))?;
        if secret.metadata.resource_version.is_some()
            && secret.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "the object {namespace}/{name} has been modified; please apply your changes to the latest version"
            )));
        }
        let mut replaced = secret.clone();
        replaced.metadata.uid = stored.metadata.uid.clone();
        replaced.metadata.resource_version = Some(rv);
        *stored = replaced.clone();
        Ok(replaced)
    }
}
