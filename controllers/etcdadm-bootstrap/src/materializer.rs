//! Secret materialization.
//!
//! The only writer of data secrets. A data secret is named after its config,
//! controlled by it, and carries the fingerprint of its payload in an
//! annotation so unchanged data is never rewritten.

use crate::error::ControllerError;
use bootstrap_store::BootstrapStoreTrait;
use crds::{
    BOOTSTRAP_SECRET_TYPE, CLUSTER_NAME_LABEL, DATA_FINGERPRINT_ANNOTATION, DATA_SECRET_FORMAT_KEY,
    DATA_SECRET_VALUE_KEY, EtcdadmConfig, Format,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::core::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Rendered bootstrap data ready to be stored
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub payload: Vec<u8>,
    pub format: Format,
    pub fingerprint: String,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("payload_len", &self.payload.len())
            .field("format", &self.format)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// What a write did to the data secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Updated,
    Unchanged,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Created => "create",
            WriteKind::Updated => "update",
            WriteKind::Unchanged => "none",
        }
    }
}

/// Name of the data secret for a config; fixed for the config's lifetime.
pub fn data_secret_name(owner: &EtcdadmConfig) -> String {
    owner.name_any()
}

/// Fingerprint recorded on an existing data secret.
pub fn recorded_fingerprint(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DATA_FINGERPRINT_ANNOTATION))
        .map(String::as_str)
}

/// Whether `secret` has a controller owner reference pointing at `owner`.
pub fn is_controlled_by(secret: &Secret, owner: &EtcdadmConfig) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    secret
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid && r.controller == Some(true)))
}

/// The existing data secret, if any.
pub async fn fetch_current(
    store: &dyn BootstrapStoreTrait,
    owner: &EtcdadmConfig,
) -> Result<Option<Secret>, ControllerError> {
    let namespace = owner.namespace().unwrap_or_default();
    match store.get_secret(&namespace, &data_secret_name(owner)).await {
        Ok(secret) => Ok(Some(secret)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn secret_data(artifact: &Artifact) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (DATA_SECRET_VALUE_KEY.to_string(), ByteString(artifact.payload.clone())),
        (
            DATA_SECRET_FORMAT_KEY.to_string(),
            ByteString(artifact.format.as_str().as_bytes().to_vec()),
        ),
    ])
}

/// Build a new data secret for `owner` holding `artifact`.
pub fn build_secret(owner: &EtcdadmConfig, artifact: &Artifact) -> Result<Secret, ControllerError> {
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidConfig(format!("EtcdadmConfig {} has no UID yet", owner.name_any()))
    })?;
    let labels = owner
        .labels()
        .get(CLUSTER_NAME_LABEL)
        .map(|cluster| BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.clone())]));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(data_secret_name(owner)),
            namespace: owner.namespace(),
            labels,
            annotations: Some(BTreeMap::from([(
                DATA_FINGERPRINT_ANNOTATION.to_string(),
                artifact.fingerprint.clone(),
            )])),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        type_: Some(BOOTSTRAP_SECRET_TYPE.to_string()),
        data: Some(secret_data(artifact)),
        ..Default::default()
    })
}

/// Make the data secret hold `artifact`, given the last read of it.
///
/// Creates the secret when `current` is `None`, replaces it (guarded by its
/// resourceVersion) when the recorded fingerprint differs, and does nothing
/// otherwise. A secret that is not controlled by `owner` is never touched.
pub async fn write(
    store: &dyn BootstrapStoreTrait,
    owner: &EtcdadmConfig,
    artifact: &Artifact,
    current: Option<&Secret>,
) -> Result<WriteKind, ControllerError> {
    let namespace = owner.namespace().unwrap_or_default();
    let name = data_secret_name(owner);

    let Some(current) = current else {
        let secret = build_secret(owner, artifact)?;
        store.create_secret(&namespace, &secret).await?;
        info!(
            "Created bootstrap data secret {}/{} ({}, {})",
            namespace, name, artifact.format, artifact.fingerprint
        );
        return Ok(WriteKind::Created);
    };

    if !is_controlled_by(current, owner) {
        return Err(ControllerError::OwnershipConflict(format!("{namespace}/{name}")));
    }
    if recorded_fingerprint(current) == Some(artifact.fingerprint.as_str()) {
        debug!("Secret {}/{} already holds {}", namespace, name, artifact.fingerprint);
        return Ok(WriteKind::Unchanged);
    }

    let mut updated = current.clone();
    updated
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(DATA_FINGERPRINT_ANNOTATION.to_string(), artifact.fingerprint.clone());
    updated.data = Some(secret_data(artifact));
    updated.string_data = None;
    store.replace_secret(&namespace, &name, &updated).await?;
    info!(
        "Updated bootstrap data secret {}/{} ({}, {})",
        namespace, name, artifact.format, artifact.fingerprint
    );
    Ok(WriteKind::Updated)
}
