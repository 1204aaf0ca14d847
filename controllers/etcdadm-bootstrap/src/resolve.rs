//! Secondary reference resolution.
//!
//! Reads the secrets named by `files[].contentFrom` and, for formats that
//! render passwords, `users[].passwdFrom`, so that rendering stays a pure
//! function of the spec plus these values.

use crate::error::{ControllerError, RenderError};
use bootstrap_store::BootstrapStoreTrait;
use crds::{EtcdadmConfigSpec, SecretKeySelector};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Values read from referenced secrets, keyed by secret name then data key.
///
/// `Debug` prints keys only; the values are secret material.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedReferences {
    values: BTreeMap<String, BTreeMap<String, String>>,
}

impl std::fmt::Debug for ResolvedReferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .values
            .iter()
            .flat_map(|(secret, keys)| keys.keys().map(move |key| format!("{secret}/{key}")))
            .collect();
        f.debug_struct("ResolvedReferences").field("keys", &keys).finish()
    }
}

impl ResolvedReferences {
    pub fn insert(&mut self, secret: &str, key: &str, value: String) {
        self.values
            .entry(secret.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, selector: &SecretKeySelector) -> Option<&str> {
        self.values
            .get(&selector.name)
            .and_then(|keys| keys.get(&selector.key))
            .map(String::as_str)
    }
}

fn selectors(spec: &EtcdadmConfigSpec) -> Vec<&SecretKeySelector> {
    let files = spec.files.iter().filter_map(|f| f.content_from.as_ref()).map(|s| &s.secret);
    let users = spec
        .users
        .iter()
        .filter(|_| spec.renders_passwords())
        .filter_map(|u| u.passwd_from.as_ref())
        .map(|s| &s.secret);
    files.chain(users).collect()
}

/// Fetch every secret key the spec references.
///
/// A missing secret or key yields `MissingReference`; a value that is not
/// UTF-8 text yields `InvalidConfiguration`.
pub async fn resolve_references(
    store: &dyn BootstrapStoreTrait,
    namespace: &str,
    spec: &EtcdadmConfigSpec,
) -> Result<ResolvedReferences, ControllerError> {
    let mut resolved = ResolvedReferences::default();
    let mut fetched = BTreeMap::new();

    for selector in selectors(spec) {
        if resolved.get(selector).is_some() {
            continue;
        }
        if !fetched.contains_key(&selector.name) {
            let secret = match store.get_secret(namespace, &selector.name).await {
                Ok(secret) => secret,
                Err(e) if e.is_not_found() => {
                    return Err(ControllerError::MissingReference(format!(
                        "secret {namespace}/{} not found",
                        selector.name
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            fetched.insert(selector.name.clone(), secret);
        }

        let bytes = fetched
            .get(&selector.name)
            .and_then(|secret| secret.data.as_ref())
            .and_then(|data| data.get(&selector.key))
            .ok_or_else(|| {
                ControllerError::MissingReference(format!(
                    "secret {namespace}/{} has no key {:?}",
                    selector.name, selector.key
                ))
            })?;
        let value = String::from_utf8(bytes.0.clone()).map_err(|_| {
            RenderError::InvalidConfiguration(format!(
                "secret {namespace}/{} key {:?} is not valid UTF-8",
                selector.name, selector.key
            ))
        })?;
        resolved.insert(&selector.name, &selector.key, value);
    }

    debug!("Resolved {} referenced secret(s) in {}", fetched.len(), namespace);
    Ok(resolved)
}
