//! Artifact fingerprints.
//!
//! A fingerprint identifies the bootstrap data a spec renders to without
//! rendering it. It covers every render-relevant spec field, the values read
//! from referenced secrets, the output format and a schema version that is
//! bumped whenever the renderer's output changes for the same input.

use crate::error::RenderError;
use crate::resolve::ResolvedReferences;
use crds::{EtcdadmConfigSpec, Format, User};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Bump when rendered output changes for an unchanged spec
const RENDER_SCHEMA_VERSION: &str = "v1";

#[derive(Serialize)]
struct FingerprintInput<'a> {
    schema: &'static str,
    format: Format,
    spec: &'a EtcdadmConfigSpec,
    resolved: &'a ResolvedReferences,
}

/// The spec with fields the format never reads cleared out.
fn render_relevant(spec: &EtcdadmConfigSpec, format: Format) -> EtcdadmConfigSpec {
    let mut relevant = spec.clone();
    relevant.format = format;
    match format {
        Format::CloudConfig => {
            relevant.bottlerocket_config = None;
            if relevant.etcdadm_builtin {
                relevant.etcdadm_install_commands.clear();
            }
        }
        Format::Bottlerocket => {
            relevant.cloud_init_config = None;
            relevant.etcdadm_builtin = false;
            relevant.etcdadm_install_commands.clear();
            // Only the concatenated SSH keys reach the admin container
            let keys = relevant.users.drain(..).flat_map(|u| u.ssh_authorized_keys).collect();
            relevant.users = vec![User { ssh_authorized_keys: keys, ..Default::default() }];
        }
    }
    // Inline content is shadowed by secret-backed content
    for file in &mut relevant.files {
        if file.content_from.is_some() {
            file.content.clear();
        }
    }
    for user in &mut relevant.users {
        if user.passwd_from.is_some() {
            user.passwd = None;
        }
    }
    relevant
}

/// `sha256:<hex>` over the canonical JSON encoding of the render inputs.
pub fn fingerprint(
    spec: &EtcdadmConfigSpec,
    resolved: &ResolvedReferences,
    format: Format,
) -> Result<String, RenderError> {
    let spec = render_relevant(spec, format);
    let input = FingerprintInput {
        schema: RENDER_SCHEMA_VERSION,
        format,
        spec: &spec,
        resolved,
    };
    let canonical = serde_json::to_vec(&input)
        .map_err(|e| RenderError::InvalidConfiguration(format!("failed to encode fingerprint input: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{BottlerocketConfig, File, FileSource, SecretKeySelector};

    fn fp(spec: &EtcdadmConfigSpec) -> String {
        fingerprint(spec, &ResolvedReferences::default(), spec.format).unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let spec = builtin_cloud_config_spec();
        assert_eq!(fp(&spec), fp(&spec.clone()));
        assert!(fp(&spec).starts_with("sha256:"));
        assert_eq!(fp(&spec).len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_render_relevant_changes_change_fingerprint() {
        let base = builtin_cloud_config_spec();
        let changed = [
            EtcdadmConfigSpec { pre_etcdadm_commands: vec!["echo hi".to_string()], ..base.clone() },
            EtcdadmConfigSpec { post_etcdadm_commands: vec!["echo bye".to_string()], ..base.clone() },
            EtcdadmConfigSpec {
                files: vec![File { path: "/etc/x".to_string(), content: "x".to_string(), ..Default::default() }],
                ..base.clone()
            },
            EtcdadmConfigSpec { format: Format::Bottlerocket, ..bottlerocket_spec() },
        ];
        for spec in &changed {
            assert_ne!(fp(&base), fp(spec), "{spec:?}");
        }
    }

    #[test]
    fn test_command_order_matters() {
        let a = EtcdadmConfigSpec {
            pre_etcdadm_commands: vec!["one".to_string(), "two".to_string()],
            ..builtin_cloud_config_spec()
        };
        let b = EtcdadmConfigSpec {
            pre_etcdadm_commands: vec!["two".to_string(), "one".to_string()],
            ..builtin_cloud_config_spec()
        };
        assert_ne!(fp(&a), fp(&b));
    }

    #[test]
    fn test_fields_ignored_by_format_do_not_change_fingerprint() {
        let base = builtin_cloud_config_spec();
        let with_bottlerocket = EtcdadmConfigSpec {
            bottlerocket_config: Some(BottlerocketConfig {
                etcd_image: "etcd:v1".to_string(),
                bootstrap_image: "bootstrap:v1".to_string(),
                pause_image: "pause:v1".to_string(),
            }),
            ..base.clone()
        };
        assert_eq!(fp(&base), fp(&with_bottlerocket));

        let unused_install = EtcdadmConfigSpec {
            etcdadm_install_commands: vec!["never runs".to_string()],
            ..base.clone()
        };
        assert_eq!(fp(&base), fp(&unused_install));
    }

    #[test]
    fn test_bottlerocket_ignores_user_fields_other_than_keys() {
        let user = User {
            name: "ec2-user".to_string(),
            ssh_authorized_keys: vec!["ssh-ed25519 AAAA key-1".to_string()],
            ..Default::default()
        };
        let base = EtcdadmConfigSpec { users: vec![user.clone()], ..bottlerocket_spec() };
        let cosmetic = EtcdadmConfigSpec {
            users: vec![User {
                gecos: Some("Operator".to_string()),
                shell: Some("/bin/zsh".to_string()),
                passwd: Some("$6$hash".to_string()),
                ..user.clone()
            }],
            ..bottlerocket_spec()
        };
        assert_eq!(fp(&base), fp(&cosmetic));

        let new_key = EtcdadmConfigSpec {
            users: vec![User { ssh_authorized_keys: vec!["ssh-ed25519 BBBB key-2".to_string()], ..user }],
            ..bottlerocket_spec()
        };
        assert_ne!(fp(&base), fp(&new_key));
    }

    #[test]
    fn test_resolved_content_changes_fingerprint() {
        let spec = EtcdadmConfigSpec {
            files: vec![File {
                path: "/etc/etcd/ca.crt".to_string(),
                content_from: Some(FileSource {
                    secret: SecretKeySelector { name: "ca".to_string(), key: "tls.crt".to_string() },
                }),
                ..Default::default()
            }],
            ..builtin_cloud_config_spec()
        };
        let mut before = ResolvedReferences::default();
        before.insert("ca", "tls.crt", "old".to_string());
        let mut after = ResolvedReferences::default();
        after.insert("ca", "tls.crt", "rotated".to_string());

        assert_ne!(
            fingerprint(&spec, &before, Format::CloudConfig).unwrap(),
            fingerprint(&spec, &after, Format::CloudConfig).unwrap()
        );
    }

    #[test]
    fn test_resolved_insert_order_does_not_matter() {
        let spec = builtin_cloud_config_spec();
        let mut a = ResolvedReferences::default();
        a.insert("s1", "k", "1".to_string());
        a.insert("s2", "k", "2".to_string());
        let mut b = ResolvedReferences::default();
        b.insert("s2", "k", "2".to_string());
        b.insert("s1", "k", "1".to_string());
        assert_eq!(
            fingerprint(&spec, &a, Format::CloudConfig).unwrap(),
            fingerprint(&spec, &b, Format::CloudConfig).unwrap()
        );
    }
}
