//! Bottlerocket TOML settings output
//!
//! Bottlerocket takes its user data as TOML settings. etcdadm runs inside the
//! bootstrap host container, which receives its own cloud-config style script
//! as base64 user data.

use super::{WriteFile, split_image, to_cloud_config, write_files};
use crate::error::RenderError;
use crate::resolve::ResolvedReferences;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crds::{BottlerocketConfig, EtcdadmConfigSpec, ProxyConfiguration, RegistryMirrorConfiguration};
use serde::Serialize;
use std::collections::BTreeMap;

/// Registry whose pulls are redirected to the configured mirror
const MIRRORED_REGISTRY: &str = "public.ecr.aws";

#[derive(Debug, Serialize)]
struct BootstrapScript {
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UserData {
    settings: Settings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Settings {
    host_containers: HostContainers,
    kubernetes: KubernetesSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<NetworkSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_registry: Option<ContainerRegistrySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pki: Option<PkiSettings>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct HostContainers {
    admin: HostContainer,
    kubeadm_bootstrap: HostContainer,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct HostContainer {
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    superpowered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    user_data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubernetesSettings {
    standalone_mode: bool,
    authentication_mode: &'static str,
    server_tls_bootstrap: bool,
    pod_infra_container_image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct NetworkSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    https_proxy: Option<String>,
    /// Kept in input order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    no_proxy: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ContainerRegistrySettings {
    mirrors: BTreeMap<&'static str, Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct PkiSettings {
    registry_mirror_ca: PkiBundle,
}

#[derive(Debug, Serialize)]
struct PkiBundle {
    data: String,
    trusted: bool,
}

pub(super) fn render(spec: &EtcdadmConfigSpec, resolved: &ResolvedReferences) -> Result<Vec<u8>, RenderError> {
    let config = spec
        .bottlerocket_config
        .as_ref()
        .ok_or_else(|| super::invalid("bottlerocketConfig is required for the bottlerocket format"))?;

    let mirror = spec.registry_mirror.as_ref();
    let user_data = UserData {
        settings: Settings {
            host_containers: HostContainers {
                admin: admin_container(spec),
                kubeadm_bootstrap: bootstrap_container(spec, config, resolved)?,
            },
            kubernetes: kubernetes(config),
            network: spec.proxy.as_ref().map(network),
            container_registry: mirror.and_then(container_registry),
            pki: mirror.and_then(pki),
        },
    };
    let out = toml::to_string(&user_data)
        .map_err(|e| super::invalid(format!("failed to encode bottlerocket settings: {e}")))?;
    Ok(out.into_bytes())
}

fn admin_container(spec: &EtcdadmConfigSpec) -> HostContainer {
    let keys: Vec<&String> = spec.users.iter().flat_map(|u| u.ssh_authorized_keys.iter()).collect();
    let user_data = serde_json::json!({ "ssh": { "authorized-keys": keys } }).to_string();
    HostContainer {
        enabled: true,
        superpowered: None,
        source: None,
        user_data: STANDARD.encode(user_data),
    }
}

fn bootstrap_container(
    spec: &EtcdadmConfigSpec,
    config: &BottlerocketConfig,
    resolved: &ResolvedReferences,
) -> Result<HostContainer, RenderError> {
    let (repository, tag) = split_image(&config.etcd_image)?;
    let mut runcmd = spec.pre_etcdadm_commands.clone();
    runcmd.push(format!("EtcdadmInit {repository} {tag}"));
    runcmd.extend(spec.post_etcdadm_commands.iter().cloned());

    let script = to_cloud_config(&BootstrapScript {
        write_files: write_files(&spec.files, resolved)?,
        runcmd,
    })?;
    Ok(HostContainer {
        enabled: true,
        superpowered: Some(true),
        source: Some(config.bootstrap_image.clone()),
        user_data: STANDARD.encode(script),
    })
}

fn kubernetes(config: &BottlerocketConfig) -> KubernetesSettings {
    KubernetesSettings {
        standalone_mode: true,
        authentication_mode: "tls",
        server_tls_bootstrap: false,
        pod_infra_container_image: config.pause_image.clone(),
    }
}

fn network(proxy: &ProxyConfiguration) -> NetworkSettings {
    NetworkSettings {
        https_proxy: proxy.https_proxy.as_ref().or(proxy.http_proxy.as_ref()).cloned(),
        no_proxy: proxy.no_proxy.clone(),
    }
}

fn container_registry(mirror: &RegistryMirrorConfiguration) -> Option<ContainerRegistrySettings> {
    let endpoint = mirror.endpoint.as_deref()?;
    let endpoint = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    };
    Some(ContainerRegistrySettings {
        mirrors: BTreeMap::from([(MIRRORED_REGISTRY, vec![endpoint])]),
    })
}

fn pki(mirror: &RegistryMirrorConfiguration) -> Option<PkiSettings> {
    let ca = mirror.ca_cert.as_deref().filter(|ca| !ca.is_empty())?;
    Some(PkiSettings {
        registry_mirror_ca: PkiBundle { data: STANDARD.encode(ca), trusted: true },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(spec: &EtcdadmConfigSpec) -> toml::Table {
        let out = render(spec, &ResolvedReferences::default()).unwrap();
        let mut document: toml::Table = toml::from_str(std::str::from_utf8(&out).unwrap()).unwrap();
        match document.remove("settings") {
            Some(toml::Value::Table(settings)) => settings,
            other => panic!("unexpected settings: {other:?}"),
        }
    }

    fn spec_with(proxy: Option<ProxyConfiguration>, mirror: Option<RegistryMirrorConfiguration>) -> EtcdadmConfigSpec {
        EtcdadmConfigSpec {
            proxy,
            registry_mirror: mirror,
            ..crate::test_utils::bottlerocket_spec()
        }
    }

    #[test]
    fn test_https_proxy_falls_back_to_http_proxy() {
        let proxy = ProxyConfiguration {
            http_proxy: Some("http://proxy:3128".to_string()),
            https_proxy: None,
            no_proxy: vec![],
        };
        let settings = settings(&spec_with(Some(proxy), None));
        let network = settings["network"].as_table().unwrap();
        assert_eq!(network["https-proxy"].as_str(), Some("http://proxy:3128"));
        assert!(!network.contains_key("no-proxy"));
    }

    #[test]
    fn test_mirror_endpoint_gets_scheme() {
        let mirror = RegistryMirrorConfiguration { endpoint: Some("mirror.local:5000".to_string()), ca_cert: None };
        let settings = settings(&spec_with(None, Some(mirror)));
        let mirrors = &settings["container-registry"]["mirrors"];
        assert_eq!(
            mirrors["public.ecr.aws"].as_array().unwrap(),
            &vec![toml::Value::String("https://mirror.local:5000".to_string())]
        );
        assert!(!settings.contains_key("pki"));
    }

    #[test]
    fn test_control_characters_stay_valid_toml() {
        let proxy = ProxyConfiguration {
            http_proxy: None,
            https_proxy: Some("http://proxy\u{7f}:3128".to_string()),
            no_proxy: vec!["a\u{7f}b".to_string(), "quote\"d".to_string()],
        };
        let settings = settings(&spec_with(Some(proxy), None));
        let network = settings["network"].as_table().unwrap();
        assert_eq!(network["https-proxy"].as_str(), Some("http://proxy\u{7f}:3128"));
        let no_proxy: Vec<&str> = network["no-proxy"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(no_proxy, vec!["a\u{7f}b", "quote\"d"]);
    }
}
