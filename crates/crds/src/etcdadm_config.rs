//! EtcdadmConfig CRD
//!
//! Declarative bootstrap specification for a single etcd node. The controller
//! renders it into cloud-config or Bottlerocket user data and publishes the
//! result in an owned Secret.

use crate::conditions::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// API group served by the bootstrap provider
pub const API_GROUP: &str = "bootstrap.cluster.x-k8s.io";

/// Secret data key holding the rendered bootstrap payload
pub const DATA_SECRET_VALUE_KEY: &str = "value";

/// Secret data key holding the format the payload was rendered in
pub const DATA_SECRET_FORMAT_KEY: &str = "format";

/// Annotation on the data secret recording the fingerprint of its payload
pub const DATA_FINGERPRINT_ANNOTATION: &str = "bootstrap.cluster.x-k8s.io/data-fingerprint";

/// Label identifying the cluster a config (and its data secret) belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Secret type used for Cluster API bootstrap data
pub const BOOTSTRAP_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootstrap.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "EtcdadmConfig",
    namespaced,
    status = "EtcdadmConfigStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"DataSecret","type":"string","jsonPath":".status.dataSecretName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdadmConfigSpec {
    /// Extra users to add, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,

    /// etcdadm is already present on the image; no install commands are needed
    #[serde(default)]
    pub etcdadm_builtin: bool,

    /// Commands that install etcdadm when it is not built into the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub etcdadm_install_commands: Vec<String>,

    /// Extra commands to run before etcdadm runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_etcdadm_commands: Vec<String>,

    /// Extra commands to run after etcdadm runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_etcdadm_commands: Vec<String>,

    /// Output format of the bootstrap data
    #[serde(default)]
    pub format: Format,

    /// Bottlerocket bootstrap settings (required for the bottlerocket format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottlerocket_config: Option<BottlerocketConfig>,

    /// cloud-init bootstrap settings (only used for the cloud-config format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_config: Option<CloudInitConfig>,

    /// Extra files to write on the node, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,

    /// Proxy settings, bottlerocket only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfiguration>,

    /// Registry mirror settings, bottlerocket only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror: Option<RegistryMirrorConfiguration>,
}

impl EtcdadmConfigSpec {
    /// Whether the output format carries user passwords. Bottlerocket only
    /// takes the users' SSH keys.
    pub fn renders_passwords(&self) -> bool {
        self.format == Format::CloudConfig
    }

    /// Names of the secrets this spec reads file content or passwords from.
    pub fn referenced_secret_names(&self) -> BTreeSet<String> {
        let files = self
            .files
            .iter()
            .filter_map(|f| f.content_from.as_ref())
            .map(|src| src.secret.name.clone());
        let users = self
            .users
            .iter()
            .filter(|_| self.renders_passwords())
            .filter_map(|u| u.passwd_from.as_ref())
            .map(|src| src.secret.name.clone());
        files.chain(users).collect()
    }
}

/// Output format of the rendered bootstrap data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// cloud-init `#cloud-config` document
    #[default]
    CloudConfig,

    /// Bottlerocket TOML settings
    Bottlerocket,
}

impl Format {
    /// Wire value of the format, as stored in the data secret
    pub fn as_str(self) -> &'static str {
        match self {
            Format::CloudConfig => "cloud-config",
            Format::Bottlerocket => "bottlerocket",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BottlerocketConfig {
    /// etcd image etcdadm runs, `repository:tag`
    #[serde(default)]
    pub etcd_image: String,

    /// Container image used for bottlerocket's bootstrap host container
    pub bootstrap_image: String,

    /// Image used for the pause container
    pub pause_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitConfig {
    /// etcd version etcdadm installs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Where etcdadm downloads etcd from
    #[serde(default, rename = "etcdReleaseURL", skip_serializing_if = "Option::is_none")]
    pub etcd_release_url: Option<String>,

    /// Where etcdadm extracts the etcd binaries to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,
}

/// Proxy settings for bottlerocket services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,

    /// Hosts and CIDRs that bypass the proxy, kept in the order given
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_proxy: Vec<String>,
}

/// Image registry mirror settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorConfiguration {
    /// Registry mirror endpoint used for pulling images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// PEM CA certificate of the registry mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
}

/// A cloud-init user entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gecos: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Hashed password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,

    /// Hashed password read from a secret; takes precedence over `passwd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd_from: Option<PasswdSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_password: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswdSource {
    pub secret: SecretKeySelector,
}

/// A file written on the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub path: String,

    /// `user:group` ownership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Octal permissions, e.g. `0640`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Content read from a secret; takes precedence over `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_from: Option<FileSource>,
}

/// Encoding of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Encoding {
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "gzip+base64")]
    GzipBase64,
}

impl Encoding {
    /// cloud-init spelling of the encoding
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Base64 => "base64",
            Encoding::Gzip => "gzip",
            Encoding::GzipBase64 => "gzip+base64",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub secret: SecretKeySelector,
}

/// Key within a secret in the config's namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// Observed state of an EtcdadmConfig, owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdadmConfigStatus {
    /// Ready first, then the remaining conditions ordered by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Name of the secret holding the rendered bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,

    /// The bootstrap data is published and safe to consume
    #[serde(default)]
    pub ready: bool,

    /// Generation of the spec the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl EtcdadmConfigStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition of the given type is present and `True`.
    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(Condition::is_true)
    }
}
