//! Bootstrap data rendering.
//!
//! `render` turns a spec plus its resolved secret references into the bytes
//! a node consumes on first boot. It is pure: no I/O, no clock, no
//! randomness, so equal inputs always give equal bytes.

mod bottlerocket;
mod cloud_config;

use crate::error::RenderError;
use crate::resolve::ResolvedReferences;
use crds::{EtcdadmConfigSpec, File, Format};
use serde::Serialize;

/// First lines of every cloud-init document we emit
pub(crate) const CLOUD_CONFIG_HEADER: &str = "## template: jinja\n#cloud-config\n";

/// Always emitted so cloud-init creates the directory the sentinel lands in
pub(crate) const PLACEHOLDER_FILE: &str = "/run/cluster-api/placeholder";

/// Written once etcdadm succeeded; the machine controller polls for it
pub(crate) const SENTINEL_FILE: &str = "/run/cluster-api/bootstrap-success.complete";

/// Render the bootstrap data for `spec` in its configured format.
pub fn render(spec: &EtcdadmConfigSpec, resolved: &ResolvedReferences) -> Result<Vec<u8>, RenderError> {
    validate(spec)?;
    match spec.format {
        Format::CloudConfig => cloud_config::render(spec, resolved),
        Format::Bottlerocket => bottlerocket::render(spec, resolved),
    }
}

/// Check cross-field rules for the configured format.
pub fn validate(spec: &EtcdadmConfigSpec) -> Result<(), RenderError> {
    for (i, file) in spec.files.iter().enumerate() {
        if file.path.trim().is_empty() {
            return Err(invalid(format!("files[{i}].path must not be empty")));
        }
        if spec.files[..i].iter().any(|other| other.path == file.path) {
            return Err(invalid(format!("files[{i}].path {:?} is listed more than once", file.path)));
        }
        if file.path == PLACEHOLDER_FILE {
            return Err(invalid(format!("files[{i}].path {PLACEHOLDER_FILE:?} is reserved")));
        }
    }
    for (i, user) in spec.users.iter().enumerate() {
        if user.name.trim().is_empty() {
            return Err(invalid(format!("users[{i}].name must not be empty")));
        }
    }

    match spec.format {
        Format::CloudConfig => {
            if spec.proxy.is_some() {
                return Err(invalid("proxy is only supported for the bottlerocket format"));
            }
            if spec.registry_mirror.is_some() {
                return Err(invalid("registryMirror is only supported for the bottlerocket format"));
            }
            if !spec.etcdadm_builtin && spec.etcdadm_install_commands.is_empty() {
                return Err(invalid(
                    "etcdadmInstallCommands must be set when etcdadmBuiltin is false",
                ));
            }
        }
        Format::Bottlerocket => {
            let Some(config) = spec.bottlerocket_config.as_ref() else {
                return Err(invalid("bottlerocketConfig is required for the bottlerocket format"));
            };
            for (field, value) in [
                ("etcdImage", &config.etcd_image),
                ("bootstrapImage", &config.bootstrap_image),
                ("pauseImage", &config.pause_image),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(format!("bottlerocketConfig.{field} must not be empty")));
                }
            }
            split_image(&config.etcd_image)?;
            if let Some(proxy) = spec.proxy.as_ref() {
                if proxy.http_proxy.is_none() && proxy.https_proxy.is_none() {
                    return Err(invalid("proxy requires httpProxy or httpsProxy"));
                }
            }
            if let Some(mirror) = spec.registry_mirror.as_ref() {
                if mirror.endpoint.as_deref().is_none_or(|e| e.trim().is_empty()) {
                    return Err(invalid("registryMirror.endpoint must not be empty"));
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn invalid(message: impl Into<String>) -> RenderError {
    RenderError::InvalidConfiguration(message.into())
}

/// Split `repository:tag`; the tag separator must come after the last `/`.
/// Digest references are rejected since the etcd image is pulled by tag.
pub(crate) fn split_image(image: &str) -> Result<(&str, &str), RenderError> {
    if image.contains('@') {
        return Err(invalid(format!("image {image:?} must be referenced by tag, not digest")));
    }
    let slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[slash..].rfind(':') {
        Some(colon) if colon > 0 && slash + colon + 1 < image.len() => {
            Ok((&image[..slash + colon], &image[slash + colon + 1..]))
        }
        _ => Err(invalid(format!("image {image:?} must be in repository:tag form"))),
    }
}

/// A `write_files` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct WriteFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<&'static str>,
    pub content: String,
}

/// Files in input order with secret-backed content filled in, followed by
/// the placeholder that creates the sentinel directory.
pub(crate) fn write_files(files: &[File], resolved: &ResolvedReferences) -> Result<Vec<WriteFile>, RenderError> {
    let mut out = Vec::with_capacity(files.len() + 1);
    for file in files {
        let content = match file.content_from.as_ref() {
            Some(source) => resolved
                .get(&source.secret)
                .ok_or_else(|| invalid(format!("content for {} was not resolved", file.path)))?
                .to_string(),
            None => file.content.clone(),
        };
        out.push(WriteFile {
            path: file.path.clone(),
            owner: file.owner.clone(),
            permissions: file.permissions.clone(),
            encoding: file.encoding.map(crds::Encoding::as_str),
            content,
        });
    }
    out.push(WriteFile {
        path: PLACEHOLDER_FILE.to_string(),
        owner: Some("root:root".to_string()),
        permissions: Some("0640".to_string()),
        encoding: None,
        content: "This placeholder file is used to create the /run/cluster-api sub directory".to_string(),
    });
    Ok(out)
}

/// Quote a value for a POSIX shell command line.
pub(crate) fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+@%,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Serialize a cloud-init document with its header.
pub(crate) fn to_cloud_config<T: Serialize>(document: &T) -> Result<String, RenderError> {
    let body = serde_yaml::to_string(document).map_err(|e| invalid(format!("failed to encode cloud-config: {e}")))?;
    Ok(format!("{CLOUD_CONFIG_HEADER}{body}"))
}
