//! cloud-init `#cloud-config` output

use super::{SENTINEL_FILE, WriteFile, invalid, shell_quote, to_cloud_config, write_files};
use crate::error::RenderError;
use crate::resolve::ResolvedReferences;
use crds::{EtcdadmConfigSpec, User};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CloudConfig {
    write_files: Vec<WriteFile>,
    runcmd: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<CloudInitUser>,
}

/// cloud-init's spelling of a user entry
#[derive(Debug, Serialize)]
struct CloudInitUser {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gecos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    homedir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inactive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_passwd: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sudo: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
}

pub(super) fn render(spec: &EtcdadmConfigSpec, resolved: &ResolvedReferences) -> Result<Vec<u8>, RenderError> {
    let document = CloudConfig {
        write_files: write_files(&spec.files, resolved)?,
        runcmd: runcmd(spec),
        users: spec
            .users
            .iter()
            .map(|user| cloud_init_user(user, resolved))
            .collect::<Result<_, _>>()?,
    };
    Ok(to_cloud_config(&document)?.into_bytes())
}

/// pre-commands, install step, post-commands
fn runcmd(spec: &EtcdadmConfigSpec) -> Vec<String> {
    let mut commands = spec.pre_etcdadm_commands.clone();
    if !spec.etcdadm_builtin {
        commands.extend(spec.etcdadm_install_commands.iter().cloned());
    }
    commands.push(etcdadm_init_command(spec));
    commands.extend(spec.post_etcdadm_commands.iter().cloned());
    commands
}

fn etcdadm_init_command(spec: &EtcdadmConfigSpec) -> String {
    let mut command = String::from("etcdadm init");
    if let Some(config) = spec.cloud_init_config.as_ref() {
        for (flag, value) in [
            ("--version", &config.version),
            ("--release-url", &config.etcd_release_url),
            ("--install-dir", &config.install_dir),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                command.push_str(&format!(" {flag} {}", shell_quote(value)));
            }
        }
    }
    command.push_str(&format!(" --init-system systemd && echo success > {SENTINEL_FILE}"));
    command
}

fn cloud_init_user(user: &User, resolved: &ResolvedReferences) -> Result<CloudInitUser, RenderError> {
    let passwd = match user.passwd_from.as_ref() {
        Some(source) => Some(
            resolved
                .get(&source.secret)
                .ok_or_else(|| invalid(format!("password for user {} was not resolved", user.name)))?
                .to_string(),
        ),
        None => user.passwd.clone(),
    };
    Ok(CloudInitUser {
        name: user.name.clone(),
        gecos: user.gecos.clone(),
        groups: user.groups.clone(),
        homedir: user.home_dir.clone(),
        inactive: user.inactive,
        shell: user.shell.clone(),
        passwd,
        primary_group: user.primary_group.clone(),
        lock_passwd: user.lock_password,
        sudo: user.sudo.clone(),
        ssh_authorized_keys: user.ssh_authorized_keys.clone(),
    })
}
