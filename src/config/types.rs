//! Homelab configuration types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level homelab configuration, merged from every config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HomelabConfig {
    /// Defaults shared by every container
    #[serde(default)]
    pub global: GlobalConfig,
    /// IP address management
    #[serde(default)]
    pub ipam: IpamConfig,
    /// Hosts and the containers they may run
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    /// Container groups
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Containers
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

/// Global configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Environment variables available for substitution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Named mounts containers can refer to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_defs: Vec<MountConfig>,
    /// Container defaults
    #[serde(default)]
    pub container: GlobalContainerConfig,
}

/// Defaults applied to every container unless overridden
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_search: Vec<String>,
}

/// Environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvVar {
    pub var: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(var: &str, value: &str) -> Self {
        Self {
            var: var.to_string(),
            value: value.to_string(),
        }
    }
}

/// Mount type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    #[default]
    Bind,
    Volume,
    Tmpfs,
}

/// Mount declaration.
///
/// A container mount that only carries `name` refers to a global mount
/// definition of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub mount_type: MountType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dst: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MountConfig {
    /// Whether this mount only refers to a global mount definition
    pub fn is_reference(&self) -> bool {
        self.src.is_empty() && self.dst.is_empty()
    }
}

/// IPAM configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IpamConfig {
    #[serde(default)]
    pub networks: NetworksConfig,
}

/// Declared networks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworksConfig {
    #[serde(default)]
    pub bridge_mode_networks: Vec<BridgeModeNetworkConfig>,
    #[serde(default)]
    pub container_mode_networks: Vec<ContainerModeNetworkConfig>,
}

/// Bridge network with its own subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeModeNetworkConfig {
    pub name: String,
    pub host_interface_name: String,
    pub cidr: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub containers: Vec<ContainerIpConfig>,
}

/// Container IP within a bridge network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerIpConfig {
    pub ip: String,
    pub container: ContainerReference,
}

/// Network stack shared between containers.
///
/// The first listed container owns the stack; the others join it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerModeNetworkConfig {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub containers: Vec<ContainerReference>,
}

/// Host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub allowed_containers: Vec<ContainerReference>,
}

/// Container group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    pub order: i32,
}

/// Identifies a container within its group
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerReference {
    pub group: String,
    pub container: String,
}

impl ContainerReference {
    pub fn new(group: &str, container: &str) -> Self {
        Self {
            group: group.to_string(),
            container: container.to_string(),
        }
    }

    /// Name of the container on the runtime
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.group, self.container)
    }
}

impl fmt::Display for ContainerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.group, self.container)
    }
}

/// Container configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerConfig {
    pub info: ContainerReference,
    #[serde(default)]
    pub config: ContainerEnvConfig,
    pub image: ContainerImageConfig,
    #[serde(default)]
    pub metadata: ContainerMetadataConfig,
    #[serde(default)]
    pub lifecycle: ContainerLifecycleConfig,
    #[serde(default)]
    pub user: ContainerUserConfig,
    #[serde(default)]
    pub fs: ContainerFilesystemConfig,
    #[serde(default)]
    pub network: ContainerNetworkConfig,
    #[serde(default)]
    pub security: ContainerSecurityConfig,
    #[serde(default)]
    pub runtime: ContainerRuntimeConfig,
}

/// Container-scoped substitution variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerEnvConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Image configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerImageConfig {
    pub image: String,
    #[serde(default)]
    pub skip_image_pull: bool,
    #[serde(default)]
    pub ignore_image_pull_failures: bool,
}

/// Labels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerMetadataConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelConfig {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerLifecycleConfig {
    /// Start order within the group
    #[serde(default = "default_order")]
    pub order: i32,
    /// Host command run before the container is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_pre_hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicyConfig>,
    #[serde(default)]
    pub auto_remove: bool,
}

fn default_order() -> i32 {
    1
}

impl Default for ContainerLifecycleConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            start_pre_hook: None,
            restart_policy: None,
            auto_remove: false,
        }
    }
}

/// Restart policy mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyMode {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl fmt::Display for RestartPolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicyMode::No => write!(f, "no"),
            RestartPolicyMode::Always => write!(f, "always"),
            RestartPolicyMode::OnFailure => write!(f, "on-failure"),
            RestartPolicyMode::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

/// Restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RestartPolicyConfig {
    #[serde(default)]
    pub mode: RestartPolicyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_count: Option<u32>,
}

/// User configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerUserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
}

/// Filesystem configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerFilesystemConfig {
    #[serde(default)]
    pub read_only_rootfs: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountConfig>,
}

/// Container network settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerNetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub published_ports: Vec<PublishedPortConfig>,
}

/// Network protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Port published on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublishedPortConfig {
    pub container_port: u16,
    #[serde(default)]
    pub proto: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    pub host_port: u16,
}

/// Security settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerSecurityConfig {
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sysctls: Vec<SysctlConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SysctlConfig {
    pub key: String,
    pub value: String,
}

/// Process configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerRuntimeConfig {
    #[serde(default)]
    pub tty: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_reference_names() {
        let r = ContainerReference::new("media", "plex");
        assert_eq!(r.full_name(), "media-plex");
        assert_eq!(r.to_string(), "media-plex");
    }

    #[test]
    fn test_parse_restart_policy_modes() {
        let policy: RestartPolicyConfig =
            serde_yaml::from_str("mode: on-failure\nmaxRetryCount: 5").unwrap();
        assert_eq!(policy.mode, RestartPolicyMode::OnFailure);
        assert_eq!(policy.max_retry_count, Some(5));

        let policy: RestartPolicyConfig = serde_yaml::from_str("mode: unless-stopped").unwrap();
        assert_eq!(policy.mode, RestartPolicyMode::UnlessStopped);
    }

    #[test]
    fn test_lifecycle_defaults() {
        let lifecycle: ContainerLifecycleConfig = serde_yaml::from_str("autoRemove: true").unwrap();
        assert_eq!(lifecycle.order, 1);
        assert!(lifecycle.auto_remove);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<GroupConfig, _> =
            serde_yaml::from_str("name: g1\norder: 1\ncolour: red");
        assert!(result.is_err());
    }

    #[test]
    fn test_mount_reference() {
        let mount: MountConfig = serde_yaml::from_str("name: tz").unwrap();
        assert!(mount.is_reference());
        assert_eq!(mount.mount_type, MountType::Bind);
    }
}
