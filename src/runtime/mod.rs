//! Container runtime capability
//!
//! Everything homelab needs from the container engine goes through the
//! [`ContainerRuntime`] trait. [`DockerRuntime`] talks to the Docker Engine
//! API; tests use an in-memory double.

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

use crate::config::{MountType, Protocol, RestartPolicyConfig};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Container state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No container with the name exists
    NotFound,
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::NotFound => write!(f, "not found"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
        }
    }
}

/// Result of inspecting an existing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub image: String,
    pub state: ContainerState,
}

/// Locally available image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
}

/// One progress message from an image pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub status: String,
    /// Layer the message refers to, if any
    pub layer: Option<String>,
    pub progress: Option<String>,
}

/// Bridge network to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub subnet: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub host_interface_name: String,
    pub labels: BTreeMap<String, String>,
}

/// Existing network as reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInspect {
    pub name: String,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

/// Networking of a container at creation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// Attached to no network
    None,
    /// Attached to a bridge network with a fixed IP
    Bridge { network: String, ip: Ipv4Addr },
    /// Shares the network stack of another container
    Container(String),
}

/// Mount inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub mount_type: MountType,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Port published on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<String>,
    pub host_port: u16,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub user: Option<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub tty: bool,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<u32>,
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortSpec>,
    pub restart_policy: RestartPolicyConfig,
    pub auto_remove: bool,
    pub privileged: bool,
    pub read_only_rootfs: bool,
    pub sysctls: BTreeMap<String, String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub dns_servers: Vec<String>,
    pub dns_options: Vec<String>,
    pub dns_search: Vec<String>,
    pub network_mode: NetworkMode,
}

/// Operations homelab needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, yielding progress until the pull completes
    fn pull_image(&self, image: &str, platform: &str) -> BoxStream<'_, Result<PullProgress>>;

    /// Local images matching a reference
    async fn list_images(&self, image: &str) -> Result<Vec<ImageSummary>>;

    /// Inspect a network by exact name
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInspect>>;

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()>;

    /// Attach an existing container to a network
    async fn connect_network(
        &self,
        container: &str,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> Result<()>;

    /// Create a container, returning its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Force-remove a container by name
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Inspect a container by name; `None` when it does not exist
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInspect>>;
}
