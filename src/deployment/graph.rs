//! Deployment graph: config resolved against the current host

use crate::config::{
    validate, ConfigParser, ContainerConfig, ContainerReference, GlobalConfig, GroupConfig,
    HomelabConfig,
};
use crate::error::{HomelabError, Result};
use crate::host::HostInfo;
use crate::network::ipam;
use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

/// Bridge network with its own subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeNetwork {
    pub name: String,
    pub host_interface_name: String,
    pub cidr: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub priority: i32,
    pub containers: Vec<(ContainerReference, Ipv4Addr)>,
}

/// Network stack shared between containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerModeNetwork {
    pub name: String,
    pub priority: i32,
    pub containers: Vec<ContainerReference>,
}

impl ContainerModeNetwork {
    /// The container whose network stack the others join
    pub fn owner(&self) -> Option<&ContainerReference> {
        self.containers.first()
    }
}

/// A declared network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Bridge(BridgeNetwork),
    Container(ContainerModeNetwork),
}

impl Network {
    pub fn name(&self) -> &str {
        match self {
            Network::Bridge(n) => &n.name,
            Network::Container(n) => &n.name,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Network::Bridge(n) => n.priority,
            Network::Container(n) => n.priority,
        }
    }
}

/// A container's attachment to one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub network: String,
    pub priority: i32,
    /// `None` for container mode networks
    pub ip: Option<Ipv4Addr>,
}

/// A container resolved against its group, networks and host
#[derive(Debug, Clone)]
pub struct Container {
    config: ContainerConfig,
    group: Arc<GroupConfig>,
    endpoints: Vec<NetworkEndpoint>,
    allowed_on_host: bool,
}

impl Container {
    pub fn reference(&self) -> &ContainerReference {
        &self.config.info
    }

    /// Runtime name, `<group>-<container>`
    pub fn name(&self) -> String {
        self.config.info.full_name()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn group_order(&self) -> i32 {
        self.group.order
    }

    pub fn order(&self) -> i32 {
        self.config.lifecycle.order
    }

    pub fn image(&self) -> &str {
        &self.config.image.image
    }

    /// Endpoints sorted by network priority, then name
    pub fn endpoints(&self) -> &[NetworkEndpoint] {
        &self.endpoints
    }

    pub fn is_allowed_on_host(&self) -> bool {
        self.allowed_on_host
    }
}

/// A group and the containers it owns
#[derive(Debug, Clone)]
pub struct ContainerGroup {
    config: Arc<GroupConfig>,
    containers: HashMap<ContainerReference, Container>,
}

impl ContainerGroup {
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers
            .get(&ContainerReference::new(&self.config.name, name))
    }
}

/// Everything one invocation deploys
#[derive(Debug, Clone)]
pub struct Deployment {
    global: GlobalConfig,
    groups: HashMap<String, ContainerGroup>,
    networks: HashMap<String, Network>,
    host: HostInfo,
}

impl Deployment {
    /// Load, validate and resolve every config file under `configs_dir`
    pub fn load(configs_dir: &Path, host: &HostInfo) -> Result<Self> {
        let config = ConfigParser::load_dir(configs_dir)?;
        Self::build(&config, host)
    }

    /// Validate the config and resolve it for `host`
    pub fn build(config: &HomelabConfig, host: &HostInfo) -> Result<Self> {
        validate(config)?;

        let networks = build_networks(config)?;
        let mut groups = build_groups(config);
        let allowed = allowed_containers(config, host)?;

        let mut bridge_endpoints: HashMap<&ContainerReference, Vec<NetworkEndpoint>> =
            HashMap::new();
        for network in networks.values() {
            match network {
                Network::Bridge(n) => {
                    for (reference, ip) in &n.containers {
                        bridge_endpoints
                            .entry(reference)
                            .or_default()
                            .push(NetworkEndpoint {
                                network: n.name.clone(),
                                priority: n.priority,
                                ip: Some(*ip),
                            });
                    }
                }
                Network::Container(n) => {
                    for reference in &n.containers {
                        bridge_endpoints
                            .entry(reference)
                            .or_default()
                            .push(NetworkEndpoint {
                                network: n.name.clone(),
                                priority: n.priority,
                                ip: None,
                            });
                    }
                }
            }
        }

        for container_config in &config.containers {
            let reference = &container_config.info;
            let group = groups.get_mut(&reference.group).ok_or_else(|| {
                HomelabError::InvalidConfig(format!(
                    "Container {} refers to undefined group {}",
                    reference, reference.group
                ))
            })?;

            let mut endpoints = bridge_endpoints.remove(reference).unwrap_or_default();
            endpoints.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.network.cmp(&b.network))
            });
            if endpoints.is_empty() {
                tracing::warn!(container = %reference, "Container is not attached to any network");
            }

            let container = Container {
                config: container_config.clone(),
                group: group.config.clone(),
                endpoints,
                allowed_on_host: allowed.contains(reference),
            };
            group.containers.insert(reference.clone(), container);
        }

        tracing::debug!(
            host = %host.host_name,
            groups = groups.len(),
            networks = networks.len(),
            "Built deployment"
        );

        Ok(Self {
            global: config.global.clone(),
            groups,
            networks,
            host: host.clone(),
        })
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    /// Every container in every group, unordered
    pub fn query_all(&self) -> Vec<&Container> {
        self.groups.values().flat_map(|g| g.containers()).collect()
    }

    /// Every container in `group`, unordered
    pub fn query_group(&self, group: &str) -> Result<Vec<&Container>> {
        let group = self
            .groups
            .get(group)
            .ok_or_else(|| HomelabError::GroupNotFound(group.to_string()))?;
        Ok(group.containers().collect())
    }

    pub fn query_container(&self, group: &str, container: &str) -> Result<&Container> {
        let found = self
            .groups
            .get(group)
            .ok_or_else(|| HomelabError::GroupNotFound(group.to_string()))?;
        found.container(container).ok_or_else(|| {
            HomelabError::ContainerNotFound(ContainerReference::new(group, container).to_string())
        })
    }
}

fn build_networks(config: &HomelabConfig) -> Result<HashMap<String, Network>> {
    let declared = &config.ipam.networks;
    let mut networks = HashMap::new();

    for network in &declared.bridge_mode_networks {
        let cidr = ipam::parse_cidr(&network.name, &network.cidr)?;
        let containers = network
            .containers
            .iter()
            .map(|endpoint| {
                let ip = endpoint.ip.parse::<Ipv4Addr>().map_err(|e| {
                    HomelabError::Ipam(format!(
                        "Container {} in network {} has an invalid IP {}: {}",
                        endpoint.container, network.name, endpoint.ip, e
                    ))
                })?;
                Ok((endpoint.container.clone(), ip))
            })
            .collect::<Result<Vec<_>>>()?;

        networks.insert(
            network.name.clone(),
            Network::Bridge(BridgeNetwork {
                name: network.name.clone(),
                host_interface_name: network.host_interface_name.clone(),
                cidr,
                gateway: ipam::gateway(cidr),
                priority: network.priority,
                containers,
            }),
        );
    }

    for network in &declared.container_mode_networks {
        networks.insert(
            network.name.clone(),
            Network::Container(ContainerModeNetwork {
                name: network.name.clone(),
                priority: network.priority,
                containers: network.containers.clone(),
            }),
        );
    }

    Ok(networks)
}

fn build_groups(config: &HomelabConfig) -> HashMap<String, ContainerGroup> {
    config
        .groups
        .iter()
        .map(|group| {
            (
                group.name.clone(),
                ContainerGroup {
                    config: Arc::new(group.clone()),
                    containers: HashMap::new(),
                },
            )
        })
        .collect()
}

/// Allow-list of the current host, matched by name ignoring case
fn allowed_containers(
    config: &HomelabConfig,
    host: &HostInfo,
) -> Result<HashSet<ContainerReference>> {
    let host_config = config
        .hosts
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(&host.host_name))
        .ok_or_else(|| {
            HomelabError::InvalidConfig(format!(
                "Current host {} is not declared in the hosts config",
                host.host_name
            ))
        })?;

    if host_config.allowed_containers.is_empty() {
        tracing::warn!(host = %host_config.name, "Host does not allow any containers");
    }

    Ok(host_config.allowed_containers.iter().cloned().collect())
}
