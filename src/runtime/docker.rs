//! Docker Engine implementation of [`ContainerRuntime`]

use super::{
    ContainerInspect, ContainerRuntime, ContainerSpec, ContainerState, ImageSummary,
    NetworkInspect, NetworkMode, NetworkSpec, PullProgress,
};
use crate::config::{MountType, RestartPolicyMode};
use crate::error::{HomelabError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{
    ContainerStateStatusEnum, EndpointIpamConfig, EndpointSettings, HostConfig, Ipam,
    IpamConfig as DockerIpamConfig, Mount, MountTypeEnum, Network, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Docker option naming the host side bridge interface
const BRIDGE_NAME_OPTION: &str = "com.docker.network.bridge.name";

/// Container runtime backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl From<ContainerStateStatusEnum> for ContainerState {
    fn from(status: ContainerStateStatusEnum) -> Self {
        match status {
            ContainerStateStatusEnum::CREATED => ContainerState::Created,
            ContainerStateStatusEnum::RUNNING => ContainerState::Running,
            ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
            ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
            ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
            ContainerStateStatusEnum::EXITED => ContainerState::Exited,
            // An empty status only shows up for broken containers
            ContainerStateStatusEnum::DEAD | ContainerStateStatusEnum::EMPTY => {
                ContainerState::Dead
            }
        }
    }
}

/// Docker also resolves ID prefixes, only an exact name match counts
fn network_inspect(name: &str, network: Network) -> Option<NetworkInspect> {
    if network.name.as_deref() != Some(name) {
        tracing::debug!(
            requested = %name,
            found = ?network.name,
            "Network lookup matched a different network, ignoring it"
        );
        return None;
    }
    let pool = network
        .ipam
        .and_then(|ipam| ipam.config)
        .and_then(|pools| pools.into_iter().next());
    Some(NetworkInspect {
        name: name.to_string(),
        subnet: pool.as_ref().and_then(|p| p.subnet.clone()),
        gateway: pool.and_then(|p| p.gateway),
    })
}

fn restart_policy(spec: &ContainerSpec) -> RestartPolicy {
    let name = match spec.restart_policy.mode {
        RestartPolicyMode::No => RestartPolicyNameEnum::NO,
        RestartPolicyMode::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicyMode::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicyMode::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: spec.restart_policy.max_retry_count.map(i64::from),
    }
}

fn mounts(spec: &ContainerSpec) -> Vec<Mount> {
    spec.mounts
        .iter()
        .map(|m| Mount {
            typ: Some(match m.mount_type {
                MountType::Bind => MountTypeEnum::BIND,
                MountType::Volume => MountTypeEnum::VOLUME,
                MountType::Tmpfs => MountTypeEnum::TMPFS,
            }),
            source: (!m.source.is_empty()).then(|| m.source.clone()),
            target: Some(m.target.clone()),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect()
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

/// Translate a container spec into the Docker create request
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &spec.ports {
        let key = format!("{}/{}", port.container_port, port.protocol);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings
            .entry(key)
            .or_default()
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: Some(port.host_port.to_string()),
            });
    }

    let (network_mode, networking_config) = match &spec.network_mode {
        NetworkMode::None => (Some("none".to_string()), None),
        NetworkMode::Container(owner) => (Some(format!("container:{}", owner)), None),
        NetworkMode::Bridge { network, ip } => {
            let endpoint = EndpointSettings {
                ipam_config: Some(EndpointIpamConfig {
                    ipv4_address: Some(ip.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mut endpoints_config = HashMap::new();
            endpoints_config.insert(network.clone(), endpoint);
            (
                Some(network.clone()),
                Some(NetworkingConfig { endpoints_config }),
            )
        }
    };

    // Docker rejects DNS settings for containers sharing another's stack
    let shares_stack = matches!(spec.network_mode, NetworkMode::Container(_));

    let host_config = HostConfig {
        mounts: (!spec.mounts.is_empty()).then(|| mounts(spec)),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        restart_policy: Some(restart_policy(spec)),
        auto_remove: Some(spec.auto_remove),
        network_mode,
        privileged: Some(spec.privileged),
        readonly_rootfs: Some(spec.read_only_rootfs),
        sysctls: (!spec.sysctls.is_empty())
            .then(|| spec.sysctls.clone().into_iter().collect()),
        cap_add: non_empty(&spec.cap_add),
        cap_drop: non_empty(&spec.cap_drop),
        dns: if shares_stack { None } else { non_empty(&spec.dns_servers) },
        dns_options: if shares_stack { None } else { non_empty(&spec.dns_options) },
        dns_search: if shares_stack { None } else { non_empty(&spec.dns_search) },
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        hostname: if shares_stack { None } else { spec.hostname.clone() },
        domainname: if shares_stack { None } else { spec.domainname.clone() },
        user: spec.user.clone(),
        env: non_empty(&spec.env),
        labels: Some(spec.labels.clone().into_iter().collect()),
        entrypoint: non_empty(&spec.entrypoint),
        cmd: non_empty(&spec.cmd),
        tty: Some(spec.tty),
        stop_signal: spec.stop_signal.clone(),
        stop_timeout: spec.stop_timeout.map(i64::from),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn pull_image(&self, image: &str, platform: &str) -> BoxStream<'_, Result<PullProgress>> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            platform: platform.to_string(),
            ..Default::default()
        };
        let image = image.to_string();

        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| {
                let info = item.map_err(|e| HomelabError::ImagePull {
                    image: image.clone(),
                    message: e.to_string(),
                })?;
                if let Some(message) = info.error {
                    return Err(HomelabError::ImagePull {
                        image: image.clone(),
                        message,
                    });
                }
                Ok(PullProgress {
                    status: info.status.unwrap_or_default(),
                    layer: info.id,
                    progress: info.progress,
                })
            })
            .boxed()
    }

    async fn list_images(&self, image: &str) -> Result<Vec<ImageSummary>> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let images = self
            .docker
            .list_images(Some(ListImagesOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(images
            .into_iter()
            .map(|summary| ImageSummary { id: summary.id })
            .collect())
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInspect>> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(network_inspect(name, network)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let mut options = HashMap::new();
        options.insert(
            BRIDGE_NAME_OPTION.to_string(),
            spec.host_interface_name.clone(),
        );

        let request = CreateNetworkOptions {
            name: spec.name.clone(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            ipam: Ipam {
                driver: Some("default".to_string()),
                config: Some(vec![DockerIpamConfig {
                    subnet: Some(spec.subnet.to_string()),
                    gateway: Some(spec.gateway.to_string()),
                    ..Default::default()
                }]),
                options: None,
            },
            options,
            labels: spec.labels.clone().into_iter().collect(),
            ..Default::default()
        };

        self.docker.create_network(request).await?;
        Ok(())
    }

    async fn connect_network(
        &self,
        container: &str,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        let request = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings {
                ipam_config: ip.map(|ip| EndpointIpamConfig {
                    ipv4_address: Some(ip.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };
        self.docker.connect_network(network, request).await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "{}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInspect>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => {
                let state = response
                    .state
                    .and_then(|s| s.status)
                    .map(ContainerState::from)
                    .unwrap_or(ContainerState::Dead);
                Ok(Some(ContainerInspect {
                    id: response.id.unwrap_or_default(),
                    image: response.image.unwrap_or_default(),
                    state,
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
