//! Translation of a resolved container into a runtime container spec

use crate::config::{EnvMap, MountConfig};
use crate::deployment::{Container, Deployment, Network};
use crate::error::{HomelabError, Result};
use crate::runtime::{ContainerSpec, MountSpec, NetworkMode, PortSpec};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const GROUP_LABEL: &str = "homelab.group";
pub const CONTAINER_LABEL: &str = "homelab.container";

/// Substitution variables visible to `container`
pub fn container_env(deployment: &Deployment, container: &Container) -> EnvMap {
    let mut env = EnvMap::for_host(deployment.host());
    env.insert("CONTAINER_NAME", &container.name());
    env.extend(&deployment.global().env);
    env.extend(&container.config().config.env);
    env
}

/// Network mode used at creation time.
///
/// A non-owner member of a container mode network joins the owner's stack.
/// Otherwise the highest priority bridge endpoint is attached on create.
pub fn network_mode(deployment: &Deployment, container: &Container) -> NetworkMode {
    for endpoint in container.endpoints() {
        if let Some(Network::Container(stack)) = deployment.network(&endpoint.network) {
            match stack.owner() {
                Some(owner) if owner != container.reference() => {
                    return NetworkMode::Container(owner.full_name());
                }
                _ => {}
            }
        }
    }

    container
        .endpoints()
        .iter()
        .find_map(|endpoint| {
            endpoint.ip.map(|ip| NetworkMode::Bridge {
                network: endpoint.network.clone(),
                ip,
            })
        })
        .unwrap_or(NetworkMode::None)
}

/// Bridge networks connected after the container is created
pub fn secondary_networks(deployment: &Deployment, container: &Container) -> Vec<(String, Ipv4Addr)> {
    let primary = match network_mode(deployment, container) {
        NetworkMode::Bridge { network, .. } => network,
        NetworkMode::Container(_) | NetworkMode::None => return Vec::new(),
    };

    container
        .endpoints()
        .iter()
        .filter(|endpoint| endpoint.network != primary)
        .filter_map(|endpoint| endpoint.ip.map(|ip| (endpoint.network.clone(), ip)))
        .collect()
}

/// Build the runtime spec for `container`
pub fn container_spec(deployment: &Deployment, container: &Container) -> Result<ContainerSpec> {
    let config = container.config();
    let global = &deployment.global().container;
    let env = container_env(deployment, container);

    let mut labels: BTreeMap<String, String> = config
        .metadata
        .labels
        .iter()
        .map(|label| (label.name.clone(), env.expand(&label.value)))
        .collect();
    labels.insert(GROUP_LABEL.to_string(), config.info.group.clone());
    labels.insert(CONTAINER_LABEL.to_string(), config.info.container.clone());

    let user = match (&config.user.user, &config.user.primary_group) {
        (Some(user), Some(group)) => Some(format!("{}:{}", user, group)),
        (Some(user), None) => Some(user.clone()),
        (None, Some(group)) => Some(format!(":{}", group)),
        (None, None) => None,
    };

    let mounts = config
        .fs
        .mounts
        .iter()
        .map(|mount| resolve_mount(deployment, mount, &env))
        .collect::<Result<Vec<_>>>()?;

    let ports = config
        .network
        .published_ports
        .iter()
        .map(|port| PortSpec {
            container_port: port.container_port,
            protocol: port.proto,
            host_ip: port.host_ip.clone(),
            host_port: port.host_port,
        })
        .collect();

    let hostname = config
        .network
        .host_name
        .as_deref()
        .map(|name| env.expand(name))
        .unwrap_or_else(|| config.info.container.clone());
    let domainname = config
        .network
        .domain_name
        .as_deref()
        .or(global.domain_name.as_deref())
        .map(|name| env.expand(name));
    let dns_search = if config.network.dns_search.is_empty() {
        global.dns_search.clone()
    } else {
        config.network.dns_search.clone()
    };

    Ok(ContainerSpec {
        name: container.name(),
        image: crate::image::normalize_reference(container.image()),
        hostname: Some(hostname),
        domainname,
        user,
        env: config
            .runtime
            .env
            .iter()
            .map(|var| format!("{}={}", var.var, env.expand(&var.value)))
            .collect(),
        labels,
        entrypoint: config.runtime.entrypoint.iter().map(|a| env.expand(a)).collect(),
        cmd: config.runtime.args.iter().map(|a| env.expand(a)).collect(),
        tty: config.runtime.tty,
        stop_signal: global.stop_signal.clone(),
        stop_timeout: global.stop_timeout,
        mounts,
        ports,
        restart_policy: config
            .lifecycle
            .restart_policy
            .or(global.restart_policy)
            .unwrap_or_default(),
        auto_remove: config.lifecycle.auto_remove,
        privileged: config.security.privileged,
        read_only_rootfs: config.fs.read_only_rootfs,
        sysctls: config
            .security
            .sysctls
            .iter()
            .map(|s| (s.key.clone(), s.value.clone()))
            .collect(),
        cap_add: config.security.cap_add.clone(),
        cap_drop: config.security.cap_drop.clone(),
        dns_servers: config.network.dns_servers.clone(),
        dns_options: config.network.dns_options.clone(),
        dns_search,
        network_mode: network_mode(deployment, container),
    })
}

fn resolve_mount(deployment: &Deployment, mount: &MountConfig, env: &EnvMap) -> Result<MountSpec> {
    let mount = if mount.is_reference() {
        deployment
            .global()
            .mount_defs
            .iter()
            .find(|def| def.name == mount.name)
            .ok_or_else(|| {
                HomelabError::InvalidConfig(format!("Mount definition {} not found", mount.name))
            })?
    } else {
        mount
    };

    Ok(MountSpec {
        mount_type: mount.mount_type,
        source: env.expand(&mount.src),
        target: mount.dst.clone(),
        read_only: mount.read_only,
    })
}
