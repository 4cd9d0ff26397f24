//! Structural validation of a merged config

use super::types::{
    ContainerConfig, ContainerReference, EnvVar, GlobalConfig, GroupConfig, HomelabConfig,
    HostConfig, MountConfig, MountType, RestartPolicyConfig, RestartPolicyMode,
};
use crate::error::{HomelabError, Result};
use crate::network::ipam;
use std::collections::{HashMap, HashSet};

/// Validate the whole config. Fails on the first violation.
pub fn validate(config: &HomelabConfig) -> Result<()> {
    validate_global(&config.global)?;
    ipam::validate(&config.ipam)?;
    validate_groups(&config.groups)?;
    let declared = validate_containers(config)?;
    validate_hosts(&config.hosts, &declared)?;
    validate_network_references(config, &declared)?;
    Ok(())
}

fn invalid(message: String) -> HomelabError {
    HomelabError::InvalidConfig(message)
}

fn validate_global(global: &GlobalConfig) -> Result<()> {
    let mut vars = HashSet::new();
    for env in &global.env {
        if env.var.is_empty() {
            return Err(invalid("Empty global env var name".to_string()));
        }
        if !vars.insert(env.var.as_str()) {
            return Err(invalid(format!(
                "Global env var {} specified more than once",
                env.var
            )));
        }
    }

    let mut mounts = HashSet::new();
    for mount in &global.mount_defs {
        if mount.name.is_empty() {
            return Err(invalid("Empty global mount definition name".to_string()));
        }
        if !mounts.insert(mount.name.as_str()) {
            return Err(invalid(format!(
                "Global mount definition {} specified more than once",
                mount.name
            )));
        }
        if mount.is_reference() {
            return Err(invalid(format!(
                "Global mount definition {} must specify src and dst",
                mount.name
            )));
        }
        validate_mount(mount, "global mount definitions")?;
    }

    if let Some(policy) = &global.container.restart_policy {
        validate_restart_policy(policy, "global container config")?;
    }

    Ok(())
}

fn validate_groups(groups: &[GroupConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for group in groups {
        if group.name.is_empty() {
            return Err(invalid("Group name cannot be empty".to_string()));
        }
        if !names.insert(group.name.as_str()) {
            return Err(invalid(format!(
                "Group {} defined more than once",
                group.name
            )));
        }
        if group.order <= 0 {
            return Err(invalid(format!(
                "Group {} cannot have a non-positive order {}",
                group.name, group.order
            )));
        }
    }
    Ok(())
}

/// Validates every container and returns the set of declared references
fn validate_containers(config: &HomelabConfig) -> Result<HashSet<ContainerReference>> {
    let groups: HashSet<&str> = config.groups.iter().map(|g| g.name.as_str()).collect();
    let mount_defs: HashMap<&str, &MountConfig> = config
        .global
        .mount_defs
        .iter()
        .map(|m| (m.name.as_str(), m))
        .collect();

    let mut declared = HashSet::new();
    for container in &config.containers {
        validate_container(container, &groups, &mount_defs)?;
        if !declared.insert(container.info.clone()) {
            return Err(invalid(format!(
                "Container {} defined more than once",
                container.info
            )));
        }
    }
    Ok(declared)
}

fn validate_container(
    container: &ContainerConfig,
    groups: &HashSet<&str>,
    mount_defs: &HashMap<&str, &MountConfig>,
) -> Result<()> {
    let info = &container.info;
    if info.group.is_empty() {
        return Err(invalid(format!(
            "Container {:?} has an empty group name",
            info.container
        )));
    }
    if info.container.is_empty() {
        return Err(invalid(format!(
            "Container in group {} has an empty container name",
            info.group
        )));
    }
    if !groups.contains(info.group.as_str()) {
        return Err(invalid(format!(
            "Container {} refers to undefined group {}",
            info, info.group
        )));
    }
    if container.image.image.is_empty() {
        return Err(invalid(format!("Container {} has an empty image", info)));
    }
    if container.lifecycle.order <= 0 {
        return Err(invalid(format!(
            "Container {} cannot have a non-positive order {}",
            info, container.lifecycle.order
        )));
    }
    if let Some(policy) = &container.lifecycle.restart_policy {
        validate_restart_policy(policy, &format!("container {}", info))?;
    }

    // config.env and runtime.env are separate namespaces
    validate_unique_env(&container.config.env, info, "config.env")?;
    validate_unique_env(&container.runtime.env, info, "runtime.env")?;

    let mut labels = HashSet::new();
    for label in &container.metadata.labels {
        if label.name.is_empty() {
            return Err(invalid(format!("Container {} has an empty label name", info)));
        }
        if !labels.insert(label.name.as_str()) {
            return Err(invalid(format!(
                "Label {} specified more than once in container {}",
                label.name, info
            )));
        }
    }

    let mut destinations = HashSet::new();
    for mount in &container.fs.mounts {
        let resolved = if mount.is_reference() {
            *mount_defs.get(mount.name.as_str()).ok_or_else(|| {
                invalid(format!(
                    "Container {} refers to undefined mount definition {}",
                    info, mount.name
                ))
            })?
        } else {
            validate_mount(mount, &format!("container {}", info))?;
            mount
        };
        if !destinations.insert(resolved.dst.as_str()) {
            return Err(invalid(format!(
                "Mount destination {} specified more than once in container {}",
                resolved.dst, info
            )));
        }
    }

    for port in &container.network.published_ports {
        if port.container_port == 0 || port.host_port == 0 {
            return Err(invalid(format!(
                "Published port {}:{}/{} in container {} must use non-zero ports",
                port.host_port, port.container_port, port.proto, info
            )));
        }
    }

    Ok(())
}

fn validate_unique_env(
    vars: &[EnvVar],
    info: &ContainerReference,
    section: &str,
) -> Result<()> {
    let mut seen = HashSet::new();
    for var in vars {
        if var.var.is_empty() {
            return Err(invalid(format!(
                "Empty env var name in {} of container {}",
                section, info
            )));
        }
        if !seen.insert(var.var.as_str()) {
            return Err(invalid(format!(
                "Env var {} specified more than once in {} of container {}",
                var.var, section, info
            )));
        }
    }
    Ok(())
}

fn validate_mount(mount: &MountConfig, location: &str) -> Result<()> {
    if mount.name.is_empty() {
        return Err(invalid(format!("Mount with an empty name in {}", location)));
    }
    if mount.dst.is_empty() {
        return Err(invalid(format!(
            "Mount {} in {} has an empty dst",
            mount.name, location
        )));
    }
    if mount.src.is_empty() && mount.mount_type != MountType::Tmpfs {
        return Err(invalid(format!(
            "Mount {} in {} has an empty src",
            mount.name, location
        )));
    }
    Ok(())
}

fn validate_restart_policy(policy: &RestartPolicyConfig, location: &str) -> Result<()> {
    if let Some(count) = policy.max_retry_count {
        if policy.mode != RestartPolicyMode::OnFailure {
            return Err(invalid(format!(
                "Restart policy max retry count ({}) in {} can only be set with the on-failure mode, not {}",
                count, location, policy.mode
            )));
        }
        if count == 0 {
            return Err(invalid(format!(
                "Restart policy max retry count in {} must be positive",
                location
            )));
        }
    }
    Ok(())
}

fn validate_hosts(hosts: &[HostConfig], declared: &HashSet<ContainerReference>) -> Result<()> {
    let mut names = HashSet::new();
    for host in hosts {
        if host.name.is_empty() {
            return Err(invalid("Host name cannot be empty".to_string()));
        }
        if !names.insert(host.name.to_lowercase()) {
            return Err(invalid(format!(
                "Host {} defined more than once",
                host.name
            )));
        }

        let mut allowed = HashSet::new();
        for reference in &host.allowed_containers {
            if !declared.contains(reference) {
                return Err(invalid(format!(
                    "Host {} allows undefined container {}",
                    host.name, reference
                )));
            }
            if !allowed.insert(reference) {
                return Err(invalid(format!(
                    "Container {} listed more than once in allowed containers of host {}",
                    reference, host.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_network_references(
    config: &HomelabConfig,
    declared: &HashSet<ContainerReference>,
) -> Result<()> {
    let networks = &config.ipam.networks;
    for network in &networks.bridge_mode_networks {
        for endpoint in &network.containers {
            if !declared.contains(&endpoint.container) {
                return Err(invalid(format!(
                    "Network {} refers to undefined container {}",
                    network.name, endpoint.container
                )));
            }
        }
    }
    for network in &networks.container_mode_networks {
        for reference in &network.containers {
            if !declared.contains(reference) {
                return Err(invalid(format!(
                    "Network {} refers to undefined container {}",
                    network.name, reference
                )));
            }
        }
    }
    validate_stack_owners(config)
}

/// Members of a container mode network join the owner's stack, so the owner
/// has to start first.
fn validate_stack_owners(config: &HomelabConfig) -> Result<()> {
    let group_orders: HashMap<&str, i32> = config
        .groups
        .iter()
        .map(|g| (g.name.as_str(), g.order))
        .collect();
    let start_key = |reference: &ContainerReference| {
        let order = config
            .containers
            .iter()
            .find(|c| c.info == *reference)
            .map(|c| c.lifecycle.order)
            .unwrap_or_default();
        let group_order = group_orders
            .get(reference.group.as_str())
            .copied()
            .unwrap_or_default();
        (group_order, order, reference.full_name())
    };

    for network in &config.ipam.networks.container_mode_networks {
        let Some((owner, members)) = network.containers.split_first() else {
            continue;
        };
        let owner_key = start_key(owner);
        for member in members {
            if start_key(member) < owner_key {
                return Err(invalid(format!(
                    "Container {} joins the network stack of {} in network {} but starts before it",
                    member, owner, network.name
                )));
            }
        }
    }
    Ok(())
}
