//! IPAM validation and IPv4 prefix helpers

use crate::config::{
    BridgeModeNetworkConfig, ContainerModeNetworkConfig, ContainerReference, IpamConfig,
};
use crate::error::{HomelabError, Result};
use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

/// Longest usable prefix; a /31 or /32 leaves no room for a gateway and a container
pub const MAX_PREFIX_LEN: u8 = 30;

/// Linux limits interface names to 15 bytes
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

fn ipam_error(message: String) -> HomelabError {
    HomelabError::Ipam(message)
}

/// Parse a network CIDR such as `172.18.100.0/24`
pub fn parse_cidr(network: &str, cidr: &str) -> Result<Ipv4Network> {
    cidr.parse::<Ipv4Network>().map_err(|e| {
        ipam_error(format!(
            "Network {} has an invalid CIDR {}: {}",
            network, cidr, e
        ))
    })
}

/// Gateway address: the first host address after the network address
pub fn gateway(cidr: Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(cidr.network()) + 1)
}

/// Whether two prefixes share any address
pub fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Validate every declared network and container address.
/// Fails on the first violation.
pub fn validate(ipam: &IpamConfig) -> Result<()> {
    let networks = &ipam.networks;
    let mut names: HashSet<&str> = HashSet::new();
    let mut interfaces: HashSet<&str> = HashSet::new();
    let mut accepted: Vec<(&str, Ipv4Network)> = Vec::new();
    let mut bridged: HashSet<&ContainerReference> = HashSet::new();

    for network in &networks.bridge_mode_networks {
        if network.name.is_empty() {
            return Err(ipam_error("Network name cannot be empty".to_string()));
        }
        if !names.insert(network.name.as_str()) {
            return Err(ipam_error(format!(
                "Network {} defined more than once",
                network.name
            )));
        }
        validate_host_interface(network, &mut interfaces)?;

        let cidr = validate_cidr(network, &accepted)?;
        accepted.push((network.name.as_str(), cidr));

        validate_container_ips(network, cidr)?;
        bridged.extend(network.containers.iter().map(|c| &c.container));
    }

    let mut stacks: HashMap<&ContainerReference, &str> = HashMap::new();
    for network in &networks.container_mode_networks {
        if network.name.is_empty() {
            return Err(ipam_error("Network name cannot be empty".to_string()));
        }
        if !names.insert(network.name.as_str()) {
            return Err(ipam_error(format!(
                "Network {} defined more than once",
                network.name
            )));
        }
        validate_container_mode_members(network, &mut stacks, &bridged)?;
    }

    Ok(())
}

fn validate_host_interface<'a>(
    network: &'a BridgeModeNetworkConfig,
    interfaces: &mut HashSet<&'a str>,
) -> Result<()> {
    let iface = network.host_interface_name.as_str();
    if iface.is_empty() {
        return Err(ipam_error(format!(
            "Network {} has an empty host interface name",
            network.name
        )));
    }
    if iface.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ipam_error(format!(
            "Host interface name {} of network {} is longer than {} characters",
            iface, network.name, MAX_INTERFACE_NAME_LEN
        )));
    }
    if !interfaces.insert(iface) {
        return Err(ipam_error(format!(
            "Host interface name {} of network {} is already used by another network",
            iface, network.name
        )));
    }
    Ok(())
}

fn validate_cidr(
    network: &BridgeModeNetworkConfig,
    accepted: &[(&str, Ipv4Network)],
) -> Result<Ipv4Network> {
    let cidr = parse_cidr(&network.name, &network.cidr)?;

    if cidr.prefix() > MAX_PREFIX_LEN {
        return Err(ipam_error(format!(
            "CIDR {} of network {} has a prefix length {} longer than the allowed /{}",
            network.cidr,
            network.name,
            cidr.prefix(),
            MAX_PREFIX_LEN
        )));
    }
    if cidr.ip() != cidr.network() {
        return Err(ipam_error(format!(
            "CIDR {} of network {} is not a network address, did you mean {}/{}?",
            network.cidr,
            network.name,
            cidr.network(),
            cidr.prefix()
        )));
    }
    if !cidr.network().is_private() || !cidr.broadcast().is_private() {
        return Err(ipam_error(format!(
            "CIDR {} of network {} is not within a private (RFC1918) range",
            network.cidr, network.name
        )));
    }

    for (other_name, other) in accepted {
        if overlaps(cidr, *other) {
            return Err(ipam_error(format!(
                "CIDR {} of network {} overlaps with CIDR {} of network {}",
                network.cidr, network.name, other, other_name
            )));
        }
    }

    Ok(cidr)
}

fn validate_container_ips(network: &BridgeModeNetworkConfig, cidr: Ipv4Network) -> Result<()> {
    let gateway = gateway(cidr);
    let mut ips: HashMap<Ipv4Addr, &ContainerReference> = HashMap::new();
    let mut members: HashSet<&ContainerReference> = HashSet::new();

    for endpoint in &network.containers {
        let reference = &endpoint.container;
        let ip: Ipv4Addr = endpoint.ip.parse().map_err(|e| {
            ipam_error(format!(
                "Container {} in network {} has an invalid IP {}: {}",
                reference, network.name, endpoint.ip, e
            ))
        })?;

        if !cidr.contains(ip) {
            return Err(ipam_error(format!(
                "Container {} IP {} does not belong to the CIDR {} of network {}",
                reference, ip, network.cidr, network.name
            )));
        }
        if ip == cidr.network() {
            return Err(ipam_error(format!(
                "Container {} IP {} is the network address of network {}",
                reference, ip, network.name
            )));
        }
        if ip == gateway {
            return Err(ipam_error(format!(
                "Container {} IP {} is the gateway address of network {}",
                reference, ip, network.name
            )));
        }
        if ip == cidr.broadcast() {
            return Err(ipam_error(format!(
                "Container {} IP {} is the broadcast address of network {}",
                reference, ip, network.name
            )));
        }
        if let Some(existing) = ips.insert(ip, reference) {
            return Err(ipam_error(format!(
                "Container {} IP {} in network {} is already assigned to container {}",
                reference, ip, network.name, existing
            )));
        }
        if !members.insert(reference) {
            return Err(ipam_error(format!(
                "Container {} has more than one endpoint in network {}",
                reference, network.name
            )));
        }
    }

    Ok(())
}

fn validate_container_mode_members<'a>(
    network: &'a ContainerModeNetworkConfig,
    stacks: &mut HashMap<&'a ContainerReference, &'a str>,
    bridged: &HashSet<&ContainerReference>,
) -> Result<()> {
    for (i, reference) in network.containers.iter().enumerate() {
        if let Some(existing) = stacks.insert(reference, network.name.as_str()) {
            return Err(ipam_error(if existing == network.name {
                format!(
                    "Container {} listed more than once in network {}",
                    reference, network.name
                )
            } else {
                format!(
                    "Container {} cannot join container mode network {}, it already belongs to {}",
                    reference, network.name, existing
                )
            }));
        }
        if i > 0 && bridged.contains(reference) {
            return Err(ipam_error(format!(
                "Container {} joins the network stack of container mode network {} and cannot also have a bridge mode endpoint",
                reference, network.name
            )));
        }
    }
    Ok(())
}
