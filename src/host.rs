//! Identity of the machine homelab runs on

use crate::error::{HomelabError, Result};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Host information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    /// Short host name, lowercased
    pub host_name: String,
    /// Short host name as reported by the OS
    pub human_friendly_host_name: String,
    /// Primary IPv4 address
    pub ip: Ipv4Addr,
    /// Number of logical CPUs
    pub num_cpus: usize,
    /// Operating system, e.g. `linux`
    pub os: String,
    /// Docker architecture name, e.g. `amd64`
    pub arch: String,
}

impl HostInfo {
    /// Discover the current host
    pub fn discover() -> Result<Self> {
        let raw = gethostname::gethostname().to_string_lossy().to_string();
        let short = raw.split('.').next().unwrap_or_default().to_string();
        if short.is_empty() {
            return Err(HomelabError::Host(format!(
                "Unable to determine host name from {:?}",
                raw
            )));
        }

        let ip = primary_ipv4().unwrap_or_else(|| {
            tracing::warn!("Unable to determine the primary IPv4 address, using loopback");
            Ipv4Addr::LOCALHOST
        });

        Ok(Self {
            host_name: short.to_lowercase(),
            human_friendly_host_name: short,
            ip,
            num_cpus: num_cpus::get(),
            os: std::env::consts::OS.to_string(),
            arch: docker_arch(std::env::consts::ARCH).to_string(),
        })
    }

    /// Platform string used when pulling images, e.g. `linux/amd64`.
    ///
    /// Images are always Linux images, also on Docker Desktop hosts.
    pub fn docker_platform(&self) -> String {
        format!("linux/{}", self.arch)
    }
}

/// Map a Rust target architecture to the Docker platform architecture
pub fn docker_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}

/// Address of the interface holding the default route. Connecting a UDP
/// socket sends no packets.
fn primary_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
