//! Declarative homelab configuration
//!
//! This module provides the config data model, loading and merging of
//! config files, `$$NAME$$` substitution, and structural validation.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

pub use env::EnvMap;
pub use parser::ConfigParser;
pub use types::{
    BridgeModeNetworkConfig, ContainerConfig, ContainerIpConfig, ContainerModeNetworkConfig,
    ContainerReference, EnvVar, GlobalConfig, GroupConfig, HomelabConfig, HostConfig, IpamConfig,
    MountConfig, MountType, NetworksConfig, Protocol, PublishedPortConfig, RestartPolicyConfig,
    RestartPolicyMode,
};
pub use validate::validate;
