//! homelab - declarative container deployment for a single Docker host
//!
//! homelab reads a set of YAML config files describing networks, hosts,
//! groups and containers, works out which containers belong on the current
//! host, and drives the Docker engine until they are running:
//!
//! - Config loading, merging and validation
//! - IP address management for bridge networks
//! - Deterministic start ordering by group and container order
//! - Idempotent network, image and container reconciliation
//! - Aggregated reporting of per-container failures

pub mod config;
pub mod container;
pub mod deployment;
pub mod error;
pub mod host;
pub mod image;
pub mod network;
pub mod runtime;

pub use error::{HomelabError, Result};
