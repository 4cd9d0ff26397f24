//! Container management module
//!
//! This module turns resolved containers into runtime container specs and
//! reconciles them against the container runtime.

pub mod lifecycle;
pub mod spec;

pub use lifecycle::{ContainerReconciler, Stage, DEFAULT_POLL_INTERVAL};
pub use spec::{container_spec, network_mode, secondary_networks};
