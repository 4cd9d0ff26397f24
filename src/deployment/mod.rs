//! Deployment model
//!
//! Builds the deployment graph for the current host from a validated
//! config, orders its containers and runs them against the runtime.

pub mod coordinator;
pub mod graph;
pub mod order;

pub use coordinator::RunCoordinator;
pub use graph::{
    BridgeNetwork, Container, ContainerGroup, ContainerModeNetwork, Deployment, Network,
    NetworkEndpoint,
};
pub use order::order;
