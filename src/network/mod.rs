//! Network management module
//!
//! Address management rules for declared networks and reconciliation of
//! those networks against the container runtime.

pub mod ipam;
pub mod reconcile;

pub use reconcile::NetworkReconciler;
