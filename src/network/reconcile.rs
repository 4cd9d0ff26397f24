//! Idempotent creation of declared networks

use crate::deployment::{BridgeNetwork, Network};
use crate::error::{HomelabError, Result};
use crate::runtime::{ContainerRuntime, NetworkInspect, NetworkSpec};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// Label set on every network homelab creates
pub const MANAGED_LABEL: &str = "homelab.managed";

/// Ensures networks exist on the runtime, checking each one at most once per run
pub struct NetworkReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    ensured: Mutex<HashSet<String>>,
}

impl NetworkReconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    /// Make sure `network` exists, creating it when absent
    #[tracing::instrument(skip_all, fields(network = %network.name()))]
    pub async fn ensure(&self, network: &Network) -> Result<()> {
        if self.is_ensured(network.name())? {
            return Ok(());
        }

        match network {
            Network::Bridge(bridge) => self.ensure_bridge(bridge).await?,
            Network::Container(_) => {
                tracing::debug!("Container mode network has no runtime object");
            }
        }

        self.ensured
            .lock()
            .map_err(|_| HomelabError::Internal("Network set lock poisoned".to_string()))?
            .insert(network.name().to_string());
        Ok(())
    }

    fn is_ensured(&self, name: &str) -> Result<bool> {
        let ensured = self
            .ensured
            .lock()
            .map_err(|_| HomelabError::Internal("Network set lock poisoned".to_string()))?;
        Ok(ensured.contains(name))
    }

    async fn ensure_bridge(&self, network: &BridgeNetwork) -> Result<()> {
        if let Some(existing) = self.runtime.inspect_network(&network.name).await? {
            tracing::debug!("Network already exists");
            warn_on_drift(network, &existing);
            return Ok(());
        }

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        let spec = NetworkSpec {
            name: network.name.clone(),
            subnet: network.cidr,
            gateway: network.gateway,
            host_interface_name: network.host_interface_name.clone(),
            labels,
        };

        self.runtime.create_network(&spec).await.map_err(|e| {
            HomelabError::Network(format!("Failed to create network {}: {}", network.name, e))
        })?;
        tracing::info!(cidr = %network.cidr, "Created network");
        Ok(())
    }
}

/// Log when an existing network disagrees with its declaration
fn warn_on_drift(network: &BridgeNetwork, existing: &NetworkInspect) {
    let declared_subnet = network.cidr.to_string();
    if let Some(subnet) = &existing.subnet {
        if *subnet != declared_subnet {
            tracing::warn!(
                declared = %declared_subnet,
                actual = %subnet,
                "Existing network subnet differs from the config, leaving it as is"
            );
        }
    }

    let declared_gateway = network.gateway.to_string();
    if let Some(gateway) = &existing.gateway {
        if *gateway != declared_gateway {
            tracing::warn!(
                declared = %declared_gateway,
                actual = %gateway,
                "Existing network gateway differs from the config, leaving it as is"
            );
        }
    }
}
