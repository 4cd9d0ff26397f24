//! In-memory [`ContainerRuntime`] recording every call

use super::{
    ContainerInspect, ContainerRuntime, ContainerSpec, ContainerState, ImageSummary,
    NetworkInspect, NetworkMode, NetworkSpec, PullProgress,
};
use crate::error::{HomelabError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// A runtime call, in the order it was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    PullImage(String),
    ListImages(String),
    InspectNetwork(String),
    CreateNetwork(String),
    ConnectNetwork {
        container: String,
        network: String,
        ip: Option<Ipv4Addr>,
    },
    CreateContainer(String),
    StartContainer(String),
    RemoveContainer(String),
    InspectContainer(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    image: String,
    state: ContainerState,
    /// Inspections left before a removing container disappears
    removing_polls: Option<usize>,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<Call>,
    /// image -> ID it has after a pull
    pullable: HashMap<String, String>,
    /// Pulls reporting success without storing the image
    phantom_pulls: HashSet<String>,
    local_images: HashMap<String, String>,
    networks: HashMap<String, NetworkInspect>,
    containers: HashMap<String, FakeContainer>,
    specs: Vec<ContainerSpec>,
    failing_creates: HashSet<String>,
    failing_connects: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pullable_image(self, image: &str, id: &str) -> Self {
        self.lock().pullable.insert(image.to_string(), id.to_string());
        self
    }

    pub fn with_local_image(self, image: &str, id: &str) -> Self {
        self.lock()
            .local_images
            .insert(image.to_string(), id.to_string());
        self
    }

    pub fn with_phantom_pull(self, image: &str) -> Self {
        self.lock().phantom_pulls.insert(image.to_string());
        self
    }

    pub fn with_network(self, name: &str, subnet: &str, gateway: &str) -> Self {
        self.lock().networks.insert(
            name.to_string(),
            NetworkInspect {
                name: name.to_string(),
                subnet: Some(subnet.to_string()),
                gateway: Some(gateway.to_string()),
            },
        );
        self
    }

    pub fn with_container(self, name: &str, state: ContainerState) -> Self {
        self.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                id: format!("id-{}", name),
                image: "sha256:existing".to_string(),
                state,
                removing_polls: None,
            },
        );
        self
    }

    /// A container in the removing state that disappears after `polls` inspections
    pub fn with_removing_container(self, name: &str, polls: usize) -> Self {
        self.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                id: format!("id-{}", name),
                image: "sha256:existing".to_string(),
                state: ContainerState::Removing,
                removing_polls: Some(polls),
            },
        );
        self
    }

    pub fn with_failing_create(self, name: &str) -> Self {
        self.lock().failing_creates.insert(name.to_string());
        self
    }

    /// Connecting any container to `network` fails
    pub fn with_failing_connect(self, network: &str) -> Self {
        self.lock().failing_connects.insert(network.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls that change runtime state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::PullImage(_)
                        | Call::CreateNetwork(_)
                        | Call::ConnectNetwork { .. }
                        | Call::CreateContainer(_)
                        | Call::StartContainer(_)
                        | Call::RemoveContainer(_)
                )
            })
            .collect()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.lock().specs.clone()
    }

    pub fn container_state(&self, name: &str) -> ContainerState {
        self.lock()
            .containers
            .get(name)
            .map(|c| c.state)
            .unwrap_or(ContainerState::NotFound)
    }

    pub fn network(&self, name: &str) -> Option<NetworkInspect> {
        self.lock().networks.get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake runtime lock poisoned")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn pull_image(&self, image: &str, _platform: &str) -> BoxStream<'_, Result<PullProgress>> {
        let mut state = self.lock();
        state.calls.push(Call::PullImage(image.to_string()));

        let events = if let Some(id) = state.pullable.get(image).cloned() {
            state.local_images.insert(image.to_string(), id.clone());
            vec![
                Ok(PullProgress {
                    status: "Pulling fs layer".to_string(),
                    layer: Some("layer1".to_string()),
                    progress: None,
                }),
                Ok(PullProgress {
                    status: format!("Digest: {}", id),
                    layer: None,
                    progress: None,
                }),
            ]
        } else if state.phantom_pulls.contains(image) {
            state.local_images.remove(image);
            vec![Ok(PullProgress {
                status: "Pull complete".to_string(),
                layer: None,
                progress: None,
            })]
        } else {
            vec![Err(HomelabError::ImagePull {
                image: image.to_string(),
                message: format!("pull access denied for {}, repository does not exist", image),
            })]
        };

        stream::iter(events).boxed()
    }

    async fn list_images(&self, image: &str) -> Result<Vec<ImageSummary>> {
        let mut state = self.lock();
        state.calls.push(Call::ListImages(image.to_string()));
        Ok(state
            .local_images
            .get(image)
            .map(|id| vec![ImageSummary { id: id.clone() }])
            .unwrap_or_default())
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInspect>> {
        let mut state = self.lock();
        state.calls.push(Call::InspectNetwork(name.to_string()));
        Ok(state.networks.get(name).cloned())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::CreateNetwork(spec.name.clone()));
        if state.networks.contains_key(&spec.name) {
            return Err(HomelabError::Network(format!(
                "network with name {} already exists",
                spec.name
            )));
        }
        state.networks.insert(
            spec.name.clone(),
            NetworkInspect {
                name: spec.name.clone(),
                subnet: Some(spec.subnet.to_string()),
                gateway: Some(spec.gateway.to_string()),
            },
        );
        Ok(())
    }

    async fn connect_network(
        &self,
        container: &str,
        network: &str,
        ip: Option<Ipv4Addr>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::ConnectNetwork {
            container: container.to_string(),
            network: network.to_string(),
            ip,
        });
        if state.failing_connects.contains(network) {
            return Err(HomelabError::Network(format!(
                "fake connect failure for {} on {}",
                container, network
            )));
        }
        if !state.networks.contains_key(network) {
            return Err(HomelabError::Network(format!("network {} not found", network)));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(Call::CreateContainer(spec.name.clone()));
        if state.failing_creates.contains(&spec.name) {
            return Err(HomelabError::Internal(format!(
                "fake create failure for {}",
                spec.name
            )));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(HomelabError::Network(format!(
                "container name {} is already in use",
                spec.name
            )));
        }
        if let NetworkMode::Container(owner) = &spec.network_mode {
            if !state.containers.contains_key(owner) {
                return Err(HomelabError::ContainerNotFound(owner.clone()));
            }
        }
        let id = format!("id-{}", spec.name);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                removing_polls: None,
            },
        );
        state.specs.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state
            .containers
            .iter_mut()
            .find(|(name, c)| c.id == id || name.as_str() == id);
        match container {
            Some((name, c)) => {
                c.state = ContainerState::Running;
                let name = name.clone();
                state.calls.push(Call::StartContainer(name));
                Ok(())
            }
            None => {
                state.calls.push(Call::StartContainer(id.to_string()));
                Err(HomelabError::ContainerNotFound(id.to_string()))
            }
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::RemoveContainer(name.to_string()));
        state.containers.remove(name);
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInspect>> {
        let mut state = self.lock();
        state.calls.push(Call::InspectContainer(name.to_string()));

        let gone = match state.containers.get_mut(name) {
            Some(container) => match container.removing_polls {
                Some(0) => true,
                Some(ref mut left) => {
                    *left -= 1;
                    false
                }
                None => false,
            },
            None => return Ok(None),
        };
        if gone {
            state.containers.remove(name);
            return Ok(None);
        }

        Ok(state.containers.get(name).map(|c| ContainerInspect {
            id: c.id.clone(),
            image: c.image.clone(),
            state: c.state,
        }))
    }
}
