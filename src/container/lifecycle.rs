//! Container lifecycle reconciliation
//!
//! [`ContainerReconciler::start`] brings one container to the running state
//! from whatever state the runtime reports for it.

use super::spec::{container_env, container_spec, network_mode, secondary_networks};
use crate::config::EnvMap;
use crate::deployment::{Container, Deployment};
use crate::error::{HomelabError, Result};
use crate::image::ImageResolver;
use crate::network::NetworkReconciler;
use crate::runtime::{ContainerInspect, ContainerRuntime, ContainerState, NetworkMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Interval between state checks while waiting on the runtime
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A step of the start pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pull,
    PrestartHook,
    PurgeStale,
    Networks,
    Create,
    Connect,
    Start,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pull => "pull",
            Stage::PrestartHook => "prestart-hook",
            Stage::PurgeStale => "purge-stale",
            Stage::Networks => "networks",
            Stage::Create => "create",
            Stage::Connect => "connect",
            Stage::Start => "start",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attach the stage to a per-container error. Fatal errors and image pull
/// failures pass through unchanged.
fn stage_error(stage: Stage, container: &str, err: HomelabError) -> HomelabError {
    match err {
        err if err.is_fatal() => err,
        err @ HomelabError::ImagePull { .. } => err,
        err => HomelabError::Stage {
            stage: stage.as_str(),
            container: container.to_string(),
            message: err.to_string(),
        },
    }
}

/// Drives single containers to the running state
pub struct ContainerReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    images: ImageResolver,
    networks: NetworkReconciler,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl ContainerReconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        platform: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            images: ImageResolver::new(runtime.clone(), platform),
            networks: NetworkReconciler::new(runtime.clone()),
            runtime,
            cancel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start `container` unless it is already up.
    ///
    /// Returns `Ok(true)` when the container was started, `Ok(false)` when it
    /// was already running or is not allowed on this host.
    #[tracing::instrument(skip_all, fields(container = %container.name()))]
    pub async fn start(&self, deployment: &Deployment, container: &Container) -> Result<bool> {
        if !container.is_allowed_on_host() {
            tracing::warn!(
                host = %deployment.host().host_name,
                "Container is not allowed to run on this host, skipping"
            );
            return Ok(false);
        }

        let name = container.name();
        let mut observed = self.inspect(&name).await?;
        loop {
            let state = observed
                .as_ref()
                .map(|c| c.state)
                .unwrap_or(ContainerState::NotFound);

            match state {
                ContainerState::Running | ContainerState::Paused | ContainerState::Restarting => {
                    tracing::info!(%state, "Container is already up");
                    return Ok(false);
                }
                ContainerState::Created => {
                    let id = observed.map(|c| c.id).unwrap_or_else(|| name.clone());
                    tracing::debug!("Starting previously created container");
                    self.runtime
                        .start_container(&id)
                        .await
                        .map_err(|e| stage_error(Stage::Start, &name, e))?;
                    tracing::info!("Started container");
                    return Ok(true);
                }
                ContainerState::Removing => {
                    tracing::debug!("Container is being removed, waiting");
                    self.pause(&name).await?;
                    observed = self.inspect(&name).await?;
                }
                ContainerState::NotFound => {
                    self.create_and_start(deployment, container, false).await?;
                    return Ok(true);
                }
                ContainerState::Exited | ContainerState::Dead => {
                    tracing::info!(%state, "Replacing stale container");
                    self.create_and_start(deployment, container, true).await?;
                    return Ok(true);
                }
            }
        }
    }

    /// pull, prestart-hook, purge-stale, networks, create, connect, start
    async fn create_and_start(
        &self,
        deployment: &Deployment,
        container: &Container,
        stale: bool,
    ) -> Result<()> {
        let name = container.name();
        let config = container.config();

        self.images
            .ensure(&config.image)
            .await
            .map_err(|e| stage_error(Stage::Pull, &name, e))?;

        if let Some(hook) = &config.lifecycle.start_pre_hook {
            let env = container_env(deployment, container);
            self.run_hook(hook, &env)
                .await
                .map_err(|e| stage_error(Stage::PrestartHook, &name, e))?;
        }

        if stale {
            self.purge(&name)
                .await
                .map_err(|e| stage_error(Stage::PurgeStale, &name, e))?;
        }

        for endpoint in container.endpoints() {
            let network = deployment.network(&endpoint.network).ok_or_else(|| {
                HomelabError::Internal(format!(
                    "Container {} refers to unknown network {}",
                    name, endpoint.network
                ))
            })?;
            self.networks
                .ensure(network)
                .await
                .map_err(|e| stage_error(Stage::Networks, &name, e))?;
        }
        if let NetworkMode::Container(owner) = network_mode(deployment, container) {
            self.check_stack_owner(&owner)
                .await
                .map_err(|e| stage_error(Stage::Networks, &name, e))?;
        }

        let spec = container_spec(deployment, container)
            .map_err(|e| stage_error(Stage::Create, &name, e))?;
        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| stage_error(Stage::Create, &name, e))?;
        tracing::debug!(%id, "Created container");

        for (network, ip) in secondary_networks(deployment, container) {
            self.runtime
                .connect_network(&name, &network, Some(ip))
                .await
                .map_err(|e| stage_error(Stage::Connect, &name, e))?;
            tracing::debug!(%network, %ip, "Connected container to network");
        }

        self.runtime
            .start_container(&id)
            .await
            .map_err(|e| stage_error(Stage::Start, &name, e))?;
        tracing::info!("Started container");
        Ok(())
    }

    async fn run_hook(&self, hook: &str, env: &EnvMap) -> Result<()> {
        let hook = env.expand(hook);
        tracing::debug!(%hook, "Running pre-start hook");

        let mut command = Command::new("sh");
        command.arg("-c").arg(&hook).kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(HomelabError::Cancelled(format!("Pre-start hook {} was interrupted", hook)));
            }
            output = command.output() => output?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HomelabError::Host(format!(
                "Pre-start hook `{}` failed with {}: {}",
                hook,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// A container mode member can only be created once its owner is running
    async fn check_stack_owner(&self, owner: &str) -> Result<()> {
        match self.inspect(owner).await? {
            Some(existing) if existing.state == ContainerState::Running => Ok(()),
            Some(existing) => Err(HomelabError::Network(format!(
                "Network stack owner {} is {}, not running",
                owner, existing.state
            ))),
            None => Err(HomelabError::Network(format!(
                "Network stack owner {} does not exist",
                owner
            ))),
        }
    }

    /// Remove a stale container and wait until the runtime no longer knows it
    async fn purge(&self, name: &str) -> Result<()> {
        self.runtime.remove_container(name).await?;
        while let Some(existing) = self.inspect(name).await? {
            tracing::debug!(state = %existing.state, "Waiting for stale container to disappear");
            self.pause(name).await?;
        }
        tracing::debug!("Removed stale container");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInspect>> {
        self.runtime.inspect_container(name).await
    }

    /// Sleep for one poll interval unless the run is cancelled first
    async fn pause(&self, name: &str) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HomelabError::Cancelled(format!(
                "Stopped waiting for container {}",
                name
            ))),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::graph::tests::{fake_host, sample_deployment, SAMPLE};
    use crate::config::ConfigParser;
    use crate::runtime::fake::{Call, FakeRuntime};

    fn reconciler(runtime: &Arc<FakeRuntime>) -> ContainerReconciler {
        ContainerReconciler::new(runtime.clone(), "linux/amd64", CancellationToken::new())
            .with_poll_interval(Duration::from_millis(5))
    }

    fn c1_runtime() -> FakeRuntime {
        FakeRuntime::new().with_pullable_image("abc/xyz:latest", "sha256:1")
    }

    #[tokio::test]
    async fn test_not_found_runs_full_pipeline() {
        let deployment = sample_deployment();
        let runtime = Arc::new(c1_runtime());
        let container = deployment.query_container("g1", "c1").unwrap();

        assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert_eq!(
            runtime.mutations(),
            vec![
                Call::PullImage("abc/xyz:latest".to_string()),
                Call::CreateNetwork("net1".to_string()),
                Call::CreateContainer("g1-c1".to_string()),
                Call::StartContainer("g1-c1".to_string()),
            ]
        );
        assert_eq!(runtime.container_state("g1-c1"), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_not_allowed_on_host() {
        let deployment = sample_deployment();
        let runtime = Arc::new(FakeRuntime::new());
        let container = deployment.query_container("g1", "c2").unwrap();

        assert!(!reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_already_up_is_idempotent() {
        let deployment = sample_deployment();
        let container = deployment.query_container("g1", "c1").unwrap();

        for state in [
            ContainerState::Running,
            ContainerState::Paused,
            ContainerState::Restarting,
        ] {
            let runtime = Arc::new(c1_runtime().with_container("g1-c1", state));
            assert!(!reconciler(&runtime).start(&deployment, container).await.unwrap());
            assert!(runtime.mutations().is_empty(), "state {state}");
        }
    }

    #[tokio::test]
    async fn test_created_is_only_started() {
        let deployment = sample_deployment();
        let runtime = Arc::new(c1_runtime().with_container("g1-c1", ContainerState::Created));
        let container = deployment.query_container("g1", "c1").unwrap();

        assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert_eq!(
            runtime.mutations(),
            vec![Call::StartContainer("g1-c1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_removing_converges_to_running() {
        let deployment = sample_deployment();
        let runtime = Arc::new(c1_runtime().with_removing_container("g1-c1", 2));
        let container = deployment.query_container("g1", "c1").unwrap();

        assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert_eq!(runtime.container_state("g1-c1"), ContainerState::Running);
        assert!(runtime
            .mutations()
            .contains(&Call::CreateContainer("g1-c1".to_string())));
    }

    #[tokio::test]
    async fn test_removing_wait_is_cancellable() {
        let deployment = sample_deployment();
        let runtime = Arc::new(c1_runtime().with_removing_container("g1-c1", usize::MAX));
        let container = deployment.query_container("g1", "c1").unwrap();
        let cancel = CancellationToken::new();
        let reconciler = ContainerReconciler::new(runtime.clone(), "linux/amd64", cancel.clone())
            .with_poll_interval(Duration::from_secs(3600));

        cancel.cancel();
        let err = reconciler.start(&deployment, container).await.unwrap_err();
        assert!(matches!(err, HomelabError::Cancelled(_)));
        assert!(runtime.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_exited_is_purged_and_recreated() {
        let deployment = sample_deployment();
        let container = deployment.query_container("g1", "c1").unwrap();

        for state in [ContainerState::Exited, ContainerState::Dead] {
            let runtime = Arc::new(c1_runtime().with_container("g1-c1", state));
            assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
            assert_eq!(
                runtime.mutations(),
                vec![
                    Call::PullImage("abc/xyz:latest".to_string()),
                    Call::RemoveContainer("g1-c1".to_string()),
                    Call::CreateNetwork("net1".to_string()),
                    Call::CreateContainer("g1-c1".to_string()),
                    Call::StartContainer("g1-c1".to_string()),
                ],
                "state {state}"
            );
        }
    }

    #[tokio::test]
    async fn test_pull_failure_stops_pipeline() {
        let deployment = sample_deployment();
        let runtime = Arc::new(FakeRuntime::new());
        let container = deployment.query_container("g1", "c1").unwrap();

        let err = reconciler(&runtime)
            .start(&deployment, container)
            .await
            .unwrap_err();
        assert!(matches!(err, HomelabError::ImagePull { .. }));
        assert_eq!(
            runtime.mutations(),
            vec![Call::PullImage("abc/xyz:latest".to_string())]
        );
    }

    #[tokio::test]
    async fn test_create_failure_names_stage() {
        let deployment = sample_deployment();
        let runtime = Arc::new(c1_runtime().with_failing_create("g1-c1"));
        let container = deployment.query_container("g1", "c1").unwrap();

        let err = reconciler(&runtime)
            .start(&deployment, container)
            .await
            .unwrap_err();
        match err {
            HomelabError::Stage { stage, container, .. } => {
                assert_eq!(stage, "create");
                assert_eq!(container, "g1-c1");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// c1 on net1 and net2
    fn dual_homed() -> Deployment {
        let mut config = ConfigParser::parse_str(SAMPLE).unwrap();
        config.ipam.networks.bridge_mode_networks[1]
            .containers
            .push(crate::config::ContainerIpConfig {
                ip: "172.18.101.11".to_string(),
                container: crate::config::ContainerReference::new("g1", "c1"),
            });
        Deployment::build(&config, &fake_host()).unwrap()
    }

    #[tokio::test]
    async fn test_secondary_network_connected_before_start() {
        let deployment = dual_homed();
        let runtime = Arc::new(c1_runtime());
        let container = deployment.query_container("g1", "c1").unwrap();

        assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert_eq!(
            runtime.mutations(),
            vec![
                Call::PullImage("abc/xyz:latest".to_string()),
                Call::CreateNetwork("net1".to_string()),
                Call::CreateNetwork("net2".to_string()),
                Call::CreateContainer("g1-c1".to_string()),
                Call::ConnectNetwork {
                    container: "g1-c1".to_string(),
                    network: "net2".to_string(),
                    ip: Some(std::net::Ipv4Addr::new(172, 18, 101, 11)),
                },
                Call::StartContainer("g1-c1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_names_stage() {
        let deployment = dual_homed();
        let runtime = Arc::new(c1_runtime().with_failing_connect("net2"));
        let container = deployment.query_container("g1", "c1").unwrap();

        let err = reconciler(&runtime)
            .start(&deployment, container)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            HomelabError::Stage { stage: "connect", container, .. } if container == "g1-c1"
        ));
        assert!(!runtime
            .mutations()
            .contains(&Call::StartContainer("g1-c1".to_string())));
    }

    /// g1-c2 shares the network stack of g1-c1
    fn shared_stack() -> Deployment {
        let extra = r#"
ipam:
  networks:
    containerModeNetworks:
      - name: vpn
        containers:
          - group: g1
            container: c1
          - group: g1
            container: c2
"#;
        let mut config = ConfigParser::merge_configs(
            ConfigParser::parse_str(SAMPLE).unwrap(),
            ConfigParser::parse_str(extra).unwrap(),
        );
        config.ipam.networks.bridge_mode_networks[0]
            .containers
            .retain(|e| e.container.container != "c2");
        config.hosts[0]
            .allowed_containers
            .push(crate::config::ContainerReference::new("g1", "c2"));
        Deployment::build(&config, &fake_host()).unwrap()
    }

    fn c2_runtime() -> FakeRuntime {
        FakeRuntime::new().with_pullable_image("abc/xyz2:latest", "sha256:2")
    }

    #[tokio::test]
    async fn test_stack_member_waits_for_owner() {
        let deployment = shared_stack();
        let member = deployment.query_container("g1", "c2").unwrap();

        let runtime = Arc::new(c2_runtime());
        let err = reconciler(&runtime)
            .start(&deployment, member)
            .await
            .unwrap_err();
        assert!(matches!(err, HomelabError::Stage { stage: "networks", .. }));
        assert!(err.to_string().contains("g1-c1 does not exist"));
        assert!(!runtime
            .mutations()
            .contains(&Call::CreateContainer("g1-c2".to_string())));

        let runtime = Arc::new(c2_runtime().with_container("g1-c1", ContainerState::Exited));
        let err = reconciler(&runtime)
            .start(&deployment, member)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("g1-c1 is exited, not running"));
    }

    #[tokio::test]
    async fn test_stack_member_joins_running_owner() {
        let deployment = shared_stack();
        let member = deployment.query_container("g1", "c2").unwrap();
        let runtime = Arc::new(c2_runtime().with_container("g1-c1", ContainerState::Running));

        assert!(reconciler(&runtime).start(&deployment, member).await.unwrap());
        assert_eq!(
            runtime.specs()[0].network_mode,
            crate::runtime::NetworkMode::Container("g1-c1".to_string())
        );
        assert_eq!(runtime.container_state("g1-c2"), ContainerState::Running);
    }

    fn with_hook(hook: &str) -> Deployment {
        let mut config = ConfigParser::parse_str(SAMPLE).unwrap();
        config.containers[0].lifecycle.start_pre_hook = Some(hook.to_string());
        Deployment::build(&config, &fake_host()).unwrap()
    }

    #[tokio::test]
    async fn test_prestart_hook_runs_before_create() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("marker");
        let deployment = with_hook(&format!("echo $$CONTAINER_NAME$$ > {}", marker.display()));
        let runtime = Arc::new(c1_runtime());
        let container = deployment.query_container("g1", "c1").unwrap();

        assert!(reconciler(&runtime).start(&deployment, container).await.unwrap());
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "g1-c1");
    }

    #[tokio::test]
    async fn test_failing_prestart_hook() {
        let deployment = with_hook("echo broken >&2; exit 3");
        let runtime = Arc::new(c1_runtime());
        let container = deployment.query_container("g1", "c1").unwrap();

        let err = reconciler(&runtime)
            .start(&deployment, container)
            .await
            .unwrap_err();
        assert!(matches!(err, HomelabError::Stage { stage: "prestart-hook", .. }));
        assert!(err.to_string().contains("broken"));
        assert!(!runtime
            .mutations()
            .contains(&Call::CreateContainer("g1-c1".to_string())));
    }
}
