//! Runs the container reconciler over an ordered list of containers

use super::graph::{Container, Deployment};
use crate::container::ContainerReconciler;
use crate::error::{ContainerFailure, HomelabError, Result};
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Starts containers one at a time, collecting per-container failures
pub struct RunCoordinator<'a> {
    deployment: &'a Deployment,
    reconciler: ContainerReconciler,
    cancel: CancellationToken,
}

impl<'a> RunCoordinator<'a> {
    pub fn new(
        deployment: &'a Deployment,
        runtime: Arc<dyn ContainerRuntime>,
        cancel: CancellationToken,
    ) -> Self {
        let platform = deployment.host().docker_platform();
        Self {
            deployment,
            reconciler: ContainerReconciler::new(runtime, platform, cancel.clone()),
            cancel,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.reconciler = self.reconciler.with_poll_interval(interval);
        self
    }

    /// Start every container in `containers`, in the given order.
    ///
    /// Each container is attempted exactly once. Failures are collected into
    /// a single [`HomelabError::Deployment`]; fatal errors and cancellation
    /// end the run immediately.
    #[tracing::instrument(skip_all, fields(containers = containers.len()))]
    pub async fn run(&self, containers: &[&Container]) -> Result<()> {
        let mut failures = Vec::new();
        let mut started = 0;

        for container in containers {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(HomelabError::Cancelled(
                    "Deployment interrupted".to_string(),
                )),
                result = self.reconciler.start(self.deployment, container) => result,
            };

            match result {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(container = %container.name(), error = %e, "Failed to start container");
                    failures.push(ContainerFailure {
                        container: container.reference().clone(),
                        error: e,
                    });
                }
            }
        }

        tracing::info!(started, failed = failures.len(), "Finished starting containers");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HomelabError::Deployment { failures })
        }
    }
}
