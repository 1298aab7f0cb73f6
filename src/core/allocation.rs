//! Container → accelerator assignment, read from the kubelet every cycle.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::config::Config;
use crate::error::{ExporterError, Result};
use crate::platform::podresources::{
    ListPodResourcesRequest, ListPodResourcesResponse, PodResourcesListerClient,
};

/// Bound on dialing the kubelet socket. The List call itself has no deadline.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniquely identifies a container on this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ContainerId {
    pub fn new(namespace: &str, pod: &str, container: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Device identifiers allocated to each container during one cycle.
pub type Allocations = HashMap<ContainerId, Vec<String>>;

/// Source of the per-cycle allocation snapshot.
#[async_trait]
pub trait AllocationSource: Send + Sync + 'static {
    async fn resolve(&self) -> Result<Allocations>;
}

/// Build the allocation map from a pod resources listing.
///
/// Only device groups for `resource_name` with at least one id are kept. When a
/// container reports several matching groups, the last one wins.
pub fn allocations_from_response(
    response: &ListPodResourcesResponse,
    resource_name: &str,
) -> Allocations {
    let mut allocations = Allocations::new();

    for pod in &response.pod_resources {
        for container in &pod.containers {
            for group in &container.devices {
                if group.device_ids.is_empty() || group.resource_name != resource_name {
                    continue;
                }

                let id = ContainerId::new(&pod.namespace, &pod.name, &container.name);
                allocations.insert(id, group.device_ids.clone());
            }
        }
    }

    allocations
}

/// Reads allocations from the kubelet pod resources socket.
#[derive(Debug, Clone)]
pub struct AllocationResolver {
    socket_path: PathBuf,
    resource_name: String,
    connect_timeout: Duration,
}

impl AllocationResolver {
    pub fn new(socket_path: impl Into<PathBuf>, resource_name: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            resource_name: resource_name.into(),
            connect_timeout: CONNECTION_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.socket_path.clone(), config.resource_name.clone())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl AllocationSource for AllocationResolver {
    async fn resolve(&self) -> Result<Allocations> {
        let mut client =
            PodResourcesListerClient::connect(&self.socket_path, self.connect_timeout).await?;

        let response = client
            .list(ListPodResourcesRequest {})
            .await
            .map_err(|status| ExporterError::request(status.to_string()))?
            .into_inner();

        Ok(allocations_from_response(&response, &self.resource_name))
    }
}
