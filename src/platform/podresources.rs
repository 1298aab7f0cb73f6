//! Kubelet pod resources API (`v1alpha1.PodResourcesLister`) over a unix socket.
//!
//! Messages mirror `k8s.io/kubelet/pkg/apis/podresources/v1alpha1/api.proto`
//! and are declared directly with prost so the build does not need protoc.

use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::error::{ExporterError, Result};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPodResourcesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListPodResourcesResponse {
    #[prost(message, repeated, tag = "1")]
    pub pod_resources: Vec<PodResources>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PodResources {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(message, repeated, tag = "3")]
    pub containers: Vec<ContainerResources>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerResources {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub devices: Vec<ContainerDevices>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerDevices {
    #[prost(string, tag = "1")]
    pub resource_name: String,
    #[prost(string, repeated, tag = "2")]
    pub device_ids: Vec<String>,
}

const LIST_PATH: &str = "/v1alpha1.PodResourcesLister/List";

/// Client for the `PodResourcesLister` service.
#[derive(Debug, Clone)]
pub struct PodResourcesListerClient {
    inner: tonic::client::Grpc<Channel>,
}

impl PodResourcesListerClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Dial the kubelet socket, giving up after `timeout`.
    pub async fn connect(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let socket_path: PathBuf = socket_path.to_path_buf();

        // The URI is required by tonic but ignored by the connector
        let endpoint = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| ExporterError::connection(e.to_string()))?
            .connect_timeout(timeout);

        let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                let stream = UnixStream::connect(socket_path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }));

        let channel = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(ExporterError::connection(format!("{:?}", e))),
            Err(_) => {
                return Err(ExporterError::connection(format!(
                    "timed out after {:?}",
                    timeout
                )))
            }
        };

        Ok(Self::new(channel))
    }

    /// Full snapshot of device assignments for every pod on the node.
    pub async fn list(
        &mut self,
        request: ListPodResourcesRequest,
    ) -> std::result::Result<tonic::Response<ListPodResourcesResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {}", e)))?;

        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static(LIST_PATH);
        self.inner
            .unary(tonic::Request::new(request), path, codec)
            .await
    }
}
