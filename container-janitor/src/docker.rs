//! `EngineGateway` backed by the Docker Engine API, through bollard.
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{ListContainersOptions, RemoveContainerOptionsBuilder};
use bollard::{Docker, API_DEFAULT_VERSION};
use tracing::debug;

use crate::engine::{ContainerRef, EngineError, EngineGateway, Endpoint, RemoveOptions};
use crate::labels::LabelPredicate;

pub struct DockerGateway {
    /// Request timeout applied to every API call.
    timeout_secs: u64,
}

impl DockerGateway {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn client(&self, endpoint: &Endpoint) -> Result<Docker, BollardError> {
        match endpoint {
            Endpoint::PlatformDefault => Docker::connect_with_defaults(),
            Endpoint::Uri(uri) => {
                if let Some(path) = uri.strip_prefix("unix://") {
                    Docker::connect_with_socket(path, self.timeout_secs, API_DEFAULT_VERSION)
                } else {
                    Docker::connect_with_http(uri, self.timeout_secs, API_DEFAULT_VERSION)
                }
            }
        }
    }
}

fn is_not_found_error(error: &BollardError) -> bool {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code == 404,
        _ => false,
    }
}

#[async_trait]
impl EngineGateway for DockerGateway {
    type Handle = Docker;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Docker, EngineError> {
        self.client(endpoint).map_err(|e| EngineError::Connect {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn ping(&self, handle: &Docker) -> Result<(), EngineError> {
        let response = handle
            .ping()
            .await
            .map_err(|e| EngineError::Ping(e.to_string()))?;
        debug!(response = %response, "engine ping");
        Ok(())
    }

    async fn list_containers(
        &self,
        handle: &Docker,
        predicate: &LabelPredicate,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRef>, EngineError> {
        let options = ListContainersOptions {
            all: include_stopped,
            filters: Some(predicate.to_filters()),
            ..Default::default()
        };

        let containers = handle
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::List(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|container| container.id)
            .map(ContainerRef::new)
            .collect())
    }

    async fn remove_container(
        &self,
        handle: &Docker,
        container: &ContainerRef,
        options: RemoveOptions,
    ) -> Result<(), EngineError> {
        let options = RemoveContainerOptionsBuilder::new()
            .force(options.force)
            .v(options.remove_volumes)
            .build();

        match handle.remove_container(container.id(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found_error(&e) => Err(EngineError::NotFound(container.to_string())),
            Err(e) => Err(EngineError::Remove {
                id: container.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn release(&self, handle: Docker) {
        // The client holds nothing but a pooled transport; dropping it closes the connections.
        drop(handle);
    }
}
