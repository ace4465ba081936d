//! The container engine seam: everything the janitor needs from a Docker-compatible engine.
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::labels::LabelPredicate;

/// Where to reach the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Whatever the platform default is (`DOCKER_HOST`, or the local socket).
    PlatformDefault,
    Uri(String),
}

impl Endpoint {
    pub fn from_override(uri: Option<&str>) -> Self {
        match uri.map(str::trim).filter(|uri| !uri.is_empty()) {
            Some(uri) => Endpoint::Uri(uri.to_owned()),
            None => Endpoint::PlatformDefault,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::PlatformDefault => f.write_str("platform default"),
            Endpoint::Uri(uri) => f.write_str(uri),
        }
    }
}

/// A container id as returned by discovery. Consumed once by removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerRef(String);

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        ContainerRef(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

impl RemoveOptions {
    /// Kill if running, and take anonymous volumes along.
    pub fn forced() -> Self {
        Self {
            force: true,
            remove_volumes: true,
        }
    }
}

/// Enumeration of errors returned by an `EngineGateway`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to connect to engine at {endpoint}: {message}")]
    Connect { endpoint: String, message: String },
    #[error("engine did not answer ping: {0}")]
    Ping(String),
    #[error("failed to list containers: {0}")]
    List(String),
    #[error("container {0} not found")]
    NotFound(String),
    #[error("failed to remove container {id}: {message}")]
    Remove { id: String, message: String },
    #[error("engine client panicked: {0}")]
    Panic(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Operations consumed from the container engine.
///
/// A `Handle` is one client connection. The janitor holds at most one at a time and always hands
/// it back through `release`, including when a ping on a fresh handle fails.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    type Handle: Send + Sync;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Handle, EngineError>;

    async fn ping(&self, handle: &Self::Handle) -> Result<(), EngineError>;

    async fn list_containers(
        &self,
        handle: &Self::Handle,
        predicate: &LabelPredicate,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRef>, EngineError>;

    async fn remove_container(
        &self,
        handle: &Self::Handle,
        container: &ContainerRef,
        options: RemoveOptions,
    ) -> Result<(), EngineError>;

    async fn release(&self, handle: Self::Handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_override() {
        assert_eq!(Endpoint::from_override(None), Endpoint::PlatformDefault);
        assert_eq!(Endpoint::from_override(Some("  ")), Endpoint::PlatformDefault);
        assert_eq!(
            Endpoint::from_override(Some("tcp://engine:2375")),
            Endpoint::Uri("tcp://engine:2375".to_owned())
        );
    }
}
