//! Bulk, best-effort container removal.
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::engine::{ContainerRef, EngineGateway, RemoveOptions};
use crate::error::{JanitorError, RemovalFailure};
use crate::labels::CleanupMode;

/// Containers that were removed by a bulk removal where every request succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: Vec<ContainerRef>,
}

/// Force-removes every container concurrently and waits for all of them to settle.
///
/// No request is cancelled because another one failed. If any removal fails, the error carries
/// both the containers that did go away and each failure with its cause.
pub async fn remove_all<G: EngineGateway>(
    gateway: &G,
    handle: &G::Handle,
    containers: Vec<ContainerRef>,
    mode: CleanupMode,
) -> Result<RemovalReport, JanitorError> {
    if containers.is_empty() {
        debug!(mode = mode.as_str(), "nothing to remove");
        return Ok(RemovalReport::default());
    }

    let ids: Vec<&str> = containers.iter().map(ContainerRef::id).collect();
    info!(
        mode = mode.as_str(),
        count = containers.len(),
        "removing containers: {}",
        ids.join(", ")
    );

    let outcomes = join_all(containers.into_iter().map(|container| async move {
        let result = gateway
            .remove_container(handle, &container, RemoveOptions::forced())
            .await;
        (container, result)
    }))
    .await;

    let mut removed = Vec::new();
    let mut failures = Vec::new();
    for (container, result) in outcomes {
        match result {
            Ok(()) => removed.push(container),
            Err(cause) => {
                if cause.is_not_found() {
                    info!(container = %container, "container already gone");
                } else {
                    warn!(container = %container, error = %cause, "failed to remove container");
                }
                failures.push(RemovalFailure { container, cause });
            }
        }
    }

    metrics::counter!(crate::metrics::CONTAINERS_REMOVED, "phase" => mode.as_str())
        .increment(removed.len() as u64);

    if failures.is_empty() {
        return Ok(RemovalReport { removed });
    }

    metrics::counter!(crate::metrics::REMOVAL_FAILURES, "phase" => mode.as_str())
        .increment(failures.len() as u64);
    Err(JanitorError::PartialRemovalFailure { removed, failures })
}
