use std::any::Any;

use thiserror::Error;

use crate::engine::{ContainerRef, EngineError};

/// A single container the engine refused to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFailure {
    pub container: ContainerRef,
    pub cause: EngineError,
}

/// Enumeration of errors surfaced by the janitor's phases. None of them is fatal to the process.
#[derive(Error, Debug)]
pub enum JanitorError {
    #[error("engine unavailable after {attempts} connection attempts")]
    ConnectionUnavailable {
        attempts: u32,
        #[source]
        last_error: Option<EngineError>,
    },
    #[error("container discovery failed")]
    DiscoveryFailure(#[source] EngineError),
    #[error("failed to remove {} containers", .failures.len())]
    PartialRemovalFailure {
        removed: Vec<ContainerRef>,
        failures: Vec<RemovalFailure>,
    },
    #[error("unexpected failure: {0}")]
    UnexpectedFailure(String),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked without a message".to_owned()
    }
}
