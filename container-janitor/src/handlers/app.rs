use axum::{http::StatusCode, routing::get, Router};
use std::future::ready;
use tokio::sync::watch;

use crate::health::HealthRegistry;
use crate::janitor::Phase;

pub fn app(liveness: HealthRegistry, phase: watch::Receiver<Phase>) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/_readiness",
            get(move || ready(readiness(*phase.borrow()))),
        )
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

pub async fn index() -> &'static str {
    "container janitor"
}

/// Ready only while idling: before that we are still cleaning up, after that we are going away.
fn readiness(phase: Phase) -> (StatusCode, &'static str) {
    match phase {
        Phase::Idle => (StatusCode::OK, phase.as_str()),
        _ => (StatusCode::SERVICE_UNAVAILABLE, phase.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_only_when_idle() {
        assert_eq!(readiness(Phase::Idle), (StatusCode::OK, "idle"));
        for phase in [
            Phase::Initializing,
            Phase::Connecting,
            Phase::StartupCleanup,
            Phase::ShutdownCleanup,
            Phase::Terminated,
        ] {
            assert_eq!(readiness(phase).0, StatusCode::SERVICE_UNAVAILABLE);
        }
    }
}
