use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const CONNECTION_ATTEMPTS: &str = "container_janitor_connection_attempts_total";
pub const DISCOVERED_CONTAINERS: &str = "container_janitor_discovered_containers";
pub const DISCOVERY_FAILURES: &str = "container_janitor_discovery_failures_total";
pub const CONTAINERS_REMOVED: &str = "container_janitor_containers_removed_total";
pub const REMOVAL_FAILURES: &str = "container_janitor_container_removal_failures_total";
pub const LIFECYCLE_PHASE: &str = "container_janitor_lifecycle_phase";
pub const IDLE_TICKS: &str = "container_janitor_idle_ticks_total";

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    match setup_metrics_recorder() {
        Ok(recorder_handle) => router
            .route(
                "/metrics",
                get(move || std::future::ready(recorder_handle.render())),
            )
            .layer(axum::middleware::from_fn(track_metrics)),
        Err(e) => {
            tracing::warn!("failed to install metrics recorder, /metrics disabled: {}", e);
            router
        }
    }
}

pub fn setup_metrics_recorder() -> eyre::Result<PrometheusHandle> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()?;

    Ok(handle)
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
