//! Health reporting for the janitor's long running loops.
//!
//! Each loop registers a component with a deadline and must report healthy more often than
//! that. The process is live as long as every component is either still starting up or has
//! reported within its deadline. A component that reported unhealthy, or went quiet past its
//! deadline, fails the probe.
//!
//! A component that has registered but not reported yet counts as live.
use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// Automatically set when the HealthyUntil deadline is reached
    Stalled,
}

impl ComponentStatus {
    fn evaluate(&self, now: time::OffsetDateTime) -> ComponentStatus {
        match self {
            ComponentStatus::HealthyUntil(until) if until.le(&now) => ComponentStatus::Stalled,
            other => other.clone(),
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self,
            ComponentStatus::Starting | ComponentStatus::HealthyUntil(_)
        )
    }
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Report healthy until now + deadline. Must be called more frequently than the deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                _ = map.insert(self.component.clone(), status);
            }
            // Poisoned lock: the probe fails and the process gets restarted.
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component. The returned handle goes to the component so it can report.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Computes the overall status from every registered component. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            return HealthStatus::default();
        };

        let now = time::OffsetDateTime::now_utc();
        let components: HashMap<String, ComponentStatus> = components
            .iter()
            .map(|(name, status)| (name.clone(), status.evaluate(now)))
            .collect();
        let healthy = !components.is_empty() && components.values().all(ComponentStatus::is_live);

        match healthy {
            true => debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, components),
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}
