//! The janitor's run: connect, clean up after ourselves, idle, clean up ourselves, exit.
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::JanitorSettings;
use crate::connect;
use crate::engine::EngineGateway;
use crate::error::{panic_message, JanitorError};
use crate::health::HealthHandle;
use crate::labels::{CleanupMode, LabelPredicate};
use crate::remover::{remove_all, RemovalReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initializing,
    Connecting,
    StartupCleanup,
    Idle,
    ShutdownCleanup,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Connecting => "connecting",
            Phase::StartupCleanup => "startup_cleanup",
            Phase::Idle => "idle",
            Phase::ShutdownCleanup => "shutdown_cleanup",
            Phase::Terminated => "terminated",
        }
    }

    fn index(&self) -> u8 {
        match self {
            Phase::Initializing => 0,
            Phase::Connecting => 1,
            Phase::StartupCleanup => 2,
            Phase::Idle => 3,
            Phase::ShutdownCleanup => 4,
            Phase::Terminated => 5,
        }
    }
}

/// What a cleanup pass amounted to.
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Never ran, because there was no engine connection.
    Skipped,
    Completed(RemovalReport),
    Failed(JanitorError),
}

impl CleanupOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CleanupOutcome::Skipped)
    }
}

#[derive(Debug)]
pub struct RunSummary {
    /// Whether a verified engine connection was obtained; false means degraded mode.
    pub connected: bool,
    pub startup: CleanupOutcome,
    pub shutdown: CleanupOutcome,
    pub idle_ticks: u64,
}

pub struct Janitor<G: EngineGateway> {
    gateway: G,
    settings: JanitorSettings,
    liveness: HealthHandle,
    phase: watch::Sender<Phase>,
}

impl<G: EngineGateway> Janitor<G> {
    pub fn new(gateway: G, settings: JanitorSettings, liveness: HealthHandle) -> Self {
        let (phase, _) = watch::channel(Phase::Initializing);
        Self {
            gateway,
            settings,
            liveness,
            phase,
        }
    }

    /// Follows phase transitions of this janitor's run.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs the whole lifecycle. Only `shutdown` ends the idle phase; every path through here
    /// ends in `Phase::Terminated` with the engine connection, if any, released.
    pub async fn run(&self, shutdown: CancellationToken) -> RunSummary {
        info!(
            instance_id = %self.settings.instance_id,
            endpoint = %self.settings.endpoint,
            "starting container janitor"
        );
        self.enter(Phase::Initializing);
        connect::settle(&self.settings.connect, &shutdown).await;

        self.enter(Phase::Connecting);
        let handle = match connect::establish(
            &self.gateway,
            &self.settings.endpoint,
            &self.settings.connect,
        )
        .await
        .into_result()
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(
                    error = %e,
                    "no engine connection, idling without cleanup"
                );
                None
            }
        };

        let mut summary = RunSummary {
            connected: handle.is_some(),
            startup: CleanupOutcome::Skipped,
            shutdown: CleanupOutcome::Skipped,
            idle_ticks: 0,
        };

        if let Some(handle) = &handle {
            self.enter(Phase::StartupCleanup);
            summary.startup = self.cleanup(handle, CleanupMode::Workload).await;
        }

        self.enter(Phase::Idle);
        summary.idle_ticks = self.idle(&shutdown).await;

        // Runs to completion whatever the state of `shutdown`.
        if let Some(handle) = &handle {
            self.enter(Phase::ShutdownCleanup);
            summary.shutdown = self.cleanup(handle, CleanupMode::SelfInstance).await;
        }

        if let Some(handle) = handle {
            connect::release(&self.gateway, handle).await;
        }
        self.enter(Phase::Terminated);
        info!("container janitor has shut down");

        summary
    }

    fn enter(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!(from = previous.as_str(), to = phase.as_str(), "janitor phase change");
        }
        metrics::gauge!(crate::metrics::LIFECYCLE_PHASE).set(f64::from(phase.index()));
        // Until the first idle tick the component stays `Starting`, which is live however long
        // settling and connecting take.
        if phase >= Phase::Idle {
            self.liveness.report_healthy();
        }
    }

    async fn idle(&self, shutdown: &CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(self.settings.liveness_interval);
        let mut ticks = 0;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(ticks, "shutdown requested, leaving idle loop");
                    return ticks;
                }
                _ = interval.tick() => {
                    ticks += 1;
                    self.liveness.report_healthy();
                    metrics::counter!(crate::metrics::IDLE_TICKS).increment(1);
                    info!(at = %time::OffsetDateTime::now_utc(), "janitor running");
                }
            }
        }
    }

    /// One isolated cleanup pass. Never fails outward, whatever happens inside, panics included.
    async fn cleanup(&self, handle: &G::Handle, mode: CleanupMode) -> CleanupOutcome {
        let predicate = self
            .settings
            .labels
            .predicate(mode, &self.settings.instance_id);

        let result = AssertUnwindSafe(self.discover_and_remove(handle, mode, &predicate))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JanitorError::UnexpectedFailure(panic_message(panic))));

        match result {
            Ok(report) => {
                info!(
                    mode = mode.as_str(),
                    removed = report.removed.len(),
                    "cleanup finished"
                );
                CleanupOutcome::Completed(report)
            }
            Err(JanitorError::PartialRemovalFailure { removed, failures }) => {
                warn!(
                    mode = mode.as_str(),
                    removed = removed.len(),
                    failed = failures.len(),
                    "cleanup finished with failures"
                );
                CleanupOutcome::Failed(JanitorError::PartialRemovalFailure { removed, failures })
            }
            Err(e) => {
                error!(mode = mode.as_str(), error = %e, "cleanup aborted");
                CleanupOutcome::Failed(e)
            }
        }
    }

    async fn discover_and_remove(
        &self,
        handle: &G::Handle,
        mode: CleanupMode,
        predicate: &LabelPredicate,
    ) -> Result<RemovalReport, JanitorError> {
        info!(mode = mode.as_str(), %predicate, "looking for containers");

        let containers = match self
            .gateway
            .list_containers(handle, predicate, self.settings.include_stopped)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                metrics::counter!(crate::metrics::DISCOVERY_FAILURES, "phase" => mode.as_str())
                    .increment(1);
                return Err(JanitorError::DiscoveryFailure(e));
            }
        };

        info!(mode = mode.as_str(), found = containers.len(), "found containers");
        metrics::gauge!(crate::metrics::DISCOVERED_CONTAINERS, "phase" => mode.as_str())
            .set(containers.len() as f64);

        remove_all(&self.gateway, handle, containers, mode).await
    }
}
