//! Establishing a verified engine connection.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{EngineError, EngineGateway, Endpoint};
use crate::error::{panic_message, JanitorError};

/// Result of a connection run: either a live, pinged handle or nothing after all attempts.
#[derive(Debug)]
pub enum ConnectOutcome<H> {
    Connected(H),
    Exhausted {
        attempts: u32,
        last_error: Option<EngineError>,
    },
}

impl<H> ConnectOutcome<H> {
    pub fn into_result(self) -> Result<H, JanitorError> {
        match self {
            ConnectOutcome::Connected(handle) => Ok(handle),
            ConnectOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(JanitorError::ConnectionUnavailable {
                attempts,
                last_error,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Grace period before the first attempt, for the engine and network to settle.
    pub settle_delay: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(90),
            max_retries: 10,
        }
    }
}

impl ConnectPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Waits out the settle delay. Returns early if shutdown is requested meanwhile.
pub async fn settle(policy: &ConnectPolicy, shutdown: &CancellationToken) {
    if policy.settle_delay.is_zero() {
        return;
    }

    info!(
        delay_secs = policy.settle_delay.as_secs_f64(),
        "waiting for the engine to settle"
    );
    tokio::select! {
        _ = tokio::time::sleep(policy.settle_delay) => {}
        _ = shutdown.cancelled() => {
            info!("shutdown requested while settling, connecting right away");
        }
    }
}

/// Connects and pings, retrying immediately on any failure until the attempt budget is spent.
pub async fn establish<G: EngineGateway>(
    gateway: &G,
    endpoint: &Endpoint,
    policy: &ConnectPolicy,
) -> ConnectOutcome<G::Handle> {
    let max_attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        info!(attempt, max_attempts, %endpoint, "attempting to connect to engine");

        match try_connect(gateway, endpoint).await {
            Ok(handle) => {
                metrics::counter!(crate::metrics::CONNECTION_ATTEMPTS, "outcome" => "success")
                    .increment(1);
                info!(attempt, "connected to engine");
                return ConnectOutcome::Connected(handle);
            }
            Err(e) => {
                metrics::counter!(crate::metrics::CONNECTION_ATTEMPTS, "outcome" => "failure")
                    .increment(1);
                error!(attempt, error = %e, "engine connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    ConnectOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

/// Hands a handle back to the gateway. A panicking client is logged, never propagated.
pub async fn release<G: EngineGateway>(gateway: &G, handle: G::Handle) {
    match AssertUnwindSafe(gateway.release(handle)).catch_unwind().await {
        Ok(()) => info!("released engine connection"),
        Err(panic) => error!(
            error = %panic_message(panic),
            "engine client panicked while releasing the connection"
        ),
    }
}

async fn guarded<T>(
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(EngineError::Panic(panic_message(panic))))
}

async fn try_connect<G: EngineGateway>(
    gateway: &G,
    endpoint: &Endpoint,
) -> Result<G::Handle, EngineError> {
    let handle = guarded(gateway.connect(endpoint)).await?;

    match guarded(gateway.ping(&handle)).await {
        Ok(()) => Ok(handle),
        Err(e) => {
            // Never carry an unverified handle into the next attempt.
            release(gateway, handle).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Fault, MemoryEngine};

    fn policy(max_retries: u32) -> ConnectPolicy {
        ConnectPolicy {
            settle_delay: Duration::ZERO,
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_connects_on_first_attempt() {
        let engine = MemoryEngine::new();

        let outcome = establish(&engine, &Endpoint::PlatformDefault, &policy(10)).await;

        assert!(matches!(outcome, ConnectOutcome::Connected(_)));
        assert_eq!(engine.connect_attempts(), 1);
        assert_eq!(engine.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_eleven_attempts() {
        let engine = MemoryEngine::new();
        engine.inject(Fault::Connect, u32::MAX);

        let outcome = establish(&engine, &Endpoint::PlatformDefault, &policy(10)).await;

        match outcome {
            ConnectOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 11);
                assert!(matches!(last_error, Some(EngineError::Connect { .. })));
            }
            ConnectOutcome::Connected(_) => panic!("should not connect"),
        }
        assert_eq!(engine.connect_attempts(), 11);
        assert_eq!(engine.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_failed_ping_releases_handle_and_retries() {
        let engine = MemoryEngine::new();
        engine.inject(Fault::Ping, 3);

        let outcome = establish(&engine, &Endpoint::PlatformDefault, &policy(10)).await;

        assert!(matches!(outcome, ConnectOutcome::Connected(_)));
        assert_eq!(engine.connect_attempts(), 4);
        assert_eq!(engine.released_handles(), 3);
        assert_eq!(engine.live_handles(), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let engine = MemoryEngine::new();
        engine.inject(Fault::Connect, 10);

        let outcome = establish(&engine, &Endpoint::PlatformDefault, &policy(10)).await;

        assert!(matches!(outcome, ConnectOutcome::Connected(_)));
        assert_eq!(engine.connect_attempts(), 11);
    }

    #[tokio::test]
    async fn test_exhausted_maps_to_connection_unavailable() {
        let engine = MemoryEngine::new();
        engine.inject(Fault::Ping, u32::MAX);

        let result = establish(&engine, &Endpoint::PlatformDefault, &policy(0))
            .await
            .into_result();

        assert!(matches!(
            result,
            Err(JanitorError::ConnectionUnavailable {
                attempts: 1,
                last_error: Some(EngineError::Ping(_))
            })
        ));
        assert_eq!(engine.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_panicking_ping_counts_as_failed_attempt() {
        let engine = MemoryEngine::new();
        engine.panic_on(Fault::Ping);

        let outcome = establish(&engine, &Endpoint::PlatformDefault, &policy(2)).await;

        match outcome {
            ConnectOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last_error, Some(EngineError::Panic(_))));
            }
            ConnectOutcome::Connected(_) => panic!("should not connect"),
        }
        assert_eq!(engine.connect_attempts(), 3);
        assert_eq!(engine.released_handles(), 3);
        assert_eq!(engine.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_panicking_connect_counts_as_failed_attempt() {
        let engine = MemoryEngine::new();
        engine.panic_on(Fault::Connect);

        let result = establish(&engine, &Endpoint::PlatformDefault, &policy(0))
            .await
            .into_result();

        assert!(matches!(
            result,
            Err(JanitorError::ConnectionUnavailable {
                attempts: 1,
                last_error: Some(EngineError::Panic(_))
            })
        ));
        assert_eq!(engine.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_returns_early_on_shutdown() {
        let shutdown = CancellationToken::new();
        let policy = ConnectPolicy::default();
        let started = tokio::time::Instant::now();

        shutdown.cancel();
        settle(&policy, &shutdown).await;

        assert!(started.elapsed() < policy.settle_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_full_delay() {
        let shutdown = CancellationToken::new();
        let policy = ConnectPolicy::default();
        let started = tokio::time::Instant::now();

        settle(&policy, &shutdown).await;

        assert!(started.elapsed() >= Duration::from_secs(90));
    }
}
