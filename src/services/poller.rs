//! Adaptive position poller
//!
//! Produces a lazy, infinite stream of position fixes. After each fix the
//! delay to the next one follows the observed walking speed:
//!
//! | speed (km/h) | interval |
//! |--------------|----------|
//! | < 1.0        | 30 s     |
//! | 1.0 .. 5.0   | 10 s     |
//! | >= 5.0       | 5 s      |
//!
//! Source failures never end the stream; they are yielded as `Failure` and
//! retried after a fixed backoff. Cancellation is observed between fixes and
//! during sleeps, never while a fix is in flight.

use crate::domain::geo::distance_km;
use crate::domain::types::Position;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::position::{PositionError, PositionSource};
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATIONARY_KMH: f64 = 1.0;
const WALKING_KMH: f64 = 5.0;
const STATIONARY_INTERVAL: Duration = Duration::from_millis(30_000);
const WALKING_INTERVAL: Duration = Duration::from_millis(10_000);
const MOVING_INTERVAL: Duration = Duration::from_millis(5_000);

/// Item produced by the poller stream
#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    Fix(Position),
    Failure(PositionError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerSettings {
    pub default_interval: Duration,
    pub min_interval: Duration,
    pub failure_backoff: Duration,
    pub fix_timeout: Duration,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_interval: config.default_interval(),
            min_interval: config.min_interval(),
            failure_backoff: config.failure_backoff(),
            fix_timeout: config.fix_timeout(),
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_millis(5_000),
            min_interval: Duration::from_millis(3_000),
            failure_backoff: Duration::from_millis(5_000),
            fix_timeout: Duration::from_secs(10),
        }
    }
}

/// Cadence tier for a speed in km/h
pub fn interval_for_speed(speed_kmh: f64) -> Duration {
    if speed_kmh < STATIONARY_KMH {
        STATIONARY_INTERVAL
    } else if speed_kmh < WALKING_KMH {
        WALKING_INTERVAL
    } else {
        MOVING_INTERVAL
    }
}

/// Cheap to clone; clones share the current interval
#[derive(Clone)]
pub struct AdaptivePoller {
    source: Arc<dyn PositionSource>,
    settings: PollerSettings,
    interval_ms: Arc<AtomicU64>,
    metrics: Option<Arc<Metrics>>,
}

impl AdaptivePoller {
    pub fn new(source: Arc<dyn PositionSource>, settings: PollerSettings) -> Self {
        let initial = settings.default_interval.max(settings.min_interval);
        Self {
            source,
            settings,
            interval_ms: Arc::new(AtomicU64::new(initial.as_millis() as u64)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Override the current interval; values below the floor are clamped up.
    /// Returns the interval actually applied.
    pub fn set_interval(&self, interval: Duration) -> Duration {
        let applied = interval.max(self.settings.min_interval);
        self.interval_ms.store(applied.as_millis() as u64, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.set_poll_interval_ms(applied.as_millis() as u64);
        }
        applied
    }

    /// Acquire one fix, falling back to the last known position on timeout or no-fix
    async fn acquire(&self) -> Result<Position, PositionError> {
        let timeout = self.settings.fix_timeout;
        let result = match tokio::time::timeout(timeout, self.source.current_position(timeout)).await
        {
            Ok(result) => result,
            Err(_) => Err(PositionError::Timeout),
        };

        match result {
            Ok(position) => Ok(position),
            Err(e @ (PositionError::Timeout | PositionError::NoFix)) => {
                match self.source.last_known_position().await {
                    Some(position) => {
                        debug!(error = %e.as_str(), "poller_last_known_fallback");
                        Ok(position)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Start a fresh stream. Each call resets speed state and the interval
    /// to the configured default, so the poller can be restarted after a stop.
    pub fn stream(&self, cancel: CancellationToken) -> impl Stream<Item = PollerEvent> + Send + 'static {
        let poller = self.clone();
        poller.set_interval(poller.settings.default_interval);

        async_stream::stream! {
            info!(interval_ms = %poller.interval().as_millis(), "poller_started");
            let mut previous: Option<(Position, Instant)> = None;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let result = poller.acquire().await;
                if cancel.is_cancelled() {
                    break;
                }

                let delay = match result {
                    Ok(position) => {
                        let received_at = Instant::now();
                        if let Some(m) = &poller.metrics {
                            m.record_fix();
                        }
                        if let Some((prev, prev_at)) = previous {
                            let elapsed = received_at.duration_since(prev_at);
                            if !elapsed.is_zero() {
                                let km = distance_km(&prev, &position);
                                let speed_kmh = km / (elapsed.as_secs_f64() / 3600.0);
                                let applied = poller.set_interval(interval_for_speed(speed_kmh));
                                debug!(
                                    speed_kmh = format!("{:.2}", speed_kmh),
                                    interval_ms = %applied.as_millis(),
                                    "poller_interval_adapted"
                                );
                            }
                        }
                        previous = Some((position, received_at));
                        yield PollerEvent::Fix(position);
                        poller.interval()
                    }
                    Err(e) => {
                        if let Some(m) = &poller.metrics {
                            m.record_fix_failure();
                        }
                        warn!(error = %e, backoff_ms = %poller.settings.failure_backoff.as_millis(), "poller_fix_failed");
                        yield PollerEvent::Failure(e);
                        poller.settings.failure_backoff
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!("poller_stopped");
        }
    }
}
