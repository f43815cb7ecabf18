//! Typed channel for visit and usage analytics
//!
//! Producers record events without blocking; the publisher drains the bounded
//! channel and posts each event to the backend. When the channel is full the
//! event is dropped and counted.

use crate::domain::types::{PoiId, Position, TriggerSource};
use crate::infra::metrics::Metrics;
use crate::io::api::ApiClient;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Events reported to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    /// A POI narration was triggered
    Visit { poi_id: PoiId, trigger: TriggerSource, position: Option<Position> },
    /// Usage event ("geofence_enter", "audio_complete", ...)
    Track {
        poi_id: PoiId,
        event_type: &'static str,
        language_code: Option<String>,
        duration_seconds: Option<u64>,
    },
    /// Latest device position
    LocationUpdated(Position),
}

impl AnalyticsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsEvent::Visit { .. } => "visit",
            AnalyticsEvent::Track { event_type, .. } => event_type,
            AnalyticsEvent::LocationUpdated(_) => "location",
        }
    }
}

/// Fire-and-forget analytics capability
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Discards every event
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn record(&self, _event: AnalyticsEvent) {}
}

/// Sender handle for analytics events
///
/// Clone this to share across producers. Non-blocking: if the channel is
/// full, events are dropped.
#[derive(Clone)]
pub struct AnalyticsSender {
    tx: mpsc::Sender<AnalyticsEvent>,
    metrics: Arc<Metrics>,
}

impl AnalyticsSender {
    pub fn new(tx: mpsc::Sender<AnalyticsEvent>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }
}

impl AnalyticsSink for AnalyticsSender {
    fn record(&self, event: AnalyticsEvent) {
        if self.tx.try_send(event).is_err() {
            self.metrics.record_analytics_dropped();
        }
    }
}

/// Create a new analytics channel pair
pub fn create_analytics_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (AnalyticsSender, mpsc::Receiver<AnalyticsEvent>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (AnalyticsSender::new(tx, metrics), rx)
}

/// Posts analytics events to the REST backend
pub struct AnalyticsPublisher {
    api: ApiClient,
    rx: mpsc::Receiver<AnalyticsEvent>,
    tourist_id: Option<i64>,
}

impl AnalyticsPublisher {
    pub fn new(api: ApiClient, rx: mpsc::Receiver<AnalyticsEvent>, tourist_id: Option<i64>) -> Self {
        Self { api, rx, tourist_id }
    }

    /// Run until the shutdown flag flips, then drain what is left
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tourist_id = ?self.tourist_id, "analytics_publisher_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let mut drained = 0usize;
                        while let Ok(event) = self.rx.try_recv() {
                            self.publish(event).await;
                            drained += 1;
                        }
                        info!(drained = %drained, "analytics_publisher_shutdown");
                        return;
                    }
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.publish(event).await,
                        None => {
                            info!("analytics_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn publish(&self, event: AnalyticsEvent) {
        let kind = event.kind();
        let result = match event {
            AnalyticsEvent::Visit { poi_id, trigger, position } => {
                // Visits are per tourist; anonymous sessions skip them
                let Some(tourist_id) = self.tourist_id else {
                    return;
                };
                self.api.log_visit(tourist_id, poi_id, trigger.as_str(), position.as_ref()).await
            }
            AnalyticsEvent::Track { poi_id, event_type, language_code, duration_seconds } => {
                self.api
                    .track_event(
                        self.tourist_id,
                        poi_id,
                        event_type,
                        language_code.as_deref(),
                        duration_seconds,
                    )
                    .await
            }
            AnalyticsEvent::LocationUpdated(position) => {
                let Some(tourist_id) = self.tourist_id else {
                    return;
                };
                self.api.update_location(tourist_id, &position).await
            }
        };

        match result {
            Ok(()) => debug!(kind = %kind, "analytics_published"),
            Err(e) => warn!(kind = %kind, error = %e, "analytics_publish_failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_drops_when_full() {
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_analytics_channel(1, metrics.clone());

        let position = Position::now(10.0, 106.0);
        sender.record(AnalyticsEvent::LocationUpdated(position));
        sender.record(AnalyticsEvent::LocationUpdated(position));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.report().analytics_dropped, 1);
    }

    #[test]
    fn test_event_kind() {
        let track = AnalyticsEvent::Track {
            poi_id: PoiId(3),
            event_type: "geofence_enter",
            language_code: Some("vi".to_string()),
            duration_seconds: None,
        };
        assert_eq!(track.kind(), "geofence_enter");

        let visit = AnalyticsEvent::Visit {
            poi_id: PoiId(3),
            trigger: TriggerSource::Manual,
            position: None,
        };
        assert_eq!(visit.kind(), "visit");
    }
}
