//! Session loop handlers for poller events

use super::{SessionEvent, SessionLoop};
use crate::domain::types::{
    NarrationRequest, PoiCandidate, Position, TriggerDecision, TriggerSource,
};
use crate::io::analytics::AnalyticsEvent;
use crate::io::position::PositionError;
use crate::services::narration_worker::NarrationJob;
use crate::services::poller::PollerEvent;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

impl SessionLoop {
    /// Consume poller events until the stream ends or permission is lost
    pub(crate) async fn run<S>(mut self, stream: S)
    where
        S: Stream<Item = PollerEvent> + Send,
    {
        let mut stream = std::pin::pin!(stream);

        while let Some(event) = stream.next().await {
            if self.poller_cancel.is_cancelled() {
                break;
            }
            match event {
                PollerEvent::Fix(position) => self.handle_fix(position).await,
                PollerEvent::Failure(error) => {
                    if error.is_fatal() {
                        self.handle_permission_denied();
                        break;
                    }
                    self.handle_failure(error);
                }
            }
        }

        debug!(session_id = %self.session_id, "session_loop_exited");
    }

    async fn handle_fix(&mut self, position: Position) {
        self.analytics.record(AnalyticsEvent::LocationUpdated(position));

        let candidates = match self.lookup.nearby(&position, self.config.lookup_radius_km()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "poi_lookup_failed");
                Vec::new()
            }
        };

        // Stop may have landed while the lookup was in flight
        if self.poller_cancel.is_cancelled() {
            return;
        }

        self.events.send(SessionEvent::PositionUpdated { position, candidates: candidates.len() });

        let eval_start = Instant::now();
        let decisions = self.evaluator.evaluate(&position, &candidates, Utc::now());
        self.metrics.record_evaluation(eval_start.elapsed().as_micros() as u64);

        for decision in &decisions {
            self.metrics.record_decision(decision.reason);
        }

        // Decisions come back highest priority first
        for decision in decisions.iter().filter(|d| d.fired) {
            let Some(poi) = candidates.iter().find(|c| c.id == decision.poi_id) else {
                continue;
            };
            self.fire(poi, decision, &position);
        }
    }

    fn fire(&mut self, poi: &PoiCandidate, decision: &TriggerDecision, position: &Position) {
        let language_code = self.language.borrow().clone();

        self.events.send(SessionEvent::TriggerFired {
            poi_id: poi.id,
            name: poi.name.clone(),
            distance_m: decision.distance_m,
        });
        self.analytics.record(AnalyticsEvent::Visit {
            poi_id: poi.id,
            trigger: TriggerSource::Geofence,
            position: Some(*position),
        });
        self.analytics.record(AnalyticsEvent::Track {
            poi_id: poi.id,
            event_type: "geofence_enter",
            language_code: Some(language_code.clone()),
            duration_seconds: None,
        });

        let job = NarrationJob {
            request: NarrationRequest {
                poi_id: poi.id,
                language_code,
                priority: poi.priority,
                trigger: TriggerSource::Geofence,
            },
            poi: poi.clone(),
            cancel: self.resolve_cancel.clone(),
            enqueued_at: tokio::time::Instant::now(),
        };

        match self.narration_tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                // Nothing will be narrated, so the POI may fire again next sample
                self.evaluator.forget(job.poi.id);
                warn!(poi_id = %job.poi.id, "narration_job_dropped_full");
                self.events.send(SessionEvent::PlaybackFailed {
                    poi_id: Some(job.poi.id),
                    error: "narration worker busy".to_string(),
                });
            }
            Err(TrySendError::Closed(job)) => {
                warn!(poi_id = %job.poi.id, "narration_worker_gone");
            }
        }
    }

    fn handle_failure(&mut self, error: PositionError) {
        debug!(session_id = %self.session_id, error = %error.as_str(), "location_unavailable");
        self.events.send(SessionEvent::LocationUnavailable { error });
    }

    /// Permission loss ends the session; no retry
    fn handle_permission_denied(&mut self) {
        info!(session_id = %self.session_id, "location_permission_denied");
        self.poller_cancel.cancel();
        self.resolve_cancel.cancel();
        self.queue.stop();
        self.evaluator.stop();

        self.events.send(SessionEvent::PermissionDenied);
        self.events.send(SessionEvent::TrackingStopped { session_id: self.session_id });
    }
}
