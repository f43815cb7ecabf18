//! Narration worker - resolves fired POIs off the evaluation path
//!
//! The session loop submits jobs over an mpsc channel and goes straight back
//! to evaluating positions. The worker resolves jobs one at a time in
//! submission order, so POIs fired in one sample keep their priority order
//! and samples are handled FIFO. URL outcomes go to the playback queue.

use crate::domain::types::{NarrationRequest, PlaybackQueueItem, PoiCandidate};
use crate::infra::metrics::Metrics;
use crate::io::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::services::playback_queue::AudioPlaybackQueue;
use crate::services::resolver::{NarrationFailure, NarrationOutcome, NarrationResolver};
use crate::services::session::{PlaybackSource, SessionEvent, SessionEventSender};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A fired or requested POI waiting for narration
#[derive(Debug)]
pub struct NarrationJob {
    pub request: NarrationRequest,
    pub poi: PoiCandidate,
    /// Cancelled when the session that produced the job stops
    pub cancel: CancellationToken,
    /// When the job was submitted (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub struct NarrationWorker {
    resolver: Arc<NarrationResolver>,
    queue: AudioPlaybackQueue,
    events: SessionEventSender,
    analytics: Arc<dyn AnalyticsSink>,
    job_rx: mpsc::Receiver<NarrationJob>,
    metrics: Arc<Metrics>,
}

impl NarrationWorker {
    pub fn new(
        resolver: Arc<NarrationResolver>,
        queue: AudioPlaybackQueue,
        events: SessionEventSender,
        analytics: Arc<dyn AnalyticsSink>,
        job_rx: mpsc::Receiver<NarrationJob>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { resolver, queue, events, analytics, job_rx, metrics }
    }

    /// Run until every job sender is dropped
    pub async fn run(mut self) {
        info!("narration_worker_started");

        while let Some(job) = self.job_rx.recv().await {
            let queue_delay_ms = job.enqueued_at.elapsed().as_millis() as u64;
            if job.cancel.is_cancelled() {
                debug!(poi_id = %job.poi.id, "narration_job_skipped_cancelled");
                continue;
            }
            if queue_delay_ms > 5_000 {
                warn!(poi_id = %job.poi.id, queue_delay_ms = %queue_delay_ms, "narration_queue_delay_high");
            }

            self.process(job).await;
        }

        info!("narration_worker_stopped");
    }

    async fn process(&self, job: NarrationJob) {
        let NarrationJob { request, poi, cancel, .. } = job;
        let outcome = self.resolver.resolve(&poi, &request.language_code, &cancel).await;

        if outcome == NarrationOutcome::Failed(NarrationFailure::Cancelled) {
            debug!(poi_id = %poi.id, "narration_dropped_cancelled");
            return;
        }

        self.events.send(SessionEvent::NarrationResolved { poi_id: poi.id, outcome: outcome.clone() });

        match outcome {
            NarrationOutcome::PreRecorded { url } | NarrationOutcome::Synthesized { url } => {
                if cancel.is_cancelled() {
                    return;
                }
                let item = PlaybackQueueItem::new(&url, Some(poi.id), request.priority)
                    .with_language(&request.language_code);
                let enqueued = self.queue.enqueue(item);
                debug!(poi_id = %poi.id, outcome = ?enqueued, trigger = %request.trigger.as_str(), "narration_enqueued");
                if !enqueued.accepted() {
                    self.events.send(SessionEvent::PlaybackFailed {
                        poi_id: Some(poi.id),
                        error: "narration url rejected by playback queue".to_string(),
                    });
                }
            }
            NarrationOutcome::LocalSpeech { locale, .. } => {
                self.metrics.record_playback_completed();
                self.analytics.record(AnalyticsEvent::Track {
                    poi_id: poi.id,
                    event_type: "audio_complete",
                    language_code: Some(request.language_code.clone()),
                    duration_seconds: None,
                });
                self.events.send(SessionEvent::PlaybackCompleted {
                    poi_id: Some(poi.id),
                    source: PlaybackSource::LocalSpeech { locale },
                });
            }
            NarrationOutcome::Failed(failure) => {
                self.metrics.record_playback_failed();
                self.events.send(SessionEvent::PlaybackFailed {
                    poi_id: Some(poi.id),
                    error: failure.to_string(),
                });
            }
        }
    }
}

/// Create a narration job channel and worker
///
/// Returns the sender (for the session) and the worker (to be spawned)
pub fn create_narration_worker(
    resolver: Arc<NarrationResolver>,
    queue: AudioPlaybackQueue,
    events: SessionEventSender,
    analytics: Arc<dyn AnalyticsSink>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<NarrationJob>, NarrationWorker) {
    let (job_tx, job_rx) = mpsc::channel(buffer_size);
    let worker = NarrationWorker::new(resolver, queue, events, analytics, job_rx, metrics);
    (job_tx, worker)
}
