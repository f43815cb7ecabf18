//! Tour session control
//!
//! `TourSessionController` is the only component with lifecycle verbs. It
//! wires the poller, geofence evaluator, narration worker and playback queue
//! together and reports everything that happens on one event channel:
//!
//! ```text
//! poller stream -> session loop (lookup + evaluate) -> narration worker
//!                                                        -> playback queue
//! playback queue events -> forwarder -> SessionEvent channel
//! ```
//!
//! The session loop owns the evaluator, so evaluation is serialized per
//! session without locking. Narration resolution runs on the worker and
//! never stalls evaluation.

mod handlers;

use crate::domain::types::{
    NarrationRequest, PlaybackState, PoiCandidate, PoiId, Position, TriggerSource,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::io::api::{PoiLookup, RemoteSynthesis};
use crate::io::audio::{AudioBackend, AudioFocus, AudioSource};
use crate::io::position::{PositionError, PositionSource};
use crate::io::speech::LocalSpeechEngine;
use crate::services::geofence::GeofenceEvaluator;
use crate::services::narration_worker::{create_narration_worker, NarrationJob};
use crate::services::playback_queue::{AudioPlaybackQueue, PlaybackEvent};
use crate::services::poller::{AdaptivePoller, PollerSettings};
use crate::services::resolver::{NarrationOutcome, NarrationResolver};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 256;
const NARRATION_BUFFER: usize = 64;
/// How long `stop()` waits for the session loop before aborting it
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("tracking is already running")]
    AlreadyRunning,
    #[error("narration worker is busy")]
    Busy,
    #[error("narration worker has stopped")]
    WorkerStopped,
}

/// How a completed narration was delivered
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackSource {
    AudioQueue { url: String },
    LocalSpeech { locale: String },
}

/// Everything the UI layer can observe about a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TrackingStarted { session_id: Uuid },
    PositionUpdated { position: Position, candidates: usize },
    TriggerFired { poi_id: PoiId, name: String, distance_m: f64 },
    NarrationResolved { poi_id: PoiId, outcome: NarrationOutcome },
    PlaybackStarted { poi_id: Option<PoiId>, url: String },
    PlaybackCompleted { poi_id: Option<PoiId>, source: PlaybackSource },
    PlaybackFailed { poi_id: Option<PoiId>, error: String },
    /// Transient: no fix this cycle, tracking continues
    LocationUnavailable { error: PositionError },
    /// Fatal: tracking has been stopped
    PermissionDenied,
    TrackingStopped { session_id: Uuid },
}

/// Sender handle for session events
///
/// Non-blocking: if the consumer falls behind, events are dropped and counted.
#[derive(Clone)]
pub struct SessionEventSender {
    tx: mpsc::Sender<SessionEvent>,
    metrics: Arc<Metrics>,
}

impl SessionEventSender {
    pub fn new(tx: mpsc::Sender<SessionEvent>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    pub fn send(&self, event: SessionEvent) {
        if self.tx.try_send(event).is_err() {
            self.metrics.record_session_event_dropped();
        }
    }
}

/// Collaborators a session needs
#[derive(Clone)]
pub struct SessionDeps {
    pub position: Arc<dyn PositionSource>,
    pub lookup: Arc<dyn PoiLookup>,
    pub synthesis: Arc<dyn RemoteSynthesis>,
    pub speech: Arc<dyn LocalSpeechEngine>,
    pub audio_source: Arc<dyn AudioSource>,
    pub audio_backend: Arc<dyn AudioBackend>,
    pub focus: Arc<dyn AudioFocus>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub metrics: Arc<Metrics>,
}

/// State owned by the spawned session loop
pub(crate) struct SessionLoop {
    pub(crate) session_id: Uuid,
    pub(crate) config: Arc<Config>,
    pub(crate) evaluator: GeofenceEvaluator,
    pub(crate) lookup: Arc<dyn PoiLookup>,
    pub(crate) analytics: Arc<dyn AnalyticsSink>,
    pub(crate) events: SessionEventSender,
    pub(crate) narration_tx: mpsc::Sender<NarrationJob>,
    pub(crate) language: watch::Receiver<String>,
    pub(crate) queue: AudioPlaybackQueue,
    pub(crate) poller_cancel: CancellationToken,
    pub(crate) resolve_cancel: CancellationToken,
    pub(crate) metrics: Arc<Metrics>,
}

struct ActiveSession {
    session_id: Uuid,
    poller_cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TourSessionController {
    config: Arc<Config>,
    deps: SessionDeps,
    queue: AudioPlaybackQueue,
    poller: AdaptivePoller,
    events: SessionEventSender,
    narration_tx: mpsc::Sender<NarrationJob>,
    language: watch::Sender<String>,
    /// Cancels in-flight and queued resolutions; replaced on every stop
    resolve_cancel: CancellationToken,
    active: Option<ActiveSession>,
}

impl TourSessionController {
    /// Build the controller and spawn its long-lived workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, deps: SessionDeps) -> (Self, mpsc::Receiver<SessionEvent>) {
        let config = Arc::new(config);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let events = SessionEventSender::new(event_tx, deps.metrics.clone());
        let (language, language_rx) = watch::channel(config.language().to_string());

        let queue = AudioPlaybackQueue::new(
            deps.audio_source.clone(),
            deps.audio_backend.clone(),
            deps.focus.clone(),
            deps.metrics.clone(),
        );
        let resolver = Arc::new(NarrationResolver::new(
            deps.synthesis.clone(),
            deps.speech.clone(),
            config.clone(),
            deps.metrics.clone(),
        ));
        let poller = AdaptivePoller::new(deps.position.clone(), PollerSettings::from_config(&config))
            .with_metrics(deps.metrics.clone());

        let (narration_tx, worker) = create_narration_worker(
            resolver,
            queue.clone(),
            events.clone(),
            deps.analytics.clone(),
            deps.metrics.clone(),
            NARRATION_BUFFER,
        );
        tokio::spawn(worker.run());
        tokio::spawn(forward_playback_events(
            queue.subscribe(),
            events.clone(),
            deps.analytics.clone(),
            language_rx,
        ));

        let controller = Self {
            config,
            deps,
            queue,
            poller,
            events,
            narration_tx,
            language,
            resolve_cancel: CancellationToken::new(),
            active: None,
        };
        (controller, event_rx)
    }

    /// Begin tracking with fresh debounce and cooldown state
    pub fn start(&mut self) -> Result<Uuid, SessionError> {
        if self.is_tracking() {
            return Err(SessionError::AlreadyRunning);
        }
        // A session that ended on its own (permission denied) leaves a finished
        // handle and a cancelled resolution token behind
        self.active = None;
        if self.resolve_cancel.is_cancelled() {
            self.resolve_cancel = CancellationToken::new();
        }

        let session_id = Uuid::now_v7();
        let poller_cancel = CancellationToken::new();
        let mut evaluator = GeofenceEvaluator::from_config(&self.config);
        evaluator.start(Utc::now());

        let session = SessionLoop {
            session_id,
            config: self.config.clone(),
            evaluator,
            lookup: self.deps.lookup.clone(),
            analytics: self.deps.analytics.clone(),
            events: self.events.clone(),
            narration_tx: self.narration_tx.clone(),
            language: self.language.subscribe(),
            queue: self.queue.clone(),
            poller_cancel: poller_cancel.clone(),
            resolve_cancel: self.resolve_cancel.clone(),
            metrics: self.deps.metrics.clone(),
        };

        self.events.send(SessionEvent::TrackingStarted { session_id });
        info!(session_id = %session_id, language = %self.language.borrow().as_str(), "tracking_started");

        let stream = self.poller.stream(poller_cancel.clone());
        let handle = tokio::spawn(session.run(stream));
        self.active = Some(ActiveSession { session_id, poller_cancel, handle });
        Ok(session_id)
    }

    /// Stop tracking: poller, then in-flight resolution, then playback.
    /// Each step runs even if an earlier one had nothing to do.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            // Still flush manual narrations
            self.cancel_resolutions();
            self.queue.stop();
            return;
        };

        let was_tracking = !active.poller_cancel.is_cancelled();
        active.poller_cancel.cancel();
        self.cancel_resolutions();
        self.queue.stop();

        let mut handle = active.handle;
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            warn!(session_id = %active.session_id, "session_loop_abort");
            handle.abort();
        }

        if was_tracking {
            self.events.send(SessionEvent::TrackingStopped { session_id: active.session_id });
            info!(session_id = %active.session_id, "tracking_stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.poller_cancel.is_cancelled())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.session_id)
    }

    /// Language for subsequent resolutions; in-flight ones keep theirs
    pub fn set_language(&self, language_code: &str) {
        let previous = self.language.send_replace(language_code.to_string());
        if previous != language_code {
            info!(from = %previous, to = %language_code, "language_changed");
        }
    }

    pub fn language(&self) -> String {
        self.language.borrow().clone()
    }

    /// Narrate a POI on explicit user request, bypassing the geofence
    pub fn request_narration(&mut self, poi: PoiCandidate) -> Result<(), SessionError> {
        if self.resolve_cancel.is_cancelled() {
            self.resolve_cancel = CancellationToken::new();
        }
        let language_code = self.language();
        self.deps.analytics.record(AnalyticsEvent::Visit {
            poi_id: poi.id,
            trigger: TriggerSource::Manual,
            position: None,
        });

        let job = NarrationJob {
            request: NarrationRequest {
                poi_id: poi.id,
                language_code,
                priority: poi.priority,
                trigger: TriggerSource::Manual,
            },
            poi,
            cancel: self.resolve_cancel.clone(),
            enqueued_at: Instant::now(),
        };
        self.narration_tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Busy,
            mpsc::error::TrySendError::Closed(_) => SessionError::WorkerStopped,
        })
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.queue.state()
    }

    pub fn pending_playback(&self) -> usize {
        self.queue.pending_len()
    }

    fn cancel_resolutions(&mut self) {
        self.resolve_cancel.cancel();
        self.resolve_cancel = CancellationToken::new();
    }
}

/// Map queue events onto the session channel until the queue goes away
async fn forward_playback_events(
    mut rx: broadcast::Receiver<PlaybackEvent>,
    events: SessionEventSender,
    analytics: Arc<dyn AnalyticsSink>,
    language: watch::Receiver<String>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = %skipped, "playback_events_lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            PlaybackEvent::Started { poi_id, url } => {
                events.send(SessionEvent::PlaybackStarted { poi_id, url });
            }
            PlaybackEvent::Completed { poi_id, url, language_code, played } => {
                if let Some(poi_id) = poi_id {
                    // Items without a request language fall back to the current one
                    let language_code =
                        language_code.unwrap_or_else(|| language.borrow().clone());
                    analytics.record(AnalyticsEvent::Track {
                        poi_id,
                        event_type: "audio_complete",
                        language_code: Some(language_code),
                        duration_seconds: Some(played.as_secs()),
                    });
                }
                events.send(SessionEvent::PlaybackCompleted {
                    poi_id,
                    source: PlaybackSource::AudioQueue { url },
                });
            }
            PlaybackEvent::Failed { poi_id, error, .. } => {
                events.send(SessionEvent::PlaybackFailed { poi_id, error });
            }
        }
    }
    debug!("playback_forwarder_stopped");
}
