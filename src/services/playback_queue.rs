//! Serialized narration playback
//!
//! One mutex guards the pending items, the `PlaybackState`, and the handle of
//! the active player. It is never held across an await. A single drain
//! worker is spawned lazily on enqueue and exits when the queue runs dry.
//!
//! Per item the worker:
//! dequeue -> stop previous player -> acquire payload -> mark playing ->
//! acquire focus -> start player -> await end or stop -> clear state ->
//! release focus.
//!
//! `stop()` bumps a generation counter under the lock. Any worker holding an
//! older generation stops touching shared state and exits.

use crate::domain::types::{PlaybackQueueItem, PlaybackState, PoiId};
use crate::infra::metrics::Metrics;
use crate::io::audio::{ActivePlayback, AudioBackend, AudioFocus, AudioSource, PlaybackError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Same URL or POI is playing right now; nothing added
    AlreadyPlaying,
    /// Same POI is already waiting; nothing added
    AlreadyQueued,
    /// Item had no source URL
    Rejected,
}

impl EnqueueOutcome {
    /// Dedupe counts as success
    pub fn accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { poi_id: Option<PoiId>, url: String },
    Completed {
        poi_id: Option<PoiId>,
        url: String,
        language_code: Option<String>,
        played: Duration,
    },
    Failed { poi_id: Option<PoiId>, url: String, error: String },
}

struct QueueInner {
    pending: VecDeque<PlaybackQueueItem>,
    state: PlaybackState,
    player: Option<Arc<dyn ActivePlayback>>,
    item_cancel: Option<CancellationToken>,
    worker_running: bool,
    generation: u64,
}

struct Shared {
    inner: Mutex<QueueInner>,
    source: Arc<dyn AudioSource>,
    backend: Arc<dyn AudioBackend>,
    focus: Arc<dyn AudioFocus>,
    events: broadcast::Sender<PlaybackEvent>,
    metrics: Arc<Metrics>,
}

/// Cheap to clone; clones share one queue
#[derive(Clone)]
pub struct AudioPlaybackQueue {
    shared: Arc<Shared>,
}

impl AudioPlaybackQueue {
    pub fn new(
        source: Arc<dyn AudioSource>,
        backend: Arc<dyn AudioBackend>,
        focus: Arc<dyn AudioFocus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(QueueInner {
                    pending: VecDeque::new(),
                    state: PlaybackState::default(),
                    player: None,
                    item_cancel: None,
                    worker_running: false,
                    generation: 0,
                }),
                source,
                backend,
                focus,
                events,
                metrics,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// True when nothing is playing, queued, or draining
    pub fn is_idle(&self) -> bool {
        let inner = self.shared.inner.lock();
        !inner.worker_running && inner.pending.is_empty() && !inner.state.is_playing
    }

    pub fn enqueue(&self, item: PlaybackQueueItem) -> EnqueueOutcome {
        if item.source_url.trim().is_empty() {
            warn!(poi_id = ?item.poi_id, "playback_enqueue_rejected");
            return EnqueueOutcome::Rejected;
        }

        let spawn_generation = {
            let mut inner = self.shared.inner.lock();

            if inner.state.is_duplicate_of_current(&item) {
                drop(inner);
                self.shared.metrics.record_playback_deduped();
                debug!(poi_id = ?item.poi_id, url = %item.source_url, "playback_dedup_playing");
                return EnqueueOutcome::AlreadyPlaying;
            }

            let queued = inner.pending.iter().any(|p| {
                p.source_url == item.source_url || (item.poi_id.is_some() && p.poi_id == item.poi_id)
            });
            if queued {
                drop(inner);
                self.shared.metrics.record_playback_deduped();
                debug!(poi_id = ?item.poi_id, url = %item.source_url, "playback_dedup_queued");
                return EnqueueOutcome::AlreadyQueued;
            }

            debug!(poi_id = ?item.poi_id, url = %item.source_url, pending = %(inner.pending.len() + 1), "playback_enqueued");
            inner.pending.push_back(item);

            if inner.worker_running {
                None
            } else {
                inner.worker_running = true;
                Some(inner.generation)
            }
        };

        if let Some(generation) = spawn_generation {
            let shared = self.shared.clone();
            tokio::spawn(drain(shared, generation));
        }
        EnqueueOutcome::Queued
    }

    /// Drop everything pending and stop the active player. Idempotent.
    pub fn stop(&self) {
        let (player, cancel, cleared) = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.worker_running = false;
            inner.state = PlaybackState::default();
            let cleared = inner.pending.len();
            inner.pending.clear();
            (inner.player.take(), inner.item_cancel.take(), cleared)
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let had_player = player.is_some();
        if let Some(player) = player {
            player.stop();
        }
        if had_player || cleared > 0 {
            info!(cleared = %cleared, stopped_player = %had_player, "playback_queue_stopped");
        }
    }

    pub fn pause(&self) {
        let player = self.shared.inner.lock().player.clone();
        if let Some(player) = player {
            player.pause();
            debug!("playback_paused");
        }
    }

    pub fn resume(&self) {
        let player = self.shared.inner.lock().player.clone();
        if let Some(player) = player {
            player.resume();
            debug!("playback_resumed");
        }
    }
}

impl Shared {
    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail(&self, item: &PlaybackQueueItem, error: &PlaybackError) {
        self.metrics.record_playback_failed();
        warn!(poi_id = ?item.poi_id, url = %item.source_url, error = %error, "playback_failed");
        self.emit(PlaybackEvent::Failed {
            poi_id: item.poi_id,
            url: item.source_url.clone(),
            error: error.to_string(),
        });
    }

    /// Clear per-item state if this worker still owns the queue
    fn finish_item(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.state = PlaybackState::default();
            inner.player = None;
            inner.item_cancel = None;
        }
    }
}

async fn drain(shared: Arc<Shared>, generation: u64) {
    debug!(generation = %generation, "playback_worker_started");

    loop {
        let (item, cancel, previous) = {
            let mut inner = shared.inner.lock();
            if inner.generation != generation {
                debug!(generation = %generation, "playback_worker_superseded");
                return;
            }
            let Some(item) = inner.pending.pop_front() else {
                inner.worker_running = false;
                debug!(generation = %generation, "playback_worker_idle");
                return;
            };
            let cancel = CancellationToken::new();
            inner.item_cancel = Some(cancel.clone());
            (item, cancel, inner.player.take())
        };

        if let Some(previous) = previous {
            previous.stop();
        }

        let clip = tokio::select! {
            _ = cancel.cancelled() => continue,
            clip = shared.source.acquire(&item.source_url) => clip,
        };
        let clip = match clip {
            Ok(clip) => clip,
            Err(e) => {
                shared.fail(&item, &e);
                shared.finish_item(generation);
                continue;
            }
        };

        {
            let mut inner = shared.inner.lock();
            if inner.generation != generation || cancel.is_cancelled() {
                continue;
            }
            inner.state = PlaybackState {
                is_playing: true,
                current_url: Some(item.source_url.clone()),
                current_poi_id: item.poi_id,
                started_at: Some(Utc::now()),
            };
        }

        if !shared.focus.acquire() {
            debug!(poi_id = ?item.poi_id, "audio_focus_refused");
        }

        let player = match shared.backend.start(&clip).await {
            Ok(player) => player,
            Err(e) => {
                shared.finish_item(generation);
                shared.focus.release();
                shared.fail(&item, &e);
                continue;
            }
        };

        let registered = {
            let mut inner = shared.inner.lock();
            if inner.generation == generation && !cancel.is_cancelled() {
                inner.player = Some(player.clone());
                true
            } else {
                false
            }
        };
        if !registered {
            player.stop();
            shared.focus.release();
            continue;
        }

        shared.metrics.record_playback_started();
        info!(poi_id = ?item.poi_id, url = %item.source_url, bytes = %clip.size_bytes, "playback_started");
        shared.emit(PlaybackEvent::Started { poi_id: item.poi_id, url: item.source_url.clone() });

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PlaybackError::Interrupted),
            result = player.finished() => result,
        };
        let played = started.elapsed();

        shared.finish_item(generation);
        shared.focus.release();

        match result {
            Ok(()) => {
                shared.metrics.record_playback_completed();
                info!(poi_id = ?item.poi_id, played_ms = %played.as_millis(), "playback_completed");
                shared.emit(PlaybackEvent::Completed {
                    poi_id: item.poi_id,
                    url: item.source_url.clone(),
                    language_code: item.language_code.clone(),
                    played,
                });
            }
            Err(PlaybackError::Interrupted) => {
                debug!(poi_id = ?item.poi_id, played_ms = %played.as_millis(), "playback_interrupted");
            }
            Err(e) => {
                player.stop();
                shared.fail(&item, &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::audio::{AudioClip, NoopAudioFocus, SimulatedAudioBackend};
    use async_trait::async_trait;

    /// Serves an in-memory clip for any URL containing ".mp3"
    struct MemorySource;

    #[async_trait]
    impl AudioSource for MemorySource {
        async fn acquire(&self, url: &str) -> Result<AudioClip, PlaybackError> {
            if url.contains(".mp3") {
                Ok(AudioClip { source_url: url.to_string(), path: None, size_bytes: 16_000 })
            } else {
                Err(PlaybackError::Download(format!("404 for {}", url)))
            }
        }
    }

    fn queue(backend: Arc<SimulatedAudioBackend>) -> AudioPlaybackQueue {
        AudioPlaybackQueue::new(
            Arc::new(MemorySource),
            backend,
            Arc::new(NoopAudioFocus),
            Arc::new(Metrics::new()),
        )
    }

    fn item(url: &str, poi: i64) -> PlaybackQueueItem {
        PlaybackQueueItem::new(url, Some(PoiId(poi)), 0)
    }

    async fn next_started(rx: &mut broadcast::Receiver<PlaybackEvent>) -> String {
        loop {
            if let PlaybackEvent::Started { url, .. } = rx.recv().await.unwrap() {
                return url;
            }
        }
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let q = queue(Arc::new(SimulatedAudioBackend::new()));
        let outcome = q.enqueue(item("", 1));
        assert_eq!(outcome, EnqueueOutcome::Rejected);
        assert!(!outcome.accepted());
        assert!(q.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedupe_playing_and_queued() {
        let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(10)));
        let q = queue(backend);
        let mut rx = q.subscribe();

        assert_eq!(q.enqueue(item("http://h/1.mp3", 1)), EnqueueOutcome::Queued);
        next_started(&mut rx).await;

        let dup = q.enqueue(item("http://h/1-other.mp3", 1));
        assert_eq!(dup, EnqueueOutcome::AlreadyPlaying);
        assert!(dup.accepted());
        assert_eq!(q.pending_len(), 0);

        assert_eq!(q.enqueue(item("http://h/2.mp3", 2)), EnqueueOutcome::Queued);
        assert_eq!(q.enqueue(item("http://h/2b.mp3", 2)), EnqueueOutcome::AlreadyQueued);
        assert_eq!(q.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_without_overlap() {
        let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(2)));
        let q = queue(backend.clone());
        let mut rx = q.subscribe();

        for (i, url) in ["http://h/a.mp3", "http://h/b.mp3", "http://h/c.mp3"].iter().enumerate() {
            assert_eq!(q.enqueue(item(url, i as i64)), EnqueueOutcome::Queued);
        }

        let mut order = Vec::new();
        let mut completed = 0;
        while completed < 3 {
            match rx.recv().await.unwrap() {
                PlaybackEvent::Started { url, .. } => {
                    assert!(q.state().is_playing);
                    order.push(url);
                }
                PlaybackEvent::Completed { played, .. } => {
                    assert!(played >= Duration::from_secs(2));
                    completed += 1;
                }
                PlaybackEvent::Failed { error, .. } => panic!("unexpected failure: {}", error),
            }
        }

        assert_eq!(order, vec!["http://h/a.mp3", "http://h/b.mp3", "http://h/c.mp3"]);
        assert_eq!(backend.peak_concurrent(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(q.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_worker() {
        let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(1)));
        let q = queue(backend);
        let mut rx = q.subscribe();

        q.enqueue(item("http://h/missing", 1));
        q.enqueue(item("http://h/ok.mp3", 2));

        match rx.recv().await.unwrap() {
            PlaybackEvent::Failed { poi_id, .. } => assert_eq!(poi_id, Some(PoiId(1))),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(next_started(&mut rx).await, "http://h/ok.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_pending_and_player() {
        let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(60)));
        let q = queue(backend.clone());
        let mut rx = q.subscribe();

        q.enqueue(item("http://h/a.mp3", 1));
        q.enqueue(item("http://h/b.mp3", 2));
        next_started(&mut rx).await;

        q.stop();
        assert!(!q.state().is_playing);
        assert_eq!(q.pending_len(), 0);
        q.stop();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(q.is_idle());

        // Restarts lazily after a stop
        assert_eq!(q.enqueue(item("http://h/c.mp3", 3)), EnqueueOutcome::Queued);
        assert_eq!(next_started(&mut rx).await, "http://h/c.mp3");
        assert_eq!(backend.peak_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_delays_completion() {
        let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(2)));
        let q = queue(backend);
        let mut rx = q.subscribe();

        q.enqueue(item("http://h/a.mp3", 1));
        next_started(&mut rx).await;
        q.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(q.state().is_playing);
        q.resume();

        match rx.recv().await.unwrap() {
            PlaybackEvent::Completed { played, .. } => assert!(played >= Duration::from_secs(6)),
            other => panic!("expected completion, got {:?}", other),
        }
    }
}
