//! End-to-end narration scenarios through the public API

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tour_narrator::domain::geo::offset_north;
use tour_narrator::domain::types::{PlaybackQueueItem, PoiCandidate, PoiId, Position, TriggerReason};
use tour_narrator::infra::{Config, Metrics};
use tour_narrator::io::{
    ApiError, AudioClip, AudioSource, LocalSpeechEngine, NoopAudioFocus, PlaybackError,
    RemoteSynthesis, SimulatedAudioBackend, SpeechError, SynthesisRequest,
};
use tour_narrator::services::{
    AudioPlaybackQueue, EnqueueOutcome, GeofenceEvaluator, NarrationOutcome, NarrationResolver,
    PlaybackEvent,
};

const LAT: f64 = 21.0285;
const LON: f64 = 105.8542;

struct HangingSynthesis;

#[async_trait]
impl RemoteSynthesis for HangingSynthesis {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<String, ApiError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("http://host/never.mp3".to_string())
    }
}

#[derive(Default)]
struct CapturingSpeech {
    spoken: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl LocalSpeechEngine for CapturingSpeech {
    async fn available_locales(&self) -> Vec<String> {
        vec!["en-GB".to_string(), "vi-VN".to_string()]
    }

    async fn speak(&self, text: &str, locale: &str) -> Result<(), SpeechError> {
        self.spoken.lock().push((text.to_string(), locale.to_string()));
        Ok(())
    }
}

struct MemorySource;

#[async_trait]
impl AudioSource for MemorySource {
    async fn acquire(&self, url: &str) -> Result<AudioClip, PlaybackError> {
        Ok(AudioClip { source_url: url.to_string(), path: None, size_bytes: 32_000 })
    }
}

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap() + ChronoDuration::seconds(secs)
}

#[test]
fn test_walk_past_poi_fires_once_per_cooldown() {
    let mut evaluator =
        GeofenceEvaluator::new(50.0, Duration::from_secs(3), Duration::from_secs(600));
    let poi = PoiCandidate::new(1, "Hoan Kiem", LAT, LON);
    evaluator.start(at(0));

    let inside = Position::new(offset_north(LAT, 30.0), LON, at(1));
    let decisions = evaluator.evaluate(&inside, std::slice::from_ref(&poi), at(1));
    assert_eq!(decisions[0].reason, TriggerReason::Debounced);

    let decisions = evaluator.evaluate(&inside, std::slice::from_ref(&poi), at(5));
    assert!(decisions[0].fired);

    let decisions = evaluator.evaluate(&inside, std::slice::from_ref(&poi), at(125));
    assert_eq!(decisions[0].reason, TriggerReason::OnCooldown);

    // Walking away and back inside the window does not re-arm
    let outside = Position::new(offset_north(LAT, 200.0), LON, at(200));
    let decisions = evaluator.evaluate(&outside, std::slice::from_ref(&poi), at(200));
    assert_eq!(decisions[0].reason, TriggerReason::OutOfRadius);
    let decisions = evaluator.evaluate(&inside, std::slice::from_ref(&poi), at(300));
    assert_eq!(decisions[0].reason, TriggerReason::OnCooldown);

    let decisions = evaluator.evaluate(&inside, std::slice::from_ref(&poi), at(606));
    assert!(decisions[0].fired);
}

#[test]
fn test_batch_priority_order() {
    let mut evaluator = GeofenceEvaluator::new(50.0, Duration::ZERO, Duration::from_secs(600));
    evaluator.start(at(0));

    let candidates = vec![
        PoiCandidate::new(1, "Low", LAT, LON).with_priority(1),
        PoiCandidate::new(2, "High", LAT, LON).with_priority(10),
        PoiCandidate::new(3, "Far", offset_north(LAT, 500.0), LON).with_priority(99),
        PoiCandidate::new(4, "Mid", LAT, LON).with_priority(5),
    ];
    let here = Position::new(LAT, LON, at(1));
    let fired: Vec<PoiId> = evaluator
        .evaluate(&here, &candidates, at(1))
        .into_iter()
        .filter(|d| d.fired)
        .map(|d| d.poi_id)
        .collect();

    assert_eq!(fired, vec![PoiId(2), PoiId(4), PoiId(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_timeout_falls_back_to_capped_speech() {
    let speech = Arc::new(CapturingSpeech::default());
    let config = Arc::new(Config::default().with_synthesis_timeout_ms(5_000));
    let resolver = NarrationResolver::new(
        Arc::new(HangingSynthesis),
        speech.clone(),
        config,
        Arc::new(Metrics::new()),
    );

    let poi = PoiCandidate::new(7, "Van Mieu", LAT, LON).with_description(&"ancient ".repeat(80));
    let started = tokio::time::Instant::now();
    let outcome = resolver.resolve(&poi, "en", &CancellationToken::new()).await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(outcome, NarrationOutcome::LocalSpeech { locale: "en-GB".to_string(), chars: 300 });

    let spoken = speech.spoken.lock();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].0.starts_with("Van Mieu. ancient"));
    assert!(spoken[0].0.chars().count() <= 300);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_enqueues_never_overlap() {
    let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(2)));
    let queue = AudioPlaybackQueue::new(
        Arc::new(MemorySource),
        backend.clone(),
        Arc::new(NoopAudioFocus),
        Arc::new(Metrics::new()),
    );
    let mut events = queue.subscribe();

    let mut handles = Vec::new();
    for i in 0..5 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let url = format!("http://host/audio/{}.mp3", i);
            queue.enqueue(PlaybackQueueItem::new(&url, Some(PoiId(i)), 0))
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), EnqueueOutcome::Queued);
    }

    let mut completed = 0;
    while completed < 5 {
        if let PlaybackEvent::Completed { .. } = events.recv().await.unwrap() {
            completed += 1;
        }
    }

    assert_eq!(backend.peak_concurrent(), 1);

    // Let the drain worker observe the empty queue and exit
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_poi_is_deduplicated() {
    let backend = Arc::new(SimulatedAudioBackend::new().with_fixed_duration(Duration::from_secs(4)));
    let queue = AudioPlaybackQueue::new(
        Arc::new(MemorySource),
        backend,
        Arc::new(NoopAudioFocus),
        Arc::new(Metrics::new()),
    );
    let mut events = queue.subscribe();

    let first = PlaybackQueueItem::new("http://host/audio/1_vi.mp3", Some(PoiId(1)), 0);
    assert_eq!(queue.enqueue(first.clone()), EnqueueOutcome::Queued);

    // Wait for the first item to start playing
    loop {
        if let PlaybackEvent::Started { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(queue.enqueue(first), EnqueueOutcome::AlreadyPlaying);

    // Same POI in another language while playing is still a duplicate
    let other_language = PlaybackQueueItem::new("http://host/audio/1_en.mp3", Some(PoiId(1)), 0);
    assert_eq!(queue.enqueue(other_language), EnqueueOutcome::AlreadyPlaying);

    let second = PlaybackQueueItem::new("http://host/audio/2.mp3", Some(PoiId(2)), 0);
    assert_eq!(queue.enqueue(second.clone()), EnqueueOutcome::Queued);
    assert_eq!(queue.enqueue(second), EnqueueOutcome::AlreadyQueued);
    assert_eq!(queue.pending_len(), 1);

    queue.stop();
    assert!(!queue.state().is_playing);
    assert_eq!(queue.pending_len(), 0);
}
