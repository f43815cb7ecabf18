//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Reporting swaps the per-interval counters; totals are monotonic.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::domain::types::TriggerReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800
const BUCKET_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Narration tier counters, indexed by `NarrationTier as usize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationTier {
    PreRecorded = 0,
    Synthesized = 1,
    LocalSpeech = 2,
    Failed = 3,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Position fixes received (monotonic)
    fixes_total: AtomicU64,
    /// Failed position acquisitions (monotonic)
    fix_failures_total: AtomicU64,
    /// Current adaptive polling interval (gauge)
    poll_interval_ms: AtomicU64,
    /// Evaluations since last report (reset on report)
    evaluations_since_report: AtomicU64,
    /// Evaluation latency histogram (reset on report)
    evaluation_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Max evaluation latency (reset on report)
    evaluation_max_us: AtomicU64,
    /// Decisions by reason: fired, out_of_radius, debounced, on_cooldown (monotonic)
    decisions: [AtomicU64; 4],
    /// Narration outcomes by tier (monotonic)
    narrations: [AtomicU64; 4],
    /// Remote synthesis attempts that failed or timed out (monotonic)
    synthesis_failures_total: AtomicU64,
    playback_started_total: AtomicU64,
    playback_completed_total: AtomicU64,
    playback_failed_total: AtomicU64,
    /// Enqueues absorbed by dedupe (monotonic)
    playback_deduped_total: AtomicU64,
    audio_cache_hits: AtomicU64,
    audio_cache_misses: AtomicU64,
    /// Analytics events dropped due to channel full (monotonic)
    analytics_dropped: AtomicU64,
    /// Session events dropped due to channel full (monotonic)
    session_events_dropped: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_total: AtomicU64::new(0),
            fix_failures_total: AtomicU64::new(0),
            poll_interval_ms: AtomicU64::new(0),
            evaluations_since_report: AtomicU64::new(0),
            evaluation_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            evaluation_max_us: AtomicU64::new(0),
            decisions: std::array::from_fn(|_| AtomicU64::new(0)),
            narrations: std::array::from_fn(|_| AtomicU64::new(0)),
            synthesis_failures_total: AtomicU64::new(0),
            playback_started_total: AtomicU64::new(0),
            playback_completed_total: AtomicU64::new(0),
            playback_failed_total: AtomicU64::new(0),
            playback_deduped_total: AtomicU64::new(0),
            audio_cache_hits: AtomicU64::new(0),
            audio_cache_misses: AtomicU64::new(0),
            analytics_dropped: AtomicU64::new(0),
            session_events_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_fix(&self) {
        self.fixes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_failure(&self) {
        self.fix_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_poll_interval_ms(&self, ms: u64) {
        self.poll_interval_ms.store(ms, Ordering::Relaxed);
    }

    /// Record one geofence evaluation pass over a candidate list
    #[inline]
    pub fn record_evaluation(&self, latency_us: u64) {
        self.evaluations_since_report.fetch_add(1, Ordering::Relaxed);
        self.evaluation_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.evaluation_max_us, latency_us);
    }

    #[inline]
    pub fn record_decision(&self, reason: TriggerReason) {
        let idx = match reason {
            TriggerReason::Fired => 0,
            TriggerReason::OutOfRadius => 1,
            TriggerReason::Debounced => 2,
            TriggerReason::OnCooldown => 3,
        };
        self.decisions[idx].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_narration(&self, tier: NarrationTier) {
        self.narrations[tier as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_synthesis_failure(&self) {
        self.synthesis_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_started(&self) {
        self.playback_started_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_completed(&self) {
        self.playback_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_failed(&self) {
        self.playback_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_playback_deduped(&self) {
        self.playback_deduped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.audio_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_miss(&self) {
        self.audio_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analytics_dropped(&self) {
        self.analytics_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_event_dropped(&self) {
        self.session_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fixes_total(&self) -> u64 {
        self.fixes_total.load(Ordering::Relaxed)
    }

    pub fn decisions(&self, reason: TriggerReason) -> u64 {
        let idx = match reason {
            TriggerReason::Fired => 0,
            TriggerReason::OutOfRadius => 1,
            TriggerReason::Debounced => 2,
            TriggerReason::OnCooldown => 3,
        };
        self.decisions[idx].load(Ordering::Relaxed)
    }

    pub fn narrations(&self, tier: NarrationTier) -> u64 {
        self.narrations[tier as usize].load(Ordering::Relaxed)
    }

    pub fn playback_completed_total(&self) -> u64 {
        self.playback_completed_total.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.audio_cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.audio_cache_misses.load(Ordering::Relaxed)
    }

    /// Snapshot counters, resetting the per-interval histogram
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let evaluations = self.evaluations_since_report.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.evaluation_buckets);
        let evaluations_per_sec =
            if elapsed_secs > 0.0 { evaluations as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            fixes_total: self.fixes_total.load(Ordering::Relaxed),
            fix_failures_total: self.fix_failures_total.load(Ordering::Relaxed),
            poll_interval_ms: self.poll_interval_ms.load(Ordering::Relaxed),
            evaluations_per_sec,
            evaluation_buckets: buckets,
            evaluation_p99_us: percentile_from_buckets(&buckets, 0.99),
            evaluation_max_us: self.evaluation_max_us.swap(0, Ordering::Relaxed),
            fired_total: self.decisions[0].load(Ordering::Relaxed),
            out_of_radius_total: self.decisions[1].load(Ordering::Relaxed),
            debounced_total: self.decisions[2].load(Ordering::Relaxed),
            on_cooldown_total: self.decisions[3].load(Ordering::Relaxed),
            prerecorded_total: self.narrations[0].load(Ordering::Relaxed),
            synthesized_total: self.narrations[1].load(Ordering::Relaxed),
            local_speech_total: self.narrations[2].load(Ordering::Relaxed),
            narration_failed_total: self.narrations[3].load(Ordering::Relaxed),
            synthesis_failures_total: self.synthesis_failures_total.load(Ordering::Relaxed),
            playback_started_total: self.playback_started_total.load(Ordering::Relaxed),
            playback_completed_total: self.playback_completed_total.load(Ordering::Relaxed),
            playback_failed_total: self.playback_failed_total.load(Ordering::Relaxed),
            playback_deduped_total: self.playback_deduped_total.load(Ordering::Relaxed),
            cache_hits: self.audio_cache_hits.load(Ordering::Relaxed),
            cache_misses: self.audio_cache_misses.load(Ordering::Relaxed),
            analytics_dropped: self.analytics_dropped.load(Ordering::Relaxed),
            session_events_dropped: self.session_events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub fixes_total: u64,
    pub fix_failures_total: u64,
    pub poll_interval_ms: u64,
    pub evaluations_per_sec: f64,
    pub evaluation_buckets: [u64; METRICS_NUM_BUCKETS],
    pub evaluation_p99_us: u64,
    pub evaluation_max_us: u64,
    pub fired_total: u64,
    pub out_of_radius_total: u64,
    pub debounced_total: u64,
    pub on_cooldown_total: u64,
    pub prerecorded_total: u64,
    pub synthesized_total: u64,
    pub local_speech_total: u64,
    pub narration_failed_total: u64,
    pub synthesis_failures_total: u64,
    pub playback_started_total: u64,
    pub playback_completed_total: u64,
    pub playback_failed_total: u64,
    pub playback_deduped_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub analytics_dropped: u64,
    pub session_events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            fixes_total = %self.fixes_total,
            fix_failures = %self.fix_failures_total,
            poll_interval_ms = %self.poll_interval_ms,
            evals_per_sec = format!("{:.2}", self.evaluations_per_sec),
            eval_p99_us = %self.evaluation_p99_us,
            eval_max_us = %self.evaluation_max_us,
            fired = %self.fired_total,
            on_cooldown = %self.on_cooldown_total,
            debounced = %self.debounced_total,
            prerecorded = %self.prerecorded_total,
            synthesized = %self.synthesized_total,
            local_speech = %self.local_speech_total,
            narration_failed = %self.narration_failed_total,
            playback_completed = %self.playback_completed_total,
            playback_failed = %self.playback_failed_total,
            cache_hits = %self.cache_hits,
            cache_misses = %self.cache_misses,
            analytics_dropped = %self.analytics_dropped,
            "metrics"
        );
    }
}
