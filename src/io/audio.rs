//! Audio playback capabilities
//!
//! - `AudioSource` turns a narration URL into a local clip (download + cache)
//! - `AudioBackend` starts a clip and hands back an `ActivePlayback` handle
//! - `AudioFocus` arbitrates the output device with other apps
//!
//! `SimulatedAudioBackend` plays nothing but holds each clip for a duration
//! estimated from its payload size, which is enough for headless runs and
//! for timing-sensitive tests under a paused tokio clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("audio payload is empty")]
    EmptyPayload,
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audio backend failed: {0}")]
    Backend(String),
    #[error("playback interrupted")]
    Interrupted,
}

/// A narration payload ready to play
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub source_url: String,
    /// Local file, when the payload was cached to disk
    pub path: Option<PathBuf>,
    pub size_bytes: u64,
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn acquire(&self, url: &str) -> Result<AudioClip, PlaybackError>;
}

/// Handle to a clip that is currently playing
#[async_trait]
pub trait ActivePlayback: Send + Sync {
    /// Resolves when the clip ends naturally (`Ok`) or is stopped (`Interrupted`)
    async fn finished(&self) -> Result<(), PlaybackError>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn start(&self, clip: &AudioClip) -> Result<Arc<dyn ActivePlayback>, PlaybackError>;
}

/// Exclusive use of the audio output
pub trait AudioFocus: Send + Sync {
    /// Returns false if focus was refused; playback proceeds either way
    fn acquire(&self) -> bool;
    fn release(&self);
}

pub struct NoopAudioFocus;

impl AudioFocus for NoopAudioFocus {
    fn acquire(&self) -> bool {
        true
    }

    fn release(&self) {}
}

/// Typical narration MP3 bitrate (128 kbit/s)
const DEFAULT_BYTES_PER_SEC: u64 = 16_000;
const TICK: Duration = Duration::from_millis(100);

/// Timed stand-in for a real audio device
pub struct SimulatedAudioBackend {
    bytes_per_sec: u64,
    fixed_duration: Option<Duration>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SimulatedAudioBackend {
    pub fn new() -> Self {
        Self {
            bytes_per_sec: DEFAULT_BYTES_PER_SEC,
            fixed_duration: None,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Play every clip for exactly `duration`, ignoring payload size
    pub fn with_fixed_duration(mut self, duration: Duration) -> Self {
        self.fixed_duration = Some(duration);
        self
    }

    pub fn duration_for(&self, clip: &AudioClip) -> Duration {
        if let Some(d) = self.fixed_duration {
            return d;
        }
        Duration::from_millis(clip.size_bytes.saturating_mul(1000) / self.bytes_per_sec.max(1))
    }

    /// Highest number of clips that were ever playing at once
    pub fn peak_concurrent(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioBackend for SimulatedAudioBackend {
    async fn start(&self, clip: &AudioClip) -> Result<Arc<dyn ActivePlayback>, PlaybackError> {
        if clip.size_bytes == 0 && self.fixed_duration.is_none() {
            return Err(PlaybackError::EmptyPayload);
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        if now_active > 1 {
            warn!(active = %now_active, url = %clip.source_url, "simulated_playback_overlap");
        }

        let duration = self.duration_for(clip);
        debug!(url = %clip.source_url, duration_ms = %duration.as_millis(), "simulated_playback_start");

        Ok(Arc::new(SimulatedPlayback {
            remaining: Mutex::new(duration),
            paused: AtomicBool::new(false),
            stopped: CancellationToken::new(),
            released: AtomicBool::new(false),
            active: self.active.clone(),
        }))
    }
}

struct SimulatedPlayback {
    remaining: Mutex<Duration>,
    paused: AtomicBool,
    stopped: CancellationToken,
    released: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl SimulatedPlayback {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ActivePlayback for SimulatedPlayback {
    async fn finished(&self) -> Result<(), PlaybackError> {
        loop {
            let step = {
                let remaining = self.remaining.lock();
                if remaining.is_zero() {
                    break;
                }
                (*remaining).min(TICK)
            };

            tokio::select! {
                _ = self.stopped.cancelled() => {
                    self.release();
                    return Err(PlaybackError::Interrupted);
                }
                _ = tokio::time::sleep(step) => {}
            }

            // Paused ticks do not consume the clip
            if !self.paused.load(Ordering::Relaxed) {
                let mut remaining = self.remaining.lock();
                *remaining = remaining.saturating_sub(step);
            }
        }

        self.release();
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stopped.cancel();
        self.release();
    }
}
