//! IO modules - external system interfaces
//!
//! Every collaborator the narration core talks to sits behind a trait here:
//! - `position` - device location (`PositionSource`, route replay)
//! - `api` - REST backend: POI lookup, remote synthesis, visit logging
//! - `speech` - on-device speech synthesis
//! - `audio` - playback backend, audio focus, payload acquisition
//! - `audio_cache` - SHA-256 keyed download cache
//! - `analytics` - non-blocking analytics channel and publisher

pub mod analytics;
pub mod api;
pub mod audio;
pub mod audio_cache;
pub mod position;
pub mod speech;

// Re-export commonly used types
pub use analytics::{
    create_analytics_channel, AnalyticsEvent, AnalyticsPublisher, AnalyticsSender, AnalyticsSink,
    NoopAnalytics,
};
pub use api::{ApiClient, ApiError, PoiLookup, RemoteSynthesis, SynthesisRequest};
pub use audio::{
    ActivePlayback, AudioBackend, AudioClip, AudioFocus, AudioSource, NoopAudioFocus,
    PlaybackError, SimulatedAudioBackend,
};
pub use audio_cache::{AudioCache, AudioFetcher, HttpAudioFetcher};
pub use position::{PositionError, PositionSource, ReplayPositionSource};
pub use speech::{ConsoleSpeechEngine, LocalSpeechEngine, SpeechError};
