//! Services - narration business logic
//!
//! - `poller` - adaptive position stream
//! - `geofence` - trigger decisions (debounce, radius, cooldown)
//! - `resolver` - three-tier narration resolution
//! - `playback_queue` - serialized, deduplicating audio playback
//! - `narration_worker` - resolves fired POIs off the evaluation path
//! - `session` - lifecycle controller tying it all together

pub mod geofence;
pub mod narration_worker;
pub mod playback_queue;
pub mod poller;
pub mod resolver;
pub mod session;

// Re-export commonly used types
pub use geofence::{GeofenceEvaluator, GeofencePhase};
pub use playback_queue::{AudioPlaybackQueue, EnqueueOutcome, PlaybackEvent};
pub use poller::{AdaptivePoller, PollerEvent, PollerSettings};
pub use resolver::{NarrationFailure, NarrationOutcome, NarrationResolver};
pub use session::{
    PlaybackSource, SessionDeps, SessionError, SessionEvent, TourSessionController,
};
