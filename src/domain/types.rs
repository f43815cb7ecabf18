//! Shared types for the narration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for POI IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PoiId(pub i64);

impl std::fmt::Display for PoiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything with a latitude/longitude pair (degrees)
pub trait Coordinates {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

/// A single position fix from the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    #[inline]
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self { latitude, longitude, timestamp }
    }

    /// Fix stamped with the current wall-clock time
    #[inline]
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, Utc::now())
    }
}

impl Coordinates for Position {
    #[inline]
    fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Pre-recorded narration reference attached to a POI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationRef {
    pub url: String,
    /// Language the recording is in, if known
    #[serde(default)]
    pub language_code: Option<String>,
}

/// A POI offered by the lookup collaborator for one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiCandidate {
    pub id: PoiId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Higher = more important
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub narration_ref: Option<NarrationRef>,
}

impl PoiCandidate {
    pub fn new(id: i64, name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            id: PoiId(id),
            name: name.to_string(),
            description: String::new(),
            latitude,
            longitude,
            priority: 0,
            narration_ref: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_narration(mut self, url: &str, language_code: Option<&str>) -> Self {
        self.narration_ref = Some(NarrationRef {
            url: url.to_string(),
            language_code: language_code.map(str::to_string),
        });
        self
    }
}

impl Coordinates for PoiCandidate {
    #[inline]
    fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Why a (position, POI) evaluation did or did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerReason {
    Fired,
    OutOfRadius,
    Debounced,
    OnCooldown,
}

impl TriggerReason {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Fired => "fired",
            TriggerReason::OutOfRadius => "out_of_radius",
            TriggerReason::Debounced => "debounced",
            TriggerReason::OnCooldown => "on_cooldown",
        }
    }
}

/// Outcome of evaluating one POI against one position sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TriggerDecision {
    pub poi_id: PoiId,
    pub fired: bool,
    pub reason: TriggerReason,
    /// Distance from the sample to the POI at evaluation time
    pub distance_m: f64,
}

impl TriggerDecision {
    #[inline]
    pub fn new(poi_id: PoiId, reason: TriggerReason, distance_m: f64) -> Self {
        Self { poi_id, fired: reason == TriggerReason::Fired, reason, distance_m }
    }
}

/// What caused a narration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerSource {
    /// Geofence entry during tracking
    Geofence,
    /// Explicit user request (detail page, QR scan, ...)
    Manual,
}

impl TriggerSource {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Geofence => "geofence",
            TriggerSource::Manual => "manual",
        }
    }
}

/// Request to narrate one POI in one language
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationRequest {
    pub poi_id: PoiId,
    pub language_code: String,
    pub priority: i32,
    pub trigger: TriggerSource,
}

/// An item waiting in (or playing from) the audio queue
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackQueueItem {
    pub source_url: String,
    pub poi_id: Option<PoiId>,
    pub priority: i32,
    /// Language the narration was requested in
    pub language_code: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl PlaybackQueueItem {
    pub fn new(source_url: &str, poi_id: Option<PoiId>, priority: i32) -> Self {
        Self {
            source_url: source_url.to_string(),
            poi_id,
            priority,
            language_code: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_language(mut self, language_code: &str) -> Self {
        self.language_code = Some(language_code.to_string());
        self
    }
}

/// Snapshot of what the audio queue is currently playing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_url: Option<String>,
    pub current_poi_id: Option<PoiId>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PlaybackState {
    /// True if `item` targets the URL or POI that is playing right now
    pub fn is_duplicate_of_current(&self, item: &PlaybackQueueItem) -> bool {
        if !self.is_playing {
            return false;
        }
        if self.current_url.as_deref() == Some(item.source_url.as_str()) {
            return true;
        }
        item.poi_id.is_some() && self.current_poi_id == item.poi_id
    }
}
