//! Domain models - core tour types and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `Position` - a device position fix
//! - `PoiCandidate` - a narratable point of interest offered per poll cycle
//! - `TriggerDecision` - geofence evaluation result for one (position, POI) pair
//! - `PlaybackQueueItem` / `PlaybackState` - audio queue records
//! - `geo` - Haversine distance

pub mod geo;
pub mod types;

pub use geo::{distance_km, distance_m};
pub use types::{
    Coordinates, NarrationRef, NarrationRequest, PlaybackQueueItem, PlaybackState, PoiCandidate,
    PoiId, Position, TriggerDecision, TriggerReason, TriggerSource,
};
