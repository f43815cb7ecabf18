//! Tour narrator library
//!
//! Location-aware narration engine: adaptive position polling, geofence
//! triggering, three-tier narration resolution and serialized playback.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
