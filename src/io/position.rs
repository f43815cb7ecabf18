//! Position source capability and a route-replay implementation
//!
//! The device location stack is an external collaborator. The core only sees
//! `PositionSource`; `ReplayPositionSource` walks a recorded route from a TOML
//! file and is used for field rehearsal and by the binary on headless hosts.

use crate::domain::types::Position;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Why a position could not be acquired
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix available")]
    NoFix,
    #[error("location not supported on this device")]
    Unsupported,
    #[error("position request timed out")]
    Timeout,
}

impl PositionError {
    /// Permission errors stop tracking; everything else is retried
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, PositionError::PermissionDenied)
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionError::PermissionDenied => "permission_denied",
            PositionError::NoFix => "no_fix",
            PositionError::Unsupported => "unsupported",
            PositionError::Timeout => "timeout",
        }
    }
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Acquire a fresh fix, giving up after `timeout`
    async fn current_position(&self, timeout: Duration) -> Result<Position, PositionError>;

    /// Most recent cached fix, if the platform keeps one
    async fn last_known_position(&self) -> Option<Position> {
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RoutePoint {
    latitude: f64,
    longitude: f64,
    /// Hold this point for N consecutive fixes (default 1)
    #[serde(default = "default_repeat")]
    repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RouteFile {
    points: Vec<RoutePoint>,
}

/// Replays a fixed route, one point per fix, then parks on the last point
pub struct ReplayPositionSource {
    points: Vec<(f64, f64)>,
    cursor: Mutex<usize>,
    last: Mutex<Option<Position>>,
}

impl ReplayPositionSource {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points, cursor: Mutex::new(0), last: Mutex::new(None) }
    }

    /// Load a route from TOML:
    ///
    /// ```toml
    /// [[points]]
    /// latitude = 10.7615
    /// longitude = 106.7027
    /// repeat = 3
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read route file {}", path.display()))?;
        let route: RouteFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse route file {}", path.display()))?;

        let points: Vec<(f64, f64)> = route
            .points
            .iter()
            .flat_map(|p| std::iter::repeat((p.latitude, p.longitude)).take(p.repeat as usize))
            .collect();

        info!(file = %path.display(), points = %points.len(), "route_loaded");
        Ok(Self::new(points))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl PositionSource for ReplayPositionSource {
    async fn current_position(&self, _timeout: Duration) -> Result<Position, PositionError> {
        let (lat, lon) = {
            let mut cursor = self.cursor.lock();
            let Some(&point) = self.points.get(*cursor).or_else(|| self.points.last()) else {
                return Err(PositionError::NoFix);
            };
            if *cursor < self.points.len() {
                *cursor += 1;
            }
            point
        };

        let position = Position::now(lat, lon);
        debug!(lat = %lat, lon = %lon, "replay_fix");
        *self.last.lock() = Some(position);
        Ok(position)
    }

    async fn last_known_position(&self) -> Option<Position> {
        *self.last.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_replay_walks_then_parks() {
        let source = ReplayPositionSource::new(vec![(1.0, 2.0), (3.0, 4.0)]);
        let timeout = Duration::from_secs(1);

        let a = source.current_position(timeout).await.unwrap();
        let b = source.current_position(timeout).await.unwrap();
        let c = source.current_position(timeout).await.unwrap();

        assert_eq!((a.latitude, a.longitude), (1.0, 2.0));
        assert_eq!((b.latitude, b.longitude), (3.0, 4.0));
        assert_eq!((c.latitude, c.longitude), (3.0, 4.0));
        assert_eq!(source.last_known_position().await.map(|p| p.latitude), Some(3.0));
    }

    #[tokio::test]
    async fn test_empty_route_has_no_fix() {
        let source = ReplayPositionSource::new(vec![]);
        let result = source.current_position(Duration::from_secs(1)).await;
        assert_eq!(result, Err(PositionError::NoFix));
        assert!(source.last_known_position().await.is_none());
    }

    #[test]
    fn test_route_file_expands_repeats() {
        let mut file = NamedTempFile::new().unwrap();
        let content = r#"
[[points]]
latitude = 10.7615
longitude = 106.7027
repeat = 3

[[points]]
latitude = 10.7620
longitude = 106.7030
"#;
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();

        let source = ReplayPositionSource::from_file(file.path()).unwrap();
        assert_eq!(source.len(), 4);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(PositionError::PermissionDenied.is_fatal());
        assert!(!PositionError::NoFix.is_fatal());
        assert!(!PositionError::Timeout.is_fatal());
    }
}
