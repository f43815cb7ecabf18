//! REST backend client: POI lookup, remote speech synthesis, visit/analytics logging
//!
//! Endpoints (relative to `api.base_url`):
//! - GET  poi/nearby?latitude=&longitude=&radiusKm=
//! - POST audio/generate              {poiId, languageCode, voiceName}
//! - POST tourist/{id}/visits         {pointOfInterestId, triggerMethod, latitude, longitude}
//! - POST analytics/event             {touristId, poiId, eventType, languageCode, durationSeconds}
//! - PUT  tourist/{id}/location       {latitude, longitude}

use crate::domain::types::{NarrationRef, PoiCandidate, PoiId, Position};
use crate::infra::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Candidate POIs around a position
#[async_trait]
pub trait PoiLookup: Send + Sync {
    async fn nearby(&self, position: &Position, radius_km: f64)
        -> Result<Vec<PoiCandidate>, ApiError>;
}

/// Text for server-side speech generation
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub poi_id: PoiId,
    pub text: String,
    pub language_code: String,
    pub voice_name: String,
}

/// Server-side speech generation; returns a playable URL
#[async_trait]
pub trait RemoteSynthesis: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioInfoDto {
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    audio_file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoiDto {
    id: i64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    audio: Option<AudioInfoDto>,
}

impl PoiDto {
    fn into_candidate(self, audio_base_url: &str) -> PoiCandidate {
        let narration_ref = self.audio.and_then(|audio| {
            let url = audio.audio_file_url.filter(|u| !u.trim().is_empty())?;
            Some(NarrationRef {
                url: resolve_url(audio_base_url, &url),
                language_code: audio.language_code,
            })
        });

        PoiCandidate {
            id: PoiId(self.id),
            name: self.name,
            description: self.description.unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            priority: self.priority,
            narration_ref,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAudioBody<'a> {
    poi_id: i64,
    language_code: &'a str,
    voice_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedAudio {
    #[serde(default, alias = "audioUrl")]
    audio_file_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisitBody<'a> {
    point_of_interest_id: i64,
    trigger_method: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackEventBody<'a> {
    tourist_id: Option<i64>,
    poi_id: i64,
    event_type: &'a str,
    language_code: Option<&'a str>,
    duration_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LocationBody {
    latitude: f64,
    longitude: f64,
}

/// Join a possibly-relative audio path onto the audio host
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
}

/// HTTP client for the tour backend
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    audio_base_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder().timeout(config.api_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url().to_string(),
            audio_base_url: config.audio_base_url().to_string(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn audio_base_url(&self) -> &str {
        &self.audio_base_url
    }

    fn endpoint(&self, path: &str) -> String {
        resolve_url(&self.base_url, path)
    }

    fn check_status(response: &reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status(status.as_u16()))
        }
    }

    pub async fn log_visit(
        &self,
        tourist_id: i64,
        poi_id: PoiId,
        trigger_method: &str,
        position: Option<&Position>,
    ) -> Result<(), ApiError> {
        let body = VisitBody {
            point_of_interest_id: poi_id.0,
            trigger_method,
            latitude: position.map(|p| p.latitude),
            longitude: position.map(|p| p.longitude),
        };
        let url = self.endpoint(&format!("tourist/{}/visits", tourist_id));
        let response = self.client.post(url).json(&body).send().await?;
        Self::check_status(&response)
    }

    pub async fn track_event(
        &self,
        tourist_id: Option<i64>,
        poi_id: PoiId,
        event_type: &str,
        language_code: Option<&str>,
        duration_seconds: Option<u64>,
    ) -> Result<(), ApiError> {
        let body = TrackEventBody {
            tourist_id,
            poi_id: poi_id.0,
            event_type,
            language_code,
            duration_seconds,
        };
        let response =
            self.client.post(self.endpoint("analytics/event")).json(&body).send().await?;
        Self::check_status(&response)
    }

    pub async fn update_location(&self, tourist_id: i64, position: &Position) -> Result<(), ApiError> {
        let body = LocationBody { latitude: position.latitude, longitude: position.longitude };
        let url = self.endpoint(&format!("tourist/{}/location", tourist_id));
        let response = self.client.put(url).json(&body).send().await?;
        Self::check_status(&response)
    }
}

#[async_trait]
impl PoiLookup for ApiClient {
    async fn nearby(
        &self,
        position: &Position,
        radius_km: f64,
    ) -> Result<Vec<PoiCandidate>, ApiError> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.endpoint("poi/nearby"))
            .query(&[
                ("latitude", position.latitude.to_string()),
                ("longitude", position.longitude.to_string()),
                ("radiusKm", radius_km.to_string()),
            ])
            .send()
            .await?;
        Self::check_status(&response)?;

        let dtos: Vec<PoiDto> =
            response.json().await.map_err(|e| ApiError::Malformed(e.to_string()))?;
        let candidates: Vec<PoiCandidate> =
            dtos.into_iter().map(|dto| dto.into_candidate(&self.audio_base_url)).collect();

        debug!(
            count = %candidates.len(),
            radius_km = %radius_km,
            latency_ms = %start.elapsed().as_millis(),
            "poi_lookup_done"
        );
        Ok(candidates)
    }
}

#[async_trait]
impl RemoteSynthesis for ApiClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, ApiError> {
        let body = GenerateAudioBody {
            poi_id: request.poi_id.0,
            language_code: &request.language_code,
            voice_name: &request.voice_name,
        };
        let response =
            self.client.post(self.endpoint("audio/generate")).json(&body).send().await?;
        if let Err(e) = Self::check_status(&response) {
            warn!(poi_id = %request.poi_id, error = %e, "synthesis_status_error");
            return Err(e);
        }

        let generated: GeneratedAudio =
            response.json().await.map_err(|e| ApiError::Malformed(e.to_string()))?;
        match generated.audio_file_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(resolve_url(&self.audio_base_url, &url)),
            None => Err(ApiError::Malformed("missing audio url".to_string())),
        }
    }
}
