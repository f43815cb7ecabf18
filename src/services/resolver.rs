//! Narration resolution
//!
//! Turns a POI + language into something audible, trying three tiers in
//! order and stopping at the first that works:
//! 1. Pre-recorded audio attached to the POI
//! 2. Remote synthesis (bounded by a timeout, cancellable)
//! 3. On-device speech of the POI name and description
//!
//! Tier failures are logged and fall through; only Tier 3 is terminal.

use crate::domain::types::PoiCandidate;
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, NarrationTier};
use crate::io::api::{RemoteSynthesis, SynthesisRequest};
use crate::io::speech::LocalSpeechEngine;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NarrationFailure {
    #[error("narration cancelled")]
    Cancelled,
    #[error("all narration tiers failed: {0}")]
    AllTiersFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationOutcome {
    PreRecorded { url: String },
    Synthesized { url: String },
    /// Spoken directly by the device; nothing to enqueue
    LocalSpeech { locale: String, chars: usize },
    Failed(NarrationFailure),
}

impl NarrationOutcome {
    /// Playable URL, for outcomes that go through the audio queue
    pub fn url(&self) -> Option<&str> {
        match self {
            NarrationOutcome::PreRecorded { url } | NarrationOutcome::Synthesized { url } => {
                Some(url)
            }
            _ => None,
        }
    }

    pub fn tier(&self) -> NarrationTier {
        match self {
            NarrationOutcome::PreRecorded { .. } => NarrationTier::PreRecorded,
            NarrationOutcome::Synthesized { .. } => NarrationTier::Synthesized,
            NarrationOutcome::LocalSpeech { .. } => NarrationTier::LocalSpeech,
            NarrationOutcome::Failed(_) => NarrationTier::Failed,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NarrationOutcome::PreRecorded { .. } => "pre_recorded",
            NarrationOutcome::Synthesized { .. } => "synthesized",
            NarrationOutcome::LocalSpeech { .. } => "local_speech",
            NarrationOutcome::Failed(_) => "failed",
        }
    }
}

/// Static locale for a language when the engine offers no prefix match
pub fn default_locale(language_code: &str) -> &'static str {
    match language_code {
        "en" => "en-US",
        "ko" => "ko-KR",
        _ => "vi-VN",
    }
}

/// Pick the engine locale for a language: first tag that starts with the
/// language code, else the static default
pub fn pick_locale(available: &[String], language_code: &str) -> String {
    let wanted = language_code.to_ascii_lowercase();
    available
        .iter()
        .find(|tag| tag.to_ascii_lowercase().starts_with(&wanted))
        .cloned()
        .unwrap_or_else(|| default_locale(language_code).to_string())
}

/// "{name}. {description}" (or just the name), cut to `max_chars` characters
pub fn speech_text(poi: &PoiCandidate, max_chars: usize) -> String {
    let description = poi.description.trim();
    let full = if description.is_empty() {
        poi.name.clone()
    } else {
        format!("{}. {}", poi.name, description)
    };
    full.chars().take(max_chars).collect()
}

pub struct NarrationResolver {
    synthesis: Arc<dyn RemoteSynthesis>,
    speech: Arc<dyn LocalSpeechEngine>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl NarrationResolver {
    pub fn new(
        synthesis: Arc<dyn RemoteSynthesis>,
        speech: Arc<dyn LocalSpeechEngine>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { synthesis, speech, config, metrics }
    }

    pub async fn resolve(
        &self,
        poi: &PoiCandidate,
        language_code: &str,
        cancel: &CancellationToken,
    ) -> NarrationOutcome {
        let start = Instant::now();
        let outcome = self.resolve_tiers(poi, language_code, cancel).await;
        self.metrics.record_narration(outcome.tier());

        info!(
            poi_id = %poi.id,
            language = %language_code,
            outcome = %outcome.kind(),
            latency_ms = %start.elapsed().as_millis(),
            "narration_resolved"
        );
        outcome
    }

    async fn resolve_tiers(
        &self,
        poi: &PoiCandidate,
        language_code: &str,
        cancel: &CancellationToken,
    ) -> NarrationOutcome {
        // Tier 1
        if let Some(narration) = &poi.narration_ref {
            if !narration.url.trim().is_empty() {
                if let Some(lang) = narration.language_code.as_deref() {
                    if lang != language_code {
                        debug!(poi_id = %poi.id, wanted = %language_code, got = %lang, "narration_language_mismatch");
                    }
                }
                return NarrationOutcome::PreRecorded { url: narration.url.clone() };
            }
        }

        if cancel.is_cancelled() {
            return NarrationOutcome::Failed(NarrationFailure::Cancelled);
        }

        // Tier 2
        let request = SynthesisRequest {
            poi_id: poi.id,
            text: speech_text(poi, usize::MAX),
            language_code: language_code.to_string(),
            voice_name: self.config.voice_for(language_code).to_string(),
        };
        let timeout = self.config.synthesis_timeout();
        let attempt = tokio::select! {
            _ = cancel.cancelled() => {
                info!(poi_id = %poi.id, "narration_cancelled");
                return NarrationOutcome::Failed(NarrationFailure::Cancelled);
            }
            result = tokio::time::timeout(timeout, self.synthesis.synthesize(&request)) => result,
        };

        match attempt {
            Ok(Ok(url)) if !url.trim().is_empty() => {
                return NarrationOutcome::Synthesized { url };
            }
            Ok(Ok(_)) => {
                self.metrics.record_synthesis_failure();
                warn!(poi_id = %poi.id, tier = 2, "narration_tier_failed");
            }
            Ok(Err(e)) => {
                self.metrics.record_synthesis_failure();
                warn!(poi_id = %poi.id, tier = 2, error = %e, "narration_tier_failed");
            }
            Err(_) => {
                self.metrics.record_synthesis_failure();
                warn!(poi_id = %poi.id, tier = 2, timeout_ms = %timeout.as_millis(), "narration_tier_timeout");
            }
        }

        if cancel.is_cancelled() {
            return NarrationOutcome::Failed(NarrationFailure::Cancelled);
        }

        // Tier 3
        let text = speech_text(poi, self.config.max_speech_chars());
        let locales = self.speech.available_locales().await;
        let locale = pick_locale(&locales, language_code);
        let chars = text.chars().count();

        let spoken = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.speech.stop();
                info!(poi_id = %poi.id, tier = 3, "narration_cancelled");
                return NarrationOutcome::Failed(NarrationFailure::Cancelled);
            }
            result = self.speech.speak(&text, &locale) => result,
        };

        match spoken {
            Ok(()) => NarrationOutcome::LocalSpeech { locale, chars },
            Err(e) => {
                warn!(poi_id = %poi.id, tier = 3, locale = %locale, error = %e, "narration_tier_failed");
                NarrationOutcome::Failed(NarrationFailure::AllTiersFailed(e.to_string()))
            }
        }
    }
}
