//! On-device speech synthesis capability
//!
//! The last-resort narration tier. Engines report which locales they can
//! voice; the resolver picks one and hands over the text.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("no voice available for locale {0}")]
    LocaleUnavailable(String),
    #[error("speech engine failed: {0}")]
    Engine(String),
}

#[async_trait]
pub trait LocalSpeechEngine: Send + Sync {
    /// Locale tags the engine can voice, e.g. "vi-VN", "en-US"
    async fn available_locales(&self) -> Vec<String>;

    /// Speak `text` in `locale`; returns once the utterance has finished
    async fn speak(&self, text: &str, locale: &str) -> Result<(), SpeechError>;

    /// Silence the current utterance, if any. Idempotent.
    fn stop(&self) {}
}

/// Writes utterances to the log instead of a speaker
pub struct ConsoleSpeechEngine {
    locales: Vec<String>,
}

impl ConsoleSpeechEngine {
    pub fn new(locales: Vec<String>) -> Self {
        Self { locales }
    }
}

impl Default for ConsoleSpeechEngine {
    fn default() -> Self {
        Self::new(vec!["vi-VN".to_string(), "en-US".to_string(), "ko-KR".to_string()])
    }
}

#[async_trait]
impl LocalSpeechEngine for ConsoleSpeechEngine {
    async fn available_locales(&self) -> Vec<String> {
        self.locales.clone()
    }

    async fn speak(&self, text: &str, locale: &str) -> Result<(), SpeechError> {
        if !self.locales.iter().any(|l| l == locale) {
            return Err(SpeechError::LocaleUnavailable(locale.to_string()));
        }
        info!(locale = %locale, chars = %text.chars().count(), text = %text, "local_speech");
        Ok(())
    }

    fn stop(&self) {
        debug!("local_speech_stopped");
    }
}
