//! On-disk cache of downloaded narration audio
//!
//! Files are keyed by the SHA-256 of the source URL:
//! `<cache_dir>/audio_<first 16 hex chars>.mp3`. A non-empty cached file is
//! a hit and skips the download entirely.

use crate::infra::metrics::Metrics;
use crate::io::api::resolve_url;
use crate::io::audio::{AudioClip, AudioSource, PlaybackError};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_HEX_LEN: usize = 16;

/// Fetches raw audio bytes for a URL
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, PlaybackError>;
}

pub struct HttpAudioFetcher {
    client: reqwest::Client,
    audio_base_url: String,
}

impl HttpAudioFetcher {
    pub fn new(client: reqwest::Client, audio_base_url: &str) -> Self {
        Self { client, audio_base_url: audio_base_url.to_string() }
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, PlaybackError> {
        let full_url = resolve_url(&self.audio_base_url, url);
        let response = self
            .client
            .get(&full_url)
            .send()
            .await
            .map_err(|e| PlaybackError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Download(format!("status {} for {}", status, full_url)));
        }

        response.bytes().await.map_err(|e| PlaybackError::Download(e.to_string()))
    }
}

/// Cache file name for a source URL
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex = hex::encode(digest);
    format!("audio_{}.mp3", &hex[..KEY_HEX_LEN])
}

/// `AudioSource` backed by a download directory
pub struct AudioCache {
    dir: PathBuf,
    fetcher: Arc<dyn AudioFetcher>,
    metrics: Arc<Metrics>,
}

impl AudioCache {
    pub fn new<P: AsRef<Path>>(dir: P, fetcher: Arc<dyn AudioFetcher>, metrics: Arc<Metrics>) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), fetcher, metrics }
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    async fn cached_size(path: &Path) -> Option<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
            _ => None,
        }
    }
}

#[async_trait]
impl AudioSource for AudioCache {
    async fn acquire(&self, url: &str) -> Result<AudioClip, PlaybackError> {
        let path = self.path_for(url);

        if let Some(size_bytes) = Self::cached_size(&path).await {
            self.metrics.record_cache_hit();
            debug!(url = %url, path = %path.display(), "audio_cache_hit");
            return Ok(AudioClip { source_url: url.to_string(), path: Some(path), size_bytes });
        }

        self.metrics.record_cache_miss();
        let payload = self.fetcher.fetch(url).await?;
        if payload.is_empty() {
            warn!(url = %url, "audio_payload_empty");
            return Err(PlaybackError::EmptyPayload);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        // Write-then-rename so a crash never leaves a truncated hit behind
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(url = %url, bytes = %payload.len(), path = %path.display(), "audio_cached");
        Ok(AudioClip { source_url: url.to_string(), path: Some(path), size_bytes: payload.len() as u64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingFetcher {
        payload: Bytes,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, PlaybackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn test_cache_file_name_is_stable() {
        let a = cache_file_name("http://host/audio/1.mp3");
        let b = cache_file_name("http://host/audio/1.mp3");
        let c = cache_file_name("http://host/audio/2.mp3");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("audio_") && a.ends_with(".mp3"));
        assert_eq!(a.len(), "audio_".len() + KEY_HEX_LEN + ".mp3".len());
    }

    #[tokio::test]
    async fn test_second_acquire_hits_cache() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            payload: Bytes::from_static(b"ID3fakeaudio"),
            calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(Metrics::new());
        let cache = AudioCache::new(dir.path(), fetcher.clone(), metrics.clone());

        let first = cache.acquire("http://host/a.mp3").await.unwrap();
        let second = cache.acquire("http://host/a.mp3").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.size_bytes, 12);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(metrics.cache_misses(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_error_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let fetcher =
            Arc::new(CountingFetcher { payload: Bytes::new(), calls: AtomicUsize::new(0) });
        let cache = AudioCache::new(dir.path(), fetcher, Arc::new(Metrics::new()));

        let result = cache.acquire("http://host/empty.mp3").await;
        assert!(matches!(result, Err(PlaybackError::EmptyPayload)));
        assert!(!cache.path_for("http://host/empty.mp3").exists());
    }
}
