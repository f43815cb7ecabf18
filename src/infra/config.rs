//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub audio_base_url: Option<String>,
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    /// Candidate lookup radius, independent of the geofence radius
    #[serde(default = "default_lookup_radius_km")]
    pub lookup_radius_km: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
            fix_timeout_ms: default_fix_timeout_ms(),
            lookup_radius_km: default_lookup_radius_km(),
        }
    }
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_min_interval_ms() -> u64 {
    3_000
}

fn default_failure_backoff_ms() -> u64 {
    5_000
}

fn default_fix_timeout_ms() -> u64 {
    10_000
}

fn default_lookup_radius_km() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            debounce_ms: default_debounce_ms(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_radius_m() -> f64 {
    50.0
}

fn default_debounce_ms() -> u64 {
    3_000
}

fn default_cooldown_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct NarrationConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    #[serde(default = "default_max_speech_chars")]
    pub max_speech_chars: usize,
    /// Language code to remote voice name (e.g., "en" = "en-US-Wavenet-D")
    #[serde(default)]
    pub voices: HashMap<String, String>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            max_speech_chars: default_max_speech_chars(),
            voices: HashMap::new(),
        }
    }
}

fn default_language() -> String {
    "vi".to_string()
}

fn default_synthesis_timeout_ms() -> u64 {
    5_000
}

fn default_max_speech_chars() -> usize {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { cache_dir: default_cache_dir() }
    }
}

fn default_cache_dir() -> String {
    "cache/audio".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_enabled")]
    pub enabled: bool,
    /// Registered tourist ID; visit logs and location updates need one
    #[serde(default)]
    pub tourist_id: Option<i64>,
    #[serde(default = "default_analytics_buffer")]
    pub buffer_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_analytics_enabled(),
            tourist_id: None,
            buffer_size: default_analytics_buffer(),
        }
    }
}

fn default_analytics_enabled() -> bool {
    true
}

fn default_analytics_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouteConfig {
    /// Route file replayed by the binary's position source
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub route: RouteConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    api_base_url: String,
    audio_base_url: String,
    api_timeout_ms: u64,
    default_interval_ms: u64,
    min_interval_ms: u64,
    failure_backoff_ms: u64,
    fix_timeout_ms: u64,
    lookup_radius_km: f64,
    geofence_radius_m: f64,
    debounce_ms: u64,
    cooldown_secs: u64,
    language: String,
    synthesis_timeout_ms: u64,
    max_speech_chars: usize,
    voices: HashMap<String, String>,
    audio_cache_dir: String,
    analytics_enabled: bool,
    tourist_id: Option<i64>,
    analytics_buffer_size: usize,
    metrics_interval_secs: u64,
    route_file: Option<String>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://10.0.2.2:5089/api/".to_string(),
            audio_base_url: "http://10.0.2.2:5089/".to_string(),
            api_timeout_ms: 10_000,
            default_interval_ms: 5_000,
            min_interval_ms: 3_000,
            failure_backoff_ms: 5_000,
            fix_timeout_ms: 10_000,
            lookup_radius_km: 1.0,
            geofence_radius_m: 50.0,
            debounce_ms: 3_000,
            cooldown_secs: 600,
            language: "vi".to_string(),
            synthesis_timeout_ms: 5_000,
            max_speech_chars: 300,
            voices: Self::default_voices(),
            audio_cache_dir: "cache/audio".to_string(),
            analytics_enabled: true,
            tourist_id: None,
            analytics_buffer_size: 256,
            metrics_interval_secs: 30,
            route_file: None,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    fn default_voices() -> HashMap<String, String> {
        let mut voices = HashMap::new();
        voices.insert("vi".to_string(), "vi-VN-Wavenet-A".to_string());
        voices.insert("en".to_string(), "en-US-Wavenet-D".to_string());
        voices.insert("ko".to_string(), "ko-KR-Wavenet-A".to_string());
        voices
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        // Configured voices override the built-in table per language
        let mut voices = Self::default_voices();
        voices.extend(toml_config.narration.voices);

        let audio_base_url = toml_config
            .api
            .audio_base_url
            .unwrap_or_else(|| Self::strip_api_suffix(&toml_config.api.base_url));

        Ok(Self {
            api_base_url: toml_config.api.base_url,
            audio_base_url,
            api_timeout_ms: toml_config.api.timeout_ms,
            default_interval_ms: toml_config.tracking.default_interval_ms,
            min_interval_ms: toml_config.tracking.min_interval_ms,
            failure_backoff_ms: toml_config.tracking.failure_backoff_ms,
            fix_timeout_ms: toml_config.tracking.fix_timeout_ms,
            lookup_radius_km: toml_config.tracking.lookup_radius_km,
            geofence_radius_m: toml_config.geofence.radius_m,
            debounce_ms: toml_config.geofence.debounce_ms,
            cooldown_secs: toml_config.geofence.cooldown_secs,
            language: toml_config.narration.language,
            synthesis_timeout_ms: toml_config.narration.synthesis_timeout_ms,
            max_speech_chars: toml_config.narration.max_speech_chars,
            voices,
            audio_cache_dir: toml_config.audio.cache_dir,
            analytics_enabled: toml_config.analytics.enabled,
            tourist_id: toml_config.analytics.tourist_id,
            analytics_buffer_size: toml_config.analytics.buffer_size,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            route_file: toml_config.route.file,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// "http://host/api/" -> "http://host/"
    fn strip_api_suffix(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        match trimmed.strip_suffix("/api") {
            Some(root) => format!("{}/", root),
            None => format!("{}/", trimmed),
        }
    }

    /// Remote voice name for a language, falling back to the Vietnamese voice
    pub fn voice_for(&self, language_code: &str) -> &str {
        self.voices
            .get(language_code)
            .or_else(|| self.voices.get("vi"))
            .map(String::as_str)
            .unwrap_or("vi-VN-Wavenet-A")
    }

    // Getters for all config fields
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn audio_base_url(&self) -> &str {
        &self.audio_base_url
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    pub fn lookup_radius_km(&self) -> f64 {
        self.lookup_radius_km
    }

    pub fn geofence_radius_m(&self) -> f64 {
        self.geofence_radius_m
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn max_speech_chars(&self) -> usize {
        self.max_speech_chars
    }

    pub fn audio_cache_dir(&self) -> &str {
        &self.audio_cache_dir
    }

    pub fn analytics_enabled(&self) -> bool {
        self.analytics_enabled
    }

    pub fn tourist_id(&self) -> Option<i64> {
        self.tourist_id
    }

    pub fn analytics_buffer_size(&self) -> usize {
        self.analytics_buffer_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn route_file(&self) -> Option<&str> {
        self.route_file.as_deref()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the geofence radius
    pub fn with_geofence_radius_m(mut self, radius_m: f64) -> Self {
        self.geofence_radius_m = radius_m;
        self
    }

    /// Builder method to override the start-up debounce window
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Builder method to override the per-POI cooldown
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Builder method to override the narration language
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Builder method to override the remote synthesis timeout
    pub fn with_synthesis_timeout_ms(mut self, ms: u64) -> Self {
        self.synthesis_timeout_ms = ms;
        self
    }

    /// Builder method to override the route file
    pub fn with_route_file(mut self, file: &str) -> Self {
        self.route_file = Some(file.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.geofence_radius_m(), 50.0);
        assert_eq!(config.debounce_ms(), 3_000);
        assert_eq!(config.cooldown_secs(), 600);
        assert_eq!(config.default_interval(), Duration::from_millis(5_000));
        assert_eq!(config.min_interval(), Duration::from_millis(3_000));
        assert_eq!(config.failure_backoff(), Duration::from_millis(5_000));
        assert_eq!(config.fix_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_speech_chars(), 300);
        assert_eq!(config.language(), "vi");
    }

    #[test]
    fn test_voice_for_language() {
        let config = Config::default();
        assert_eq!(config.voice_for("en"), "en-US-Wavenet-D");
        assert_eq!(config.voice_for("ko"), "ko-KR-Wavenet-A");
        assert_eq!(config.voice_for("fr"), "vi-VN-Wavenet-A");
    }

    #[test]
    fn test_strip_api_suffix() {
        assert_eq!(Config::strip_api_suffix("http://host:5089/api/"), "http://host:5089/");
        assert_eq!(Config::strip_api_suffix("http://host:5089/api"), "http://host:5089/");
        assert_eq!(Config::strip_api_suffix("http://host:5089"), "http://host:5089/");
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["tour-narrator".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "tour-narrator".to_string(),
            "--config".to_string(),
            "config/hcmc.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/hcmc.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["tour-narrator".to_string(), "--config=config/hanoi.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/hanoi.toml");
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = Config::default()
            .with_geofence_radius_m(25.0)
            .with_debounce_ms(0)
            .with_cooldown_secs(60)
            .with_language("en");
        assert_eq!(config.geofence_radius_m(), 25.0);
        assert_eq!(config.debounce_ms(), 0);
        assert_eq!(config.cooldown_secs(), 60);
        assert_eq!(config.language(), "en");
    }
}
