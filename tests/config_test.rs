//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tour_narrator::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[api]
base_url = "http://test-host:8080/api/"
timeout_ms = 3000

[tracking]
default_interval_ms = 4000
min_interval_ms = 2000
lookup_radius_km = 0.5

[geofence]
radius_m = 30.0
debounce_ms = 1000
cooldown_secs = 120

[narration]
language = "en"
synthesis_timeout_ms = 2500
max_speech_chars = 200

[narration.voices]
en = "en-GB-Wavenet-B"

[audio]
cache_dir = "/tmp/tour-audio"

[analytics]
enabled = false
tourist_id = 42
buffer_size = 64

[metrics]
interval_secs = 15

[route]
file = "routes/old-quarter.toml"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.api_base_url(), "http://test-host:8080/api/");
    assert_eq!(config.audio_base_url(), "http://test-host:8080/");
    assert_eq!(config.api_timeout(), Duration::from_millis(3000));
    assert_eq!(config.default_interval(), Duration::from_millis(4000));
    assert_eq!(config.min_interval(), Duration::from_millis(2000));
    // Unset keys keep their defaults
    assert_eq!(config.failure_backoff(), Duration::from_millis(5000));
    assert_eq!(config.lookup_radius_km(), 0.5);
    assert_eq!(config.geofence_radius_m(), 30.0);
    assert_eq!(config.debounce_ms(), 1000);
    assert_eq!(config.cooldown_secs(), 120);
    assert_eq!(config.language(), "en");
    assert_eq!(config.synthesis_timeout(), Duration::from_millis(2500));
    assert_eq!(config.max_speech_chars(), 200);
    assert_eq!(config.voice_for("en"), "en-GB-Wavenet-B");
    assert_eq!(config.voice_for("ko"), "ko-KR-Wavenet-A");
    assert_eq!(config.audio_cache_dir(), "/tmp/tour-audio");
    assert!(!config.analytics_enabled());
    assert_eq!(config.tourist_id(), Some(42));
    assert_eq!(config.analytics_buffer_size(), 64);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.route_file(), Some("routes/old-quarter.toml"));
}

#[test]
fn test_explicit_audio_base_url() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[api]
base_url = "http://host/api/"
audio_base_url = "https://cdn.example.org/"
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.audio_base_url(), "https://cdn.example.org/");
    assert_eq!(config.geofence_radius_m(), 50.0);
    assert_eq!(config.cooldown_secs(), 600);
}

#[test]
fn test_missing_api_section_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[geofence]\nradius_m = 10.0\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.geofence_radius_m(), 50.0);
    assert_eq!(config.language(), "vi");
    assert_eq!(config.route_file(), None);
}

#[test]
fn test_builder_overrides() {
    let config = Config::default()
        .with_language("ko")
        .with_route_file("routes/demo.toml")
        .with_cooldown_secs(60);

    assert_eq!(config.language(), "ko");
    assert_eq!(config.route_file(), Some("routes/demo.toml"));
    assert_eq!(config.cooldown_secs(), 60);
}
