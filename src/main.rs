//! Tour narrator - location-aware walking tour narration
//!
//! Replays a recorded route against the tour backend: POIs near each fix are
//! evaluated against their geofences and narrated through the playback
//! queue, with the on-device speech fallback logged to the console.
//!
//! Module structure:
//! - `domain/` - Core types (Position, PoiCandidate, decisions) and geodesy
//! - `io/` - External interfaces (position, REST API, speech, audio, analytics)
//! - `services/` - Narration logic (poller, geofence, resolver, queue, session)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tour_narrator::infra::{Config, Metrics};
use tour_narrator::io::{
    create_analytics_channel, AnalyticsPublisher, AnalyticsSink, ApiClient, AudioCache,
    ConsoleSpeechEngine, HttpAudioFetcher, NoopAnalytics, NoopAudioFocus, ReplayPositionSource,
    SimulatedAudioBackend,
};
use tour_narrator::services::{SessionDeps, SessionEvent, TourSessionController};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Tour narrator - geofence-triggered POI narration
#[derive(Parser, Debug)]
#[command(name = "tour-narrator", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Route file to replay (overrides [route] file)
    #[arg(short, long)]
    route: Option<String>,

    /// Narration language code (overrides [narration] language)
    #[arg(short, long)]
    language: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("tour-narrator starting");

    let args = Args::parse();

    let mut config = Config::load_from_path(&args.config);
    if let Some(route) = &args.route {
        config = config.with_route_file(route);
    }
    if let Some(language) = &args.language {
        config = config.with_language(language);
    }

    info!(
        config_file = %config.config_file(),
        api_base_url = %config.api_base_url(),
        audio_base_url = %config.audio_base_url(),
        language = %config.language(),
        geofence_radius_m = %config.geofence_radius_m(),
        debounce_ms = %config.debounce_ms(),
        cooldown_secs = %config.cooldown_secs(),
        route_file = ?config.route_file(),
        "config_loaded"
    );

    let route_file = config
        .route_file()
        .context("No route file configured; pass --route or set [route] file")?;
    let position = Arc::new(ReplayPositionSource::from_file(route_file)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let api = ApiClient::new(&config).context("Failed to build HTTP client")?;

    // Analytics publisher (if enabled)
    let analytics: Arc<dyn AnalyticsSink> = if config.analytics_enabled() {
        let (sender, rx) = create_analytics_channel(config.analytics_buffer_size(), metrics.clone());
        let publisher = AnalyticsPublisher::new(api.clone(), rx, config.tourist_id());
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        Arc::new(sender)
    } else {
        Arc::new(NoopAnalytics)
    };

    // Start metrics reporter
    let metrics_reporter = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_reporter.report().log();
        }
    });

    let fetcher = Arc::new(HttpAudioFetcher::new(api.http().clone(), api.audio_base_url()));
    let api = Arc::new(api);
    let deps = SessionDeps {
        position,
        lookup: api.clone(),
        synthesis: api,
        speech: Arc::new(ConsoleSpeechEngine::default()),
        audio_source: Arc::new(AudioCache::new(config.audio_cache_dir(), fetcher, metrics.clone())),
        audio_backend: Arc::new(SimulatedAudioBackend::new()),
        focus: Arc::new(NoopAudioFocus),
        analytics,
        metrics: metrics.clone(),
    };

    let (mut controller, mut events) = TourSessionController::new(config, deps);
    controller.start().context("Failed to start tracking")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let stop = matches!(event, SessionEvent::PermissionDenied);
                log_event(&event);
                if stop {
                    break;
                }
            }
        }
    }

    controller.stop().await;
    let _ = shutdown_tx.send(true);
    metrics.report().log();

    // Give the analytics publisher a moment to drain
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("tour-narrator shutdown complete");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::TrackingStarted { session_id } => {
            info!(session_id = %session_id, "event_tracking_started");
        }
        SessionEvent::PositionUpdated { position, candidates } => {
            info!(
                lat = %position.latitude,
                lon = %position.longitude,
                candidates = %candidates,
                "event_position_updated"
            );
        }
        SessionEvent::TriggerFired { poi_id, name, distance_m } => {
            info!(poi_id = %poi_id, name = %name, distance_m = format!("{:.1}", distance_m), "event_trigger_fired");
        }
        SessionEvent::NarrationResolved { poi_id, outcome } => {
            info!(poi_id = %poi_id, outcome = %outcome.kind(), "event_narration_resolved");
        }
        SessionEvent::PlaybackStarted { poi_id, url } => {
            info!(poi_id = ?poi_id, url = %url, "event_playback_started");
        }
        SessionEvent::PlaybackCompleted { poi_id, source } => {
            info!(poi_id = ?poi_id, source = ?source, "event_playback_completed");
        }
        SessionEvent::PlaybackFailed { poi_id, error } => {
            warn!(poi_id = ?poi_id, error = %error, "event_playback_failed");
        }
        SessionEvent::LocationUnavailable { error } => {
            warn!(error = %error, "event_location_unavailable");
        }
        SessionEvent::PermissionDenied => {
            warn!("event_permission_denied");
        }
        SessionEvent::TrackingStopped { session_id } => {
            info!(session_id = %session_id, "event_tracking_stopped");
        }
    }
}
