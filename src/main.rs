// Main entry point for the image text translator server

use image_translator::{
    api::{self, AppState},
    core::Config,
    orchestration::{SessionOrchestrator, SessionStore},
    services::{
        DetectionService, DetectorCache, GoogleSpeech, GoogleTranslator, OnnxDetectorFactory,
        SpeechService, TranslationService,
    },
    utils::Metrics,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    let level = config.log_level().as_str().to_lowercase();
    let filter = EnvFilter::new(format!("image_translator={level},tower_http={level},ort=off"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== IMAGE TEXT TRANSLATOR ===");
    info!(
        "Config: max_dimension={} models={} detectors={} session_ttl={}s",
        config.max_dimension(),
        config.detection.models_dir.display(),
        config.detection.cache_size,
        config.sessions.idle_ttl.as_secs()
    );

    let metrics = Arc::new(Metrics::new());

    // OCR: models load lazily, one detector per language set
    let factory = OnnxDetectorFactory::new(config.detection.clone());
    let default_languages = image_translator::LanguageSet::new([image_translator::Language::English]);
    if !factory.models_available(&default_languages) {
        warn!(
            "⚠️  OCR models not found under {} - text detection will fail until they are installed",
            config.detection.models_dir.display()
        );
    }
    let cache = Arc::new(
        DetectorCache::new(Arc::new(factory), config.detection.cache_size).with_metrics(Arc::clone(&metrics)),
    );
    let detection = DetectionService::new(cache, config.detection.timeout).with_metrics(Arc::clone(&metrics));

    let translator = GoogleTranslator::new(
        config.services.translate_base_url.clone(),
        config.services.translation_timeout,
    )?;
    let translation = TranslationService::new(Arc::new(translator), config.services.translation_timeout)
        .with_metrics(Arc::clone(&metrics));

    let speech = GoogleSpeech::new(config.services.tts_base_url.clone(), config.services.speech_timeout)?;
    let speech =
        SpeechService::new(Arc::new(speech), config.services.speech_timeout).with_metrics(Arc::clone(&metrics));

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::new(detection),
        Arc::new(translation),
        Arc::new(speech),
        config.max_dimension(),
        Arc::clone(&metrics),
    ));

    let store = Arc::new(
        SessionStore::new(config.sessions.idle_ttl, config.sessions.max_sessions)
            .with_metrics(Arc::clone(&metrics)),
    );
    let sweep_interval = (config.sessions.idle_ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    store.start_sweeper(sweep_interval);

    let state = AppState {
        config: Arc::clone(&config),
        store,
        orchestrator,
        metrics,
        backend: config
            .detection
            .inference_backend
            .clone()
            .unwrap_or_else(|| "auto".to_string()),
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET    /                                        - Web page");
    info!("  GET    /health                                  - Health check");
    info!("  GET    /metrics                                 - Prometheus metrics");
    info!("  GET    /stats                                   - Detailed statistics");
    info!("  GET    /languages                               - Supported languages");
    info!("  POST   /sessions                                - Start a session");
    info!("  GET    /sessions/{{id}}                           - Session state");
    info!("  PUT    /sessions/{{id}}/config                    - Change languages");
    info!("  DELETE /sessions/{{id}}                           - End a session");
    info!("  POST   /sessions/{{id}}/images                    - Upload images (multipart/form-data)");
    info!("  GET    /sessions/{{id}}/images/{{image_id}}         - Image state");
    info!("  POST   /sessions/{{id}}/images/{{image_id}}/translate - Translate and speak");
    info!("  GET    /sessions/{{id}}/images/{{image_id}}/preview - Prepared image (PNG)");
    info!("  GET    /sessions/{{id}}/images/{{image_id}}/audio   - Translation audio (MP3)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
