// HTTP surface: session, upload and translate endpoints plus monitoring

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, MatchedPath, Multipart, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::core::errors::{DetectionError, SessionError};
use crate::core::types::{
    ImageId, ImageSource, Language, LanguageSet, SessionConfig, SessionId, SourceImage,
};
use crate::core::Config;
use crate::orchestration::{ImageRecord, SessionOrchestrator, SessionStore};
use crate::utils::Metrics;

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub metrics: Arc<Metrics>,
    /// Inference backend reported by /health
    pub backend: String,
}

/// Request-level failure, rendered as `{"error": ...}`
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::Session(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Session(e) => {
                let status = match &e {
                    SessionError::SessionNotFound(_)
                    | SessionError::ImageNotFound(_)
                    | SessionError::NoAudio(_)
                    | SessionError::NoPreview(_) => StatusCode::NOT_FOUND,
                    SessionError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    SessionError::NoInputLanguages
                    | SessionError::UnsupportedLanguages { .. }
                    | SessionError::UnknownLanguage(_) => StatusCode::BAD_REQUEST,
                    SessionError::SessionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => {
                error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/languages", get(languages))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/config", put(update_config))
        .route("/sessions/{id}/images", post(upload_images))
        .route("/sessions/{id}/images/{image_id}", get(get_image))
        .route("/sessions/{id}/images/{image_id}/translate", post(translate_image))
        .route("/sessions/{id}/images/{image_id}/preview", get(get_preview))
        .route("/sessions/{id}/images/{image_id}/audio", get(get_audio))
        .route_layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(path) = request.extensions().get::<MatchedPath>() {
        state
            .metrics
            .record_endpoint_request(&format!("{} {}", request.method(), path.as_str()));
    }
    next.run(request).await
}

fn parse_session_id(raw: &str) -> ApiResult<SessionId> {
    raw.parse()
        .map_err(|_| ApiError::Session(SessionError::SessionNotFound(raw.to_string())))
}

async fn root() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.backend,
        "active_sessions": state.store.len(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize metrics: {}", e)))
}

#[derive(Debug, Serialize)]
struct LanguageInfo {
    code: &'static str,
    name: &'static str,
    translation_code: &'static str,
    speech_code: &'static str,
    script: &'static str,
}

async fn languages() -> Json<Vec<LanguageInfo>> {
    Json(
        Language::ALL
            .iter()
            .map(|lang| LanguageInfo {
                code: lang.code(),
                name: lang.name(),
                translation_code: lang.translation_code(),
                speech_code: lang.speech_code(),
                script: lang.script().as_str(),
            })
            .collect(),
    )
}

/// Language selection; omitted fields keep their current value
#[derive(Debug, Default, Deserialize)]
struct ConfigRequest {
    input_languages: Option<Vec<String>>,
    target_language: Option<String>,
}

impl ConfigRequest {
    fn parse(body: &[u8]) -> ApiResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
    }

    fn apply(self, base: &SessionConfig) -> ApiResult<SessionConfig> {
        let input_languages = match self.input_languages {
            Some(codes) => codes
                .iter()
                .map(|code| code.parse::<Language>())
                .collect::<Result<LanguageSet, _>>()
                .map_err(SessionError::from)?,
            None => base.input_languages.clone(),
        };
        // Refuse sets the recognizer cannot serve before any image is uploaded
        input_languages.recognition_script().map_err(|e| match e {
            DetectionError::UnsupportedLanguages { languages, reason } => {
                SessionError::UnsupportedLanguages { languages, reason }
            }
            _ => SessionError::NoInputLanguages,
        })?;
        let target_language = match self.target_language {
            Some(code) => code.parse::<Language>().map_err(SessionError::from)?,
            None => base.target_language,
        };

        Ok(SessionConfig {
            input_languages,
            target_language,
        })
    }
}

async fn create_session(State(state): State<AppState>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let config = ConfigRequest::parse(&body)?.apply(&SessionConfig::default())?;
    let id = state.store.create(config)?;

    let slot = state.store.get(&id)?;
    let view = slot.lock().await.view();
    info!("Session {} started [{} → {}]", id, view.config.input_languages, view.config.target_language);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let view = slot.lock().await.view();
    Ok(Json(view))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.remove(&parse_session_id(&id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = ConfigRequest::parse(&body)?;
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let mut session = slot.lock().await;

    let config = request.apply(session.config())?;
    session.set_config(config)?;
    Ok(Json(session.view()))
}

/// Upload images endpoint
///
/// # Request Format:
/// - multipart/form-data
/// - Field "images": zero or more image files (PNG/JPEG)
/// - Field "camera" (optional): one camera capture
///
/// Uploaded files are processed before the camera capture.
async fn upload_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let slot = state.store.get(&parse_session_id(&id)?)?;

    let mut uploads = Vec::new();
    let mut camera = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        let source = match name.as_str() {
            "images" => ImageSource::Upload,
            "camera" => ImageSource::Camera,
            _ => continue,
        };
        let filename = field.file_name().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;

        // Browsers send an empty part for an untouched file input
        if data.is_empty() {
            continue;
        }

        let image = SourceImage {
            source,
            filename,
            bytes: data.to_vec(),
        };
        match source {
            ImageSource::Upload => uploads.push(image),
            ImageSource::Camera => camera = Some(image),
        }
    }
    uploads.extend(camera);

    if uploads.is_empty() {
        return Err(ApiError::BadRequest("No images provided".to_string()));
    }

    let mut session = slot.lock().await;
    let ids = state.orchestrator.process_upload(&mut session, uploads).await?;
    let images = ids
        .iter()
        .map(|id| session.image(id).map(ImageRecord::view))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "images": images }))))
}

async fn get_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let session = slot.lock().await;
    Ok(Json(session.image(&ImageId::new(image_id))?.view()))
}

async fn translate_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let mut session = slot.lock().await;
    let view = state
        .orchestrator
        .translate(&mut session, &ImageId::new(image_id))
        .await?;
    Ok(Json(view))
}

async fn get_preview(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let session = slot.lock().await;
    let image_id = ImageId::new(image_id);

    let png = session
        .image(&image_id)?
        .preview
        .clone()
        .ok_or_else(|| SessionError::NoPreview(image_id.to_string()))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn get_audio(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let slot = state.store.get(&parse_session_id(&id)?)?;
    let session = slot.lock().await;
    let image_id = ImageId::new(image_id);

    let clip = session
        .image(&image_id)?
        .audio
        .clone()
        .ok_or_else(|| SessionError::NoAudio(image_id.to_string()))?;

    Ok(([(header::CONTENT_TYPE, clip.mime_type)], clip.bytes).into_response())
}
