//! HTTP server.
//!
//! Accepts document uploads, streams each run's events back as server-sent
//! events, and serves finished reports for download.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Multipart upload (`file`, `mode`) → SSE stream of run events |
//! | `GET`  | `/download/{filename}` | Download a generated report |
//! | `GET`  | `/config` | Output location, model and modes |
//! | `GET`  | `/modes` | Available analysis modes with their labels |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Event stream
//!
//! Every SSE `data:` line of `/analyze` carries one JSON event tagged by
//! `type` (see [`crate::events::PipelineEvent`]). The stream ends after the
//! `done` or `error` event. Validation problems with the request itself
//! (bad mode, unsupported file type) are reported in-stream as an `error`
//! event; only a malformed multipart body is rejected with an HTTP error.
//!
//! # Error Contract
//!
//! Non-streaming error responses share one schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "report not found: x.md" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can be served from anywhere.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{AnalyzeRequest, Pipeline};
use crate::reports::is_safe_filename;
use crate::synthesis::{ChatClient, SynthesisClient};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server with a chat client built from `[llm]`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let client = ChatClient::from_config(&config.llm)?;
    info!(model = %client.model(), base_url = %config.llm.base_url, "synthesis client ready");
    run_server_with_client(config, Arc::new(client)).await
}

/// Starts the server with a caller-supplied synthesis client.
pub async fn run_server_with_client(
    config: &Config,
    client: Arc<dyn SynthesisClient>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = Arc::new(Pipeline::from_config(config, client)?);
    let app = router(Arc::new(config.clone()), pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Book Distill listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router.
pub fn router(config: Arc<Config>, pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(config.server.max_upload_bytes);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/download/{filename}", get(handle_download))
        .route("/config", get(handle_config))
        .route("/modes", get(handle_modes))
        .route("/health", get(handle_health))
        .layer(body_limit)
        .layer(cors)
        .with_state(AppState { config, pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /analyze ============

/// Handler for `POST /analyze`.
///
/// Reads the `file` and `mode` parts, starts a run in the background and
/// streams its events. Closing the connection stops the run.
async fn handle_analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut mode = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("could not read upload: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            Some("mode") => {
                mode = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("could not read mode: {}", e)))?;
            }
            _ => {}
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| bad_request("missing 'file' part"))?;
    info!(file = %filename, mode = %mode, bytes = bytes.len(), "analysis requested");

    let mut events = state.pipeline.spawn(AnalyzeRequest {
        filename,
        bytes,
        mode,
    });
    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Event::default().json_data(&event);
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ GET /download/{filename} ============

async fn handle_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if !is_safe_filename(&filename) {
        return Err(bad_request(format!("invalid report name: {}", filename)));
    }
    let bytes = state
        .pipeline
        .reports()
        .read(&filename)
        .await
        .map_err(|e| {
            warn!(file = %filename, error = %format!("{:#}", e), "report read failed");
            internal(format!("could not read report: {}", filename))
        })?
        .ok_or_else(|| not_found(format!("report not found: {}", filename)))?;

    let disposition = format!(
        "attachment; filename*=utf-8''{}",
        encode_rfc5987(&filename)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Percent-encodes a filename for an RFC 5987 `filename*` parameter.
///
/// Unreserved URL characters are a subset of `attr-char`, so they pass through.
fn encode_rfc5987(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

// ============ GET /config, GET /modes ============

#[derive(Serialize)]
struct ModeInfo {
    key: &'static str,
    label: String,
}

#[derive(Serialize)]
struct ConfigResponse {
    output_dir: String,
    model: String,
    max_chunk_chars: usize,
    modes: Vec<ModeInfo>,
}

fn mode_infos(pipeline: &Pipeline) -> Vec<ModeInfo> {
    pipeline
        .modes()
        .list()
        .into_iter()
        .map(|(mode, profile)| ModeInfo {
            key: mode.as_str(),
            label: profile.label.clone(),
        })
        .collect()
}

async fn handle_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let dir = state.pipeline.reports().dir();
    let output_dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    Json(ConfigResponse {
        output_dir: output_dir.display().to_string(),
        model: state.config.llm.model.clone(),
        max_chunk_chars: state.config.chunking.max_chars,
        modes: mode_infos(&state.pipeline),
    })
}

async fn handle_modes(State(state): State<AppState>) -> Json<Vec<ModeInfo>> {
    Json(mode_infos(&state.pipeline))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
