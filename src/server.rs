//! HTTP upload service.
//!
//! - `POST /upload`: multipart form with the archive in `file` and the team name in
//!   `name`. Answers with the bundled PDF as an attachment.
//! - `GET /health`: liveness and version.
//! - everything else: files from the configured static directory.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use code_bundle_core::job::Job;
use code_bundle_core::pipeline::{Pipeline, PipelineError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::load_config::ServerSection;

/// State shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("cannot store upload: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Multipart(e) => e.status(),
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Pipeline(PipelineError::RenderTimeout(_) | PipelineError::MergeTimeout(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "Upload failed");
        } else {
            warn!(error = %self, %status, "Upload rejected");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the service router.
pub fn build_router(state: AppState, settings: &ServerSection) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/health", get(health_check))
        .fallback_service(ServeDir::new(&settings.static_dir))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `router` on an already bound listener until the process stops.
pub async fn start_server(listener: TcpListener, router: Router) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr()?, "Starting upload server");
    axum::serve(listener, router).await
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Receive an archive, run the job and answer with the bundled PDF.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    // The team name may arrive after the archive, so the job starts unnamed.
    let mut job = Job::new(String::new());
    let workspace = state.pipeline.open_workspace(&job)?;
    let mut received = 0u64;
    let mut has_file = false;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") if !has_file => {
                let mut out = tokio::fs::File::create(workspace.upload_path()).await?;
                while let Some(chunk) = field.chunk().await? {
                    out.write_all(&chunk).await?;
                    received += chunk.len() as u64;
                }
                out.flush().await?;
                has_file = true;
            }
            Some("name") => {
                job.team_name = field.text().await?.trim().to_string();
            }
            other => {
                warn!(field = ?other, "Ignoring unexpected form field");
            }
        }
    }

    if !has_file {
        return Err(AppError::BadRequest("missing `file` part in upload".to_string()));
    }
    info!(
        job_file = %workspace.job_file(),
        team = %job.team_name,
        bytes = received,
        "Archive received"
    );

    let report = state.pipeline.run(&job, workspace).await?;
    info!(?report, "Returning bundled PDF");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&report.pdf_file_name)),
        ],
        report.pdf,
    )
        .into_response())
}

/// `attachment` header value with an ASCII fallback name and the exact UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    if fallback == file_name {
        return format!("attachment; filename=\"{fallback}\"");
    }
    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
