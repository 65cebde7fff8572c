//! HTTP surface: `POST /split`, static stem serving and health.

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::{
    config::ServiceConfig,
    core::{orchestrator::RequestOrchestrator, url::DEFAULT_STATIC_PREFIX},
    error::SplitError,
    types::UploadedAsset,
};

const FILE_FIELD: &str = "file";
const UNNAMED_UPLOAD: &str = "upload.wav";

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<RequestOrchestrator>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// JSON error body; intake problems are the client's fault, everything else is ours.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Multipart failures keep axum's status (413 for an over-limit body).
    fn multipart(status: StatusCode, body_text: String) -> Self {
        let message = SplitError::Intake(body_text).to_string();
        tracing::warn!(%status, error = %message, "rejected upload");
        ApiError { status, message }
    }
}

impl From<SplitError> for ApiError {
    fn from(e: SplitError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn app_router(orchestrator: Arc<RequestOrchestrator>, max_upload_bytes: usize) -> Router {
    let static_root = orchestrator.output_root().to_path_buf();

    Router::new()
        .route("/health", get(health))
        .route("/split", post(split))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(AppState { orchestrator })
        .nest_service(DEFAULT_STATIC_PREFIX, ServeDir::new(static_root))
        .layer(CorsLayer::permissive())
}

/// Build the pipeline from `cfg` and serve until ctrl-c.
pub async fn serve(cfg: ServiceConfig) -> anyhow::Result<()> {
    let bind: SocketAddr = cfg.bind_addr()?;
    let endpoint = cfg.public_endpoint()?;
    let orchestrator = Arc::new(cfg.build_orchestrator()?);

    std::fs::create_dir_all(orchestrator.output_root())?;

    tracing::info!(
        bind = %bind,
        public_base_url = %endpoint.base_url(),
        output = %orchestrator.output_root().display(),
        stems = orchestrator.spec().mode.count(),
        isolation = ?cfg.workspace.isolation,
        format = %cfg.transcode.format,
        "starting stem-splitter server"
    );

    let app = app_router(orchestrator, cfg.max_upload_bytes());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn split(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::multipart(e.status(), e.body_text()))?;
    let asset = read_upload(&mut multipart).await?;

    tracing::info!(
        file_name = %asset.file_name,
        bytes = asset.bytes.len(),
        "received split request"
    );

    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::task::spawn_blocking(move || orchestrator.run(asset))
        .await
        .map_err(|e| SplitError::Anyhow(anyhow!("pipeline task failed: {e}")))??;

    Ok(Json(outcome.to_response_json()))
}

/// First part named `file`, or failing that the first part that carries a filename.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadedAsset, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::multipart(e.status(), e.body_text()))?
    {
        let is_file = field.name() == Some(FILE_FIELD) || field.file_name().is_some();
        if !is_file {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(UNNAMED_UPLOAD)
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::multipart(e.status(), e.body_text()))?;
        return Ok(UploadedAsset {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    Err(SplitError::Intake(format!("multipart body has no `{FILE_FIELD}` field")).into())
}
