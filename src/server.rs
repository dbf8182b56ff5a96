//! HTTP server.
//!
//! The web front end and other collaborators call into the vault through a
//! small JSON API: start and poll scans, resolve unmatched folders, request
//! and fetch downloads, list games.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/scans` | Queue a scan of `{ "root": ... }` (202) |
//! | `GET`  | `/scans` | All scan jobs, newest first |
//! | `GET`  | `/scans/{id}` | One scan job |
//! | `POST` | `/scans/preview` | Classify a root without writing |
//! | `GET`  | `/unmatched` | Unmatched folders, `?status=` filter |
//! | `POST` | `/unmatched/resolve` | Register a folder with supplied metadata |
//! | `POST` | `/downloads` | Request an archive (202) |
//! | `GET`  | `/downloads` | Requests, `?requester_id=` filter |
//! | `GET`  | `/downloads/{id}` | One request |
//! | `GET`  | `/downloads/{id}/artifact` | Stream the finished zip |
//! | `GET`  | `/games` | Games, filtered by query parameters |
//! | `GET`  | `/games/{id}` | One game |
//! | `GET`  | `/paths/availability` | `?path=`: on disk, already registered |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "scan_in_flight", "message": "...", "existing_id": "..." } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `scan_in_flight`,
//! `download_in_progress` and `duplicate_game` (409, with `existing_id`),
//! `saturated` (503), `internal` (500).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};

use game_vault_core::models::{
    DownloadRequest, ExternalRecord, Game, GameFilter, ScanJob, UnmatchedFolder, UnmatchedStatus,
};

use crate::error::VaultError;
use crate::registrar::PathAvailability;
use crate::scanner::ScanReport;
use crate::vault::Vault;

#[derive(Clone)]
struct AppState {
    vault: Arc<Vault>,
}

/// Starts the HTTP server on `[server].bind` and the reconciliation sweep.
///
/// Runs until Ctrl-C, then cancels every job the vault started.
pub async fn run_server(vault: Arc<Vault>) -> anyhow::Result<()> {
    let bind_addr = vault.config().server.bind.clone();
    let sweeper = vault.spawn_sweeper();

    let app = router(vault.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Game Vault listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    vault.shutdown();
    let _ = sweeper.await;
    Ok(())
}

/// The application router, without binding a socket.
pub fn router(vault: Arc<Vault>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/scans", post(handle_start_scan).get(handle_list_scans))
        .route("/scans/preview", post(handle_preview))
        .route("/scans/{id}", get(handle_scan_status))
        .route("/unmatched", get(handle_list_unmatched))
        .route("/unmatched/resolve", post(handle_resolve))
        .route("/downloads", post(handle_request_download).get(handle_list_downloads))
        .route("/downloads/{id}", get(handle_download_status))
        .route("/downloads/{id}/artifact", get(handle_artifact))
        .route("/games", get(handle_list_games))
        .route("/games/{id}", get(handle_get_game))
        .route("/paths/availability", get(handle_path_availability))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { vault })
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
    /// Row that caused a conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    existing_id: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    existing_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                existing_id: self.existing_id,
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
        existing_id: None,
    }
}

fn conflict(code: &str, message: String, existing_id: String) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: code.to_string(),
        message,
        existing_id: Some(existing_id),
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let message = err.to_string();
        match err {
            VaultError::ScanInFlight { existing_id, .. } => {
                conflict("scan_in_flight", message, existing_id)
            }
            VaultError::DuplicateDownloadRequest { existing_id, .. } => {
                conflict("download_in_progress", message, existing_id)
            }
            VaultError::DuplicateGame { existing_id, .. } => {
                conflict("duplicate_game", message, existing_id)
            }
            VaultError::NotFound(_) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found".to_string(),
                message,
                existing_id: None,
            },
            VaultError::InvalidState(_) => bad_request(message),
            VaultError::Saturated => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "saturated".to_string(),
                message,
                existing_id: None,
            },
            other => {
                tracing::error!(error = %other, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message,
                    existing_id: None,
                }
            }
        }
    }
}

type ApiResult<T> = Result<T, AppError>;

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

// ============ Scans ============

#[derive(Deserialize)]
struct RootRequest {
    root: String,
}

async fn handle_start_scan(
    State(state): State<AppState>,
    Json(req): Json<RootRequest>,
) -> ApiResult<(StatusCode, Json<ScanJob>)> {
    if req.root.trim().is_empty() {
        return Err(bad_request("root must not be empty"));
    }
    let job = state.vault.scans().start(&req.root).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn handle_list_scans(State(state): State<AppState>) -> ApiResult<Json<Vec<ScanJob>>> {
    Ok(Json(state.vault.scans().list().await?))
}

async fn handle_scan_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScanJob>> {
    Ok(Json(state.vault.scans().status(&id).await?))
}

async fn handle_preview(
    State(state): State<AppState>,
    Json(req): Json<RootRequest>,
) -> ApiResult<Json<ScanReport>> {
    if req.root.trim().is_empty() {
        return Err(bad_request("root must not be empty"));
    }
    Ok(Json(state.vault.scans().preview(&req.root).await?))
}

// ============ Unmatched ============

#[derive(Deserialize)]
struct UnmatchedQuery {
    status: Option<UnmatchedStatus>,
}

async fn handle_list_unmatched(
    State(state): State<AppState>,
    Query(query): Query<UnmatchedQuery>,
) -> ApiResult<Json<Vec<UnmatchedFolder>>> {
    Ok(Json(state.vault.list_unmatched(query.status).await?))
}

#[derive(Deserialize)]
struct ResolveRequest {
    path: String,
    record: ExternalRecord,
    title: Option<String>,
}

async fn handle_resolve(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<(StatusCode, Json<Game>)> {
    let game = state
        .vault
        .registrar()
        .resolve_unmatched(&req.path, &req.record, req.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(game)))
}

// ============ Downloads ============

#[derive(Deserialize)]
struct DownloadBody {
    requester_id: String,
    game_id: String,
}

async fn handle_request_download(
    State(state): State<AppState>,
    Json(req): Json<DownloadBody>,
) -> ApiResult<(StatusCode, Json<DownloadRequest>)> {
    let request = state
        .vault
        .downloads()
        .request(&req.requester_id, &req.game_id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request)))
}

#[derive(Deserialize)]
struct DownloadsQuery {
    requester_id: Option<String>,
}

async fn handle_list_downloads(
    State(state): State<AppState>,
    Query(query): Query<DownloadsQuery>,
) -> ApiResult<Json<Vec<DownloadRequest>>> {
    Ok(Json(
        state
            .vault
            .downloads()
            .list(query.requester_id.as_deref())
            .await?,
    ))
}

async fn handle_download_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadRequest>> {
    Ok(Json(state.vault.downloads().status(&id).await?))
}

async fn handle_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let (request, path) = state.vault.downloads().artifact(&id).await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::from(VaultError::filesystem(&path, e)))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/zip"),
    );
    if let Some(size) = request.artifact_size {
        headers.insert(header::CONTENT_LENGTH, size.into());
    }
    let disposition = format!("attachment; filename=\"{}.zip\"", request.id);
    if let Ok(value) = disposition.parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

// ============ Games ============

async fn handle_list_games(
    State(state): State<AppState>,
    Query(filter): Query<GameFilter>,
) -> ApiResult<Json<Vec<Game>>> {
    Ok(Json(state.vault.list_games(&filter).await?))
}

async fn handle_get_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Game>> {
    Ok(Json(state.vault.game(&id).await?))
}

#[derive(Deserialize)]
struct PathQuery {
    path: String,
}

async fn handle_path_availability(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<PathAvailability>> {
    Ok(Json(
        state.vault.registrar().path_availability(&query.path).await?,
    ))
}
