//! HTTP control surface.
//!
//! Lets an operator trigger and watch sync runs and correct or remove single
//! listings without shell access.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (no auth) |
//! | `GET`  | `/sync/status` | Current or last sync run |
//! | `POST` | `/sync/start` | Start a run: `{"mode": "incremental"}` |
//! | `GET`  | `/listings/{id}` | One listing with its images |
//! | `PATCH`| `/listings/{id}` | Partial field update, `null` clears |
//! | `POST` | `/listings/{id}/delete` | Tombstone, clean media, delete |
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`
//! with the token from `ESTATE_API_TOKEN`. With the `fs` storage backend the
//! stored photos are also served, without auth, under `/media`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "listing not found: 0b6f..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500). A start request while a run is in progress gets `409`
//! with the running status as body.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::config::{require_env, Config, API_TOKEN_ENV};
use crate::extract::{self, ExtractionReport};
use crate::ingest::{self, SyncEngine, SyncReport};
use crate::listings::{self, ListingError, ListingUpdate};
use crate::models::{Listing, SyncMode};

/// Snapshot of the sync state machine: `idle -> running(mode) -> {success, error}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub mode: Option<SyncMode>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub last_error: Option<String>,
    /// `"success"` or `"error"` once a run has finished.
    pub last_exit: Option<String>,
    pub last_report: Option<SyncReport>,
    pub last_extraction: Option<ExtractionReport>,
}

/// Runs at most one sync at a time in the background.
pub struct SyncController {
    engine: Arc<SyncEngine>,
    status: Arc<Mutex<SyncStatus>>,
}

impl SyncController {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            status: Arc::new(Mutex::new(SyncStatus::default())),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.lock().await.clone()
    }

    /// Start a run. Returns the current status unchanged as `Err` when a run
    /// is already in progress.
    pub async fn start(&self, mode: SyncMode) -> Result<SyncStatus, SyncStatus> {
        let mut status = self.status.lock().await;
        if status.running {
            return Err(status.clone());
        }
        status.running = true;
        status.mode = Some(mode);
        status.started_at = Some(now_iso());
        status.finished_at = None;
        let snapshot = status.clone();
        drop(status);

        info!(%mode, "sync run started");
        let engine = self.engine.clone();
        let shared = self.status.clone();
        tokio::spawn(async move {
            // The run gets its own task so a panic surfaces as a `JoinError`
            // here instead of leaving the status stuck at `running`.
            let outcome = match tokio::spawn(async move { execute(&engine, mode).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err((None, format!("sync run aborted: {}", e))),
            };
            let mut status = shared.lock().await;
            status.running = false;
            status.finished_at = Some(now_iso());
            match outcome {
                Ok((report, extraction)) => {
                    info!(%mode, processed = report.processed, "sync run finished");
                    status.last_exit = Some("success".to_string());
                    status.last_error = None;
                    status.last_report = Some(report);
                    status.last_extraction = extraction;
                }
                Err((report, message)) => {
                    error!(%mode, error = %message, "sync run failed");
                    status.last_exit = Some("error".to_string());
                    status.last_error = Some(message);
                    status.last_report = report;
                    status.last_extraction = None;
                }
            }
        });

        Ok(snapshot)
    }
}

type RunOutcome = Result<(SyncReport, Option<ExtractionReport>), (Option<SyncReport>, String)>;

async fn execute(engine: &SyncEngine, mode: SyncMode) -> RunOutcome {
    let report = engine.run(mode).await.map_err(|e| (None, e.to_string()))?;
    if !engine.config().sync.extract_after_sync {
        return Ok((report, None));
    }
    match extract::extract_after_sync(engine.pool(), &engine.config().extraction, &report).await {
        Ok(extraction) => Ok((report, extraction)),
        Err(e) => Err((Some(report), format!("extraction failed: {:#}", e))),
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    controller: Arc<SyncController>,
    api_token: Arc<str>,
}

impl AppState {
    pub fn new(engine: SyncEngine, api_token: &str) -> Self {
        Self {
            controller: Arc::new(SyncController::new(engine)),
            api_token: Arc::from(api_token),
        }
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }
}

/// The control-surface routes, without binding a listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sync/status", get(handle_sync_status))
        .route("/sync/start", post(handle_sync_start))
        .route("/listings/{id}", get(handle_get_listing).patch(handle_patch_listing))
        .route("/listings/{id}/delete", post(handle_delete_listing))
        .layer(cors)
        .with_state(state)
}

/// Start the control surface on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let api_token = require_env(API_TOKEN_ENV)?;
    let engine = ingest::engine_from_config(config).await?;
    let mut app = router(AppState::new(engine, &api_token));
    if config.storage.backend == "fs" {
        if let Some(ref root) = config.storage.root {
            app = app.nest_service("/media", ServeDir::new(root));
        }
    }

    let bind_addr = config.server.bind.clone();
    println!("Control surface listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<ListingError> for AppError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::NotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            ListingError::Invalid { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, "bad_request", err.to_string())
            }
            ListingError::Catalog(ref e) => {
                error!(error = %e, "catalog error");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "catalog error")
            }
        }
    }
}

/// Reject requests without the configured bearer token.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if !token.is_empty() && token == &*state.api_token => Ok(()),
        _ => {
            warn!("rejected request with missing or invalid token");
            Err(AppError::new(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token",
            ))
        }
    }
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

// ============ /sync ============

async fn handle_sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SyncStatus>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.controller.status().await))
}

#[derive(Deserialize)]
struct StartRequest {
    mode: SyncMode,
}

/// `202` with the new status, or `409` with the running one.
async fn handle_sync_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> Result<Response, AppError> {
    authorize(&state, &headers)?;
    match state.controller.start(request.mode).await {
        Ok(status) => Ok((StatusCode::ACCEPTED, Json(status)).into_response()),
        Err(running) => Ok((StatusCode::CONFLICT, Json(running)).into_response()),
    }
}

// ============ /listings ============

async fn handle_get_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    authorize(&state, &headers)?;
    let listing = listings::get_listing(state.controller.engine().pool(), &id).await?;
    Ok(Json(listing))
}

async fn handle_patch_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<ListingUpdate>,
) -> Result<Json<Listing>, AppError> {
    authorize(&state, &headers)?;
    let listing = listings::update_listing(state.controller.engine().pool(), &id, &update).await?;
    Ok(Json(listing))
}

#[derive(Deserialize, Default)]
struct DeleteRequest {
    reason: Option<String>,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: String,
}

async fn handle_delete_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<DeleteRequest>>,
) -> Result<Json<DeleteResponse>, AppError> {
    authorize(&state, &headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let engine = state.controller.engine();
    listings::delete_listing(
        engine.pool(),
        engine.store().as_ref(),
        &id,
        request.reason.as_deref(),
        Some("api"),
    )
    .await?;
    Ok(Json(DeleteResponse { deleted: id }))
}
