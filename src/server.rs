//! HTTP read API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/revisions/epochs` | The epoch catalog |
//! | `GET`  | `/api/revisions/latest` | Newest revision for every epoch |
//! | `GET`  | `/api/revisions/list` | Revisions for selected epochs and window |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown epoch: fortnightly" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unavailable` (503, repository still
//! cloning), `missing_revision` (500, `/latest` only), `internal` (500).
//!
//! A short selection on `/list` is not an error response: the partial
//! revisions come back with status 200 and an `error` field.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use announcer_core::epoch::Basis;
use announcer_core::error::SelectError;
use announcer_core::select::SelectRequest;

use crate::announcer::Announcer;
use crate::api::{self, ApiEpoch, LatestResponse, QueryError, RevisionsQuery, RevisionsResponse};
use crate::config::Config;

#[derive(Clone)]
struct AppState {
    announcer: Announcer,
}

/// Builds the router. Exposed for embedding and tests.
pub fn router(announcer: Announcer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/revisions/epochs", get(handle_epochs))
        .route("/api/revisions/latest", get(handle_latest))
        .route("/api/revisions/list", get(handle_list))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { announcer })
}

/// Serves the API on `[server].bind` until the process exits.
pub async fn run_server(config: &Config, announcer: Announcer) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(announcer);

    println!("Announcer listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

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

#[derive(Debug)]
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unavailable() -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: "repository is still being cloned".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        bad_request(err.to_string())
    }
}

/// Maps a selection failure that carries no usable result.
fn classify_select_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<SelectError>() {
        Some(SelectError::NilRepository) => unavailable(),
        Some(e) if e.is_validation() => bad_request(e.to_string()),
        Some(e @ SelectError::NotAllEpochsConsumed(_)) => AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "missing_revision",
            message: e.to_string(),
        },
        _ => {
            tracing::error!(error = %format!("{:#}", err), "selection failed");
            internal(format!("{:#}", err))
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

// ============ GET /api/revisions/epochs ============

async fn handle_epochs(State(state): State<AppState>) -> Json<Vec<ApiEpoch>> {
    Json(api::epochs(state.announcer.catalog()))
}

// ============ GET /api/revisions/latest ============

/// One revision per catalog epoch, as of now.
async fn handle_latest(State(state): State<AppState>) -> Result<Json<LatestResponse>, AppError> {
    if !state.announcer.is_ready() {
        return Err(unavailable());
    }
    let catalog = state.announcer.catalog();
    let request = SelectRequest::all(catalog, 1);
    let basis = Basis::ending_at(Utc::now(), catalog);

    let selection = state
        .announcer
        .select(request, basis)
        .await
        .map_err(classify_select_error)?;
    Ok(Json(LatestResponse::new(&selection, state.announcer.catalog())))
}

// ============ GET /api/revisions/list ============

async fn handle_list(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<RevisionsResponse>, AppError> {
    let catalog = state.announcer.catalog();
    let query = RevisionsQuery::from_pairs(&pairs)?;
    let request = query.request(catalog)?;
    let basis = query.basis(catalog, Utc::now())?;

    if !state.announcer.is_ready() {
        return Err(unavailable());
    }

    match state.announcer.select(request, basis).await {
        Ok(selection) => Ok(Json(RevisionsResponse::new(&selection, state.announcer.catalog()))),
        Err(err) => match err.downcast_ref::<SelectError>().and_then(SelectError::partial) {
            Some(partial) => {
                tracing::warn!(error = %err, "returning partial revisions");
                let response = RevisionsResponse::new(partial, state.announcer.catalog())
                    .with_error(&err);
                Ok(Json(response))
            }
            None => Err(classify_select_error(err)),
        },
    }
}
