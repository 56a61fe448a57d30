use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::{debug, error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::{FilterError, StoreError};
use crate::types::{
    AppState, ErrorResponse, QueryResponse, SetResponse, SnapshotResponse,
    TermQuery, TermsResponse,
};
use crate::windowed_filter::{TermStats, WindowStats};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        check_key,
        set_key,
        get_terms,
        get_stats,
        take_snapshot,
    ),
    components(
        schemas(
            QueryResponse,
            SetResponse,
            TermsResponse,
            SnapshotResponse,
            ErrorResponse,
            WindowStats,
            TermStats
        )
    ),
    tags(
        (name = "term-bloom", description = "Replicated term-windowed Bloom filter API")
    )
)]
struct ApiDoc;

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotLeader => StatusCode::MISDIRECTED_REQUEST,
        StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        StoreError::Filter(FilterError::ExpiredTerm { .. }) => {
            StatusCode::CONFLICT
        }
        StoreError::Filter(FilterError::TermOutOfRange { .. }) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: StoreError) -> Response {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            message: err.to_string(),
        }),
    )
        .into_response()
}

/// Check API health
#[utoipa::path(
    get,
    path = "/health",
    tag = "term-bloom",
    responses(
        (status = 200, description = "API is healthy")
    )
)]
async fn health_check() -> impl IntoResponse {
    debug!("Health check");
    StatusCode::OK
}

/// Check whether a key was seen within the retained terms (local read)
#[utoipa::path(
    get,
    path = "/keys/{key}",
    tag = "term-bloom",
    params(
        ("key" = String, Path, description = "Key to check")
    ),
    responses(
        (status = 200, description = "Check successful", body = QueryResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
async fn check_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    match state.store.check(&key) {
        Ok(exists) => {
            (StatusCode::OK, Json(QueryResponse { exists })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Record a key, optionally advancing the term first
#[utoipa::path(
    post,
    path = "/keys/{key}",
    tag = "term-bloom",
    params(
        ("key" = String, Path, description = "Key to record"),
        TermQuery
    ),
    responses(
        (status = 200, description = "Key recorded", body = SetResponse),
        (status = 400, description = "Term is out of range", body = ErrorResponse),
        (status = 409, description = "Term is behind the current term", body = ErrorResponse),
        (status = 421, description = "This node is not the leader", body = ErrorResponse),
        (status = 504, description = "Command was not applied in time", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
async fn set_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<TermQuery>,
) -> Response {
    debug!(key = %key, term = ?query.term, "Recording key");
    let result = match query.term {
        Some(term) => state.store.set_with_term(term, &key).await,
        None => state.store.set(&key).await,
    };
    match result {
        Ok(existed) => {
            (StatusCode::OK, Json(SetResponse { existed })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Current term window
#[utoipa::path(
    get,
    path = "/terms",
    tag = "term-bloom",
    responses(
        (status = 200, description = "Term window", body = TermsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
async fn get_terms(State(state): State<Arc<AppState>>) -> Response {
    match state.store.terms() {
        Ok((earliest, latest)) => (
            StatusCode::OK,
            Json(TermsResponse { earliest, latest }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Filter geometry and per-term fill
#[utoipa::path(
    get,
    path = "/stats",
    tag = "term-bloom",
    responses(
        (status = 200, description = "Filter statistics", body = WindowStats),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
async fn get_stats(State(state): State<Arc<AppState>>) -> Response {
    match state.store.stats() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Compact the replicated log into a snapshot, writing it to
/// `BLOOM_SNAPSHOT_PATH` when configured
#[utoipa::path(
    post,
    path = "/snapshot",
    tag = "term-bloom",
    responses(
        (status = 200, description = "Snapshot taken", body = SnapshotResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
async fn take_snapshot(State(state): State<Arc<AppState>>) -> Response {
    let bytes = match state.store.snapshot().await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };
    if let Some(path) = &state.snapshot_path {
        if let Err(e) = tokio::fs::write(path, &bytes).await {
            error!(
                path = %path.display(),
                error = %e,
                "Failed to write snapshot"
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    message: format!("Failed to write snapshot: {e}"),
                }),
            )
                .into_response();
        }
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            "Wrote snapshot"
        );
    }
    (
        StatusCode::OK,
        Json(SnapshotResponse { bytes: bytes.len() }),
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let openapi = ApiDoc::openapi();

    Router::new()
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi),
        )
        .route("/health", get(health_check))
        .route("/keys/{key}", get(check_key).post(set_key))
        .route("/terms", get(get_terms))
        .route("/stats", get(get_stats))
        .route("/snapshot", post(take_snapshot))
        .with_state(state)
}
