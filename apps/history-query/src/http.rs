use crate::error::HistoryError;
use crate::request::HistoryRequest;
use crate::service::HistoryQueryService;
use crate::types::ResultSet;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct HttpState {
    pub service: HistoryQueryService,
}

fn map_history_error(err: HistoryError) -> (StatusCode, String) {
    let status = match &err {
        HistoryError::Configuration(_) => StatusCode::BAD_REQUEST,
        HistoryError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
        HistoryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        HistoryError::Query { .. } | HistoryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, status = %status, "history query failed");
    } else {
        tracing::warn!(error = %err, "history request rejected");
    }
    (status, err.to_string())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn post_query(
    State(state): State<HttpState>,
    Json(payload): Json<HistoryRequest>,
) -> Result<Json<ResultSet>, (StatusCode, String)> {
    let result = state.service.run(payload).await.map_err(map_history_error)?;
    Ok(Json(result))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/history/query", post(post_query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
