//! HTTP endpoints: read-only GETs over the report service

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use engine::{FactorsReport, Period, ReportService, ReportSummary, ServiceError};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReportService>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Period(_) => ApiError::BadRequest(e.to_string()),
            ServiceError::UnknownRestaurant(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

/// `period` and `restaurant_id` query parameters
fn report_params(params: &HashMap<String, String>) -> Result<(i64, Period), ApiError> {
    let period = params
        .get("period")
        .ok_or_else(|| ApiError::BadRequest("missing query parameter 'period'".into()))?
        .parse::<Period>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let raw_id = params
        .get("restaurant_id")
        .ok_or_else(|| ApiError::BadRequest("missing query parameter 'restaurant_id'".into()))?;
    let restaurant_id = raw_id
        .trim()
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("restaurant_id must be an integer, got '{raw_id}'")))?;
    Ok((restaurant_id, period))
}

/// Attribution is CPU-bound; keep it off the async workers
async fn run_blocking<T, F>(state: AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ReportService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| {
            error!(error = %e, "Report task failed");
            ApiError::Internal("report generation failed".into())
        })?
        .map_err(ApiError::from)
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api_health))
        .route("/report", get(api_report))
        .route("/factors", get(api_factors))
        .route("/report-text", get(api_report_text))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// GET /health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /report: period summary with forecast and top factors
async fn api_report(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ReportSummary>, ApiError> {
    let (restaurant_id, period) = report_params(&params)?;
    debug!(restaurant_id, %period, "Summary requested");
    let summary = run_blocking(state, move |s| s.summary(restaurant_id, &period)).await?;
    Ok(Json(summary))
}

/// GET /factors: critical days with ranked factors
async fn api_factors(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<FactorsReport>, ApiError> {
    let (restaurant_id, period) = report_params(&params)?;
    let factors = run_blocking(state, move |s| s.factors(restaurant_id, &period)).await?;
    Ok(Json(factors))
}

/// GET /report-text: full Russian report
async fn api_report_text(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    let (restaurant_id, period) = report_params(&params)?;
    run_blocking(state, move |s| s.report_text(restaurant_id, &period)).await
}
