use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{check_range, parse_date, Lookup};
use crate::index::IndexCalculator;
use crate::types::{BuildResult, CompositionChanges, CompositionSnapshotRow, PerformanceReport};

#[derive(Clone)]
struct ApiState {
    calculator: Arc<IndexCalculator>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Logged in full; the caller only sees a generic message.
    fn internal(error: anyhow::Error) -> Self {
        error!("request failed: {error:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "operation failed".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cache_backend: String,
    cache_connected: bool,
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let calculator = config.open_calculator()?;
    let app = router(Arc::new(calculator));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(calculator: Arc<IndexCalculator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/build-index", post(build_index))
        .route("/index-performance", get(index_performance))
        .route("/index-composition", get(index_composition))
        .route("/composition-changes", get(composition_changes))
        .layer(cors)
        .with_state(ApiState { calculator })
}

async fn health(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    let cache = state.calculator.cache();
    let cache_connected = cache.ensure_connected().await;
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache_backend: cache.backend_name().to_string(),
        cache_connected,
    })
}

async fn build_index(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<BuildResult> {
    let (start, end) = parse_range(&query)?;
    let result = state
        .calculator
        .build_index(start, end)
        .await
        .map_err(ApiError::internal)?;
    Ok(ok(result))
}

async fn index_performance(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<PerformanceReport> {
    let (start, end) = parse_range(&query)?;
    match state
        .calculator
        .get_performance(start, end)
        .await
        .map_err(ApiError::internal)?
    {
        Lookup::Found(report) => Ok(ok(report)),
        Lookup::NotFound => Err(ApiError::not_found(
            "no performance data available for the specified date range",
        )),
    }
}

async fn index_composition(
    State(state): State<ApiState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<CompositionSnapshotRow>> {
    let date = required_date("date", query.date.as_deref())?;
    match state
        .calculator
        .get_composition_for_date(date)
        .await
        .map_err(ApiError::internal)?
    {
        Lookup::Found(rows) => Ok(ok(rows)),
        Lookup::NotFound => Err(ApiError::not_found(format!(
            "no composition data available for date {date}"
        ))),
    }
}

async fn composition_changes(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<CompositionChanges> {
    let (start, end) = parse_range(&query)?;
    let changes = state
        .calculator
        .get_composition_changes(start, end)
        .await
        .map_err(ApiError::internal)?;
    if changes.is_empty() {
        return Err(ApiError::not_found(format!(
            "no composition changes between {start} and {end}"
        )));
    }
    Ok(ok(changes))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

fn required_date(name: &str, raw: Option<&str>) -> std::result::Result<NaiveDate, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::bad_request(format!("missing query parameter {name}")))?;
    parse_date(raw).map_err(|e| ApiError::bad_request(format!("{name}: {e}")))
}

fn parse_range(query: &RangeQuery) -> std::result::Result<(NaiveDate, NaiveDate), ApiError> {
    let start = required_date("start_date", query.start_date.as_deref())?;
    let end = required_date("end_date", query.end_date.as_deref())?;
    check_range(start, end).map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok((start, end))
}
