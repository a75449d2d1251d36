//! HTTP API for the Vigil daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Status (supervised positions, microservice health, order queue)
//! - Position lookup and admission
//! - Manual close signals
//! - Prometheus metrics

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use vigil_domain::{CloseSignal, MicroserviceHealth, Position, Price, Side, Symbol};
use vigil_store::StoreError;

use crate::admission::{admit, AdmissionRequest};
use crate::context::SupervisorContext;
use crate::error::DaemonError;
use crate::signals::apply_close_signal;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub supervised_positions: usize,
    pub positions: Vec<PositionSummary>,
    pub microservices: Vec<MicroserviceHealth>,
    pub pending_orders: usize,
}

/// Summary of a position.
#[derive(Debug, Serialize, Deserialize)]
pub struct PositionSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: String,
    pub status: String,
    pub entry_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    pub pnl_usd: Decimal,
    pub pnl_percent: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Decimal>,
}

/// Close signal body: structured, or the textual command form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CloseSignalRequest {
    Structured {
        direction: Side,
        price: Decimal,
        #[serde(default)]
        symbol: Option<String>,
    },
    Command {
        command: String,
        price: Decimal,
        #[serde(default)]
        symbol: Option<String>,
    },
}

/// Close signal response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CloseSignalResponse {
    pub matched: usize,
    pub closed_positions: Vec<Uuid>,
    pub failed: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(ctx: SupervisorContext) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/positions", post(admit_handler))
        .route("/positions/:id", get(get_position_handler))
        .route("/signals/close", post(close_signal_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Supervised positions and downstream state.
async fn status_handler(State(ctx): State<SupervisorContext>) -> Result<Json<StatusResponse>, ApiError> {
    let positions = ctx.positions.snapshot().await;
    let pending_orders = ctx
        .store
        .pending_orders()
        .count_pending()
        .await
        .map_err(|e| to_error_response(e.into()))?;

    Ok(Json(StatusResponse {
        supervised_positions: positions.len(),
        positions: positions.iter().map(position_to_summary).collect(),
        microservices: ctx.dispatcher.registry().snapshot().await,
        pending_orders,
    }))
}

/// Get a single position from storage (closed ones included).
async fn get_position_handler(
    State(ctx): State<SupervisorContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PositionSummary>, ApiError> {
    let position = ctx
        .store
        .positions()
        .find_by_id(id)
        .await
        .map_err(|e| to_error_response(e.into()))?
        .ok_or_else(|| to_error_response(DaemonError::PositionNotFound(id)))?;

    Ok(Json(position_to_summary(&position)))
}

/// Admit a new position.
async fn admit_handler(
    State(ctx): State<SupervisorContext>,
    Json(req): Json<AdmissionRequest>,
) -> Result<(StatusCode, Json<PositionSummary>), ApiError> {
    let position = admit(&ctx, req).await.map_err(to_error_response)?;
    Ok((StatusCode::CREATED, Json(position_to_summary(&position))))
}

/// Apply a manual close signal.
async fn close_signal_handler(
    State(ctx): State<SupervisorContext>,
    Json(req): Json<CloseSignalRequest>,
) -> Result<Json<CloseSignalResponse>, ApiError> {
    let signal = parse_signal(req).map_err(to_error_response)?;
    let report = apply_close_signal(&ctx, signal).await.map_err(to_error_response)?;

    Ok(Json(CloseSignalResponse {
        matched: report.matched,
        closed_positions: report.closed,
        failed: report.failed,
    }))
}

/// Prometheus text exposition.
async fn metrics_handler(State(ctx): State<SupervisorContext>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        ctx.metrics.render(),
    )
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_signal(req: CloseSignalRequest) -> Result<CloseSignal, DaemonError> {
    let (signal, symbol) = match req {
        CloseSignalRequest::Structured {
            direction,
            price,
            symbol,
        } => (CloseSignal::new(direction, Price::new(price)?), symbol),
        CloseSignalRequest::Command { command, price, symbol } => (CloseSignal::parse(&command, price)?, symbol),
    };

    Ok(match symbol {
        Some(symbol) => signal.with_symbol(Symbol::from_pair(&symbol)?),
        None => signal,
    })
}

fn to_error_response(error: DaemonError) -> ApiError {
    let status = match &error {
        DaemonError::PositionNotFound(_) | DaemonError::Store(StoreError::NotFound { .. }) => {
            StatusCode::NOT_FOUND
        },
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn position_to_summary(position: &Position) -> PositionSummary {
    PositionSummary {
        id: position.id,
        user_id: position.user_id,
        symbol: position.symbol.as_pair(),
        side: position.side.to_string(),
        status: position.status.to_string(),
        entry_price: position.entry_price.as_decimal(),
        current_price: position.current_price.map(|p| p.as_decimal()),
        pnl_usd: position.pnl_usd,
        pnl_percent: position.pnl_percent,
        close_reason: position.close_reason.map(|r| r.to_string()),
        exit_price: position.exit_price.map(|p| p.as_decimal()),
    }
}

// =============================================================================
// Tests
// =============================================================================
