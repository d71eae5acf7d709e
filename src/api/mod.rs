//! API 模块
//!
//! 提供 REST API 支持。

pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::app_state::AppState;
use crate::error::AppError;
use crate::observability::{ObservabilityState, create_observability_router, metrics_middleware};

/// `/api/v1` 下的业务路由
pub fn create_router(app_state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::session_routes::create_session_router())
        .merge(routes::event_routes::create_event_router())
        .merge(routes::assessment_routes::create_assessment_router())
        .merge(routes::admin_routes::create_admin_router());

    Router::new().nest("/api/v1", api).with_state(app_state)
}

/// 完整的应用路由：业务路由 + 可观测性端点 + 公共中间件
pub fn create_app(app_state: AppState) -> Router {
    let config = app_state.config.snapshot();
    let observability = Arc::new(ObservabilityState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        app_state.metrics.clone(),
        app_state.storage.clone(),
    ));
    let metrics = app_state.metrics.clone();

    create_observability_router(observability)
        .merge(create_router(app_state))
        .layer(DefaultBodyLimit::max(config.server.max_request_size))
        .layer(axum::middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout)))
        .layer(TraceLayer::new_for_http())
}

pub async fn initialize_api(app_state: AppState) -> Result<Router, AppError> {
    tracing::info!("Initializing API router...");
    Ok(create_app(app_state))
}
