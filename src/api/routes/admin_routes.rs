//! Admin Routes

use axum::{Router, routing::post};

use crate::api::app_state::AppState;
use crate::api::handlers::admin_handler::reload_config;

/// 创建管理路由器
pub fn create_admin_router() -> Router<AppState> {
    Router::new().route("/admin/config/reload", post(reload_config))
}
