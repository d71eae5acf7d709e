//! Event Routes

use axum::{Router, routing::post};

use crate::api::app_state::AppState;
use crate::api::handlers::event_handler::*;
use crate::api::handlers::session_handler::get_events;

/// 创建事件路由器
pub fn create_event_router() -> Router<AppState> {
    Router::new()
        .route("/sessions/:id/events", post(submit_event).get(get_events))
        .route("/sessions/:id/events/batch", post(submit_batch))
}
