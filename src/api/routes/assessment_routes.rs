//! Assessment Routes

use axum::{
    Router,
    routing::{get, post},
};

use crate::api::app_state::AppState;
use crate::api::handlers::assessment_handler::*;

/// 创建评估路由器
pub fn create_assessment_router() -> Router<AppState> {
    Router::new()
        .route("/assessments", post(fuse_assessment))
        .route("/students/:id/assessments", get(student_assessments))
}
