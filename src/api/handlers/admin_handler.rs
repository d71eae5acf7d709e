use axum::{Json, extract::State, response::IntoResponse};

use crate::{
    api::{app_state::AppState, dto::ReloadResponse},
    error::AppError,
};

/// 重新读取配置源，校验通过后原子替换快照
pub async fn reload_config(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let config = state.config.reload()?;
    Ok(Json(ReloadResponse {
        reloaded: true,
        environment: config.environment.clone(),
    }))
}
