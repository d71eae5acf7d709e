use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use validator::Validate;

use crate::{
    api::{app_state::AppState, dto::*},
    error::AppError,
    ingest::EventValidator,
    services::ingestion::EventStatus,
};

pub async fn submit_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(value) = body?;
    let event = EventValidator::decode(value)?;
    debug!("Submitting {} event to session {}", event.event_type, id);

    let ack = state.ingestion.submit_event(&id, event).await?;
    let status = match ack.status {
        EventStatus::Accepted => StatusCode::ACCEPTED,
        EventStatus::Duplicate => StatusCode::OK,
    };
    Ok((status, Json(ack)))
}

/// 批量提交
///
/// 批次在独立任务中执行，客户端断开时只取消尚未处理的事件，
/// 已经确认的事件不会回滚。
pub async fn submit_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SubmitBatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body?;
    request.validate()?;
    debug!("Submitting batch of {} events to session {}", request.events.len(), id);

    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let ingestion = state.ingestion.clone();
    let task = tokio::spawn(async move {
        ingestion.submit_batch(&id, request.events, cancel).await
    });

    let summary = task
        .await
        .map_err(|e| AppError::Internal(format!("batch task failed: {e}")))??;
    Ok(Json(summary))
}
