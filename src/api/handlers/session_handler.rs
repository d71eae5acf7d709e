use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::debug;
use validator::Validate;

use crate::{
    api::{app_state::AppState, dto::*},
    error::AppError,
    models::session::SessionStatus,
};

const DEFAULT_LIST_LIMIT: usize = 20;

fn millis_to_datetime(field: &str, value: Option<i64>) -> Result<Option<DateTime<Utc>>, AppError> {
    value
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| AppError::Validation(format!("{field} is not a valid timestamp: {ms}")))
        })
        .transpose()
}

pub async fn start_session(
    State(state): State<AppState>,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body?;
    request.validate()?;
    debug!("Starting session for student {}", request.student_id);

    let session = state
        .ingestion
        .start_session(&request.student_id, request.device_info)
        .await?;

    let response = StartSessionResponse {
        session_id: session.id,
        started_at: session.started_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let status = params
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(AppError::Validation)?;
    debug!(
        "Listing sessions: student={}, status={:?}, limit={:?}",
        params.student_id, status, params.limit
    );

    let sessions = state
        .ingestion
        .list_sessions(
            &params.student_id,
            status,
            params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.ingestion.get_session(&id).await?;
    Ok(Json(session))
}

pub async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CompleteSessionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body.unwrap_or_default();
    debug!("Completing session {}", id);

    let session = state
        .ingestion
        .complete_session(&id, request.ended_at, request.missions_completed)
        .await?;
    Ok(Json(session))
}

pub async fn get_features(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let features = state.ingestion.get_features(&id).await?;
    Ok(Json(features))
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EventRangeParams>,
) -> Result<impl IntoResponse, AppError> {
    let from = millis_to_datetime("from", params.from)?;
    let to = millis_to_datetime("to", params.to)?;

    let events = state.ingestion.get_events(&id, from, to).await?;
    Ok(Json(EventListResponse {
        session_id: id,
        count: events.len(),
        events,
    }))
}
