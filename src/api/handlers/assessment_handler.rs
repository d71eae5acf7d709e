use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use validator::Validate;

use crate::{
    api::{app_state::AppState, dto::*},
    error::AppError,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub async fn fuse_assessment(
    State(state): State<AppState>,
    body: Result<Json<FuseAssessmentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = body?;
    request.validate()?;
    debug!(
        "Fusing {} for student {} with {} external sources",
        request.skill,
        request.student_id,
        request.sources.len()
    );

    let assessment = state.assessment.fuse_assessment(request.into()).await?;
    Ok((StatusCode::CREATED, Json(assessment)))
}

pub async fn student_assessments(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<AssessmentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let assessments = match query.skill {
        Some(skill) => {
            state
                .assessment
                .assessment_history(&student_id, skill, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
                .await?
        }
        None => state.assessment.latest_assessments(&student_id).await?,
    };
    Ok(Json(assessments))
}
