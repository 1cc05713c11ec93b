use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};

use crate::{
    application::dto::{
        ActivationResponse, ChurnDetectionResponse, CompleteMilestoneRequest,
        HabitLoopTriggerResponse, HealthResponse, LifecycleEvaluationResponse, NextNudgeResponse,
        NudgeRecordedResponse, PowerUserEvaluationResponse, RetentionProgressResponse,
        SessionRecordedResponse, StartActivationRequest, TriggerHabitLoopRequest,
    },
    domain::engagement::NudgeResponse,
    interface::http::{auth::AuthenticatedUser, problem::ApiResult},
    state::AppState,
};

pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn evaluate_lifecycle(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<LifecycleEvaluationResponse>> {
    let evaluated = state.engine.evaluate_lifecycle(&user.email).await?;
    Ok(Json(evaluated))
}

pub async fn detect_churn(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<ChurnDetectionResponse>> {
    let detected = state.engine.detect_churn(&user.email).await?;
    Ok(Json(detected))
}

pub async fn retention_progress(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<RetentionProgressResponse>> {
    let progress = state.engine.retention_progress(&user.email).await?;
    Ok(Json(progress))
}

pub async fn evaluate_power_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<PowerUserEvaluationResponse>> {
    let evaluated = state.engine.evaluate_power_user(&user.email).await?;
    Ok(Json(evaluated))
}

pub async fn trigger_habit_loop(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<TriggerHabitLoopRequest>, JsonRejection>,
) -> ApiResult<Json<HabitLoopTriggerResponse>> {
    let Json(request) = payload?;
    let outcome = state.engine.trigger_habit_loop(&user.email, request).await?;
    Ok(Json(outcome))
}

pub async fn record_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<SessionRecordedResponse>> {
    let recorded = state.engine.record_session(&user.email).await?;
    Ok(Json(recorded))
}

pub async fn next_nudge(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<NextNudgeResponse>> {
    let nudge = state.engine.next_nudge(&user.email).await?;
    Ok(Json(nudge))
}

pub async fn nudge_shown(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(nudge_id): Path<String>,
) -> ApiResult<Json<NudgeRecordedResponse>> {
    let recorded = state
        .engine
        .record_nudge(&user.email, &nudge_id, NudgeResponse::Shown)
        .await?;
    Ok(Json(recorded))
}

pub async fn nudge_dismissed(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(nudge_id): Path<String>,
) -> ApiResult<Json<NudgeRecordedResponse>> {
    let recorded = state
        .engine
        .record_nudge(&user.email, &nudge_id, NudgeResponse::Dismissed)
        .await?;
    Ok(Json(recorded))
}

pub async fn start_activation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<StartActivationRequest>, JsonRejection>,
) -> ApiResult<Json<ActivationResponse>> {
    let Json(request) = payload?;
    let started = state.engine.start_activation(&user.email, request).await?;
    Ok(Json(started))
}

pub async fn complete_milestone(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<CompleteMilestoneRequest>, JsonRejection>,
) -> ApiResult<Json<ActivationResponse>> {
    let Json(request) = payload?;
    let updated = state.engine.complete_milestone(&user.email, request).await?;
    Ok(Json(updated))
}
