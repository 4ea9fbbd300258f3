//! Assignments and the completions recorded against them.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use diddit_shared::api;
use diddit_shared::auth::Role;

use super::{assignment_dto, completion_dto, optional, parse_date};
use crate::server::{AppError, AppState, HouseholdCtx};

pub async fn list_assignments(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Query(q): Query<api::AssignmentQuery>,
) -> Result<Json<Vec<api::AssignmentDto>>, AppError> {
    let child = ctx.scoped_child_filter(q.child_id)?;
    let date = optional(q.date.as_deref())
        .map(|d| parse_date("date", d))
        .transpose()?;
    let rows = state
        .store
        .list_assignments(&ctx.household_id, child.as_deref(), date)
        .await?;
    let items = rows
        .into_iter()
        .map(assignment_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub async fn create_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::AssignmentReq>,
) -> Result<(StatusCode, Json<api::AssignmentDto>), AppError> {
    let due_date = parse_date("due_date", &body.due_date)?;
    let view = state
        .store
        .create_assignment(&ctx.household_id, &body.task_id, &body.child_id, due_date)
        .await?;
    tracing::debug!(assignment_id = %view.assignment.id, "assignment created");
    Ok((StatusCode::CREATED, Json(assignment_dto(view)?)))
}

pub async fn get_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, assignment_id)): Path<(String, String)>,
) -> Result<Json<api::AssignmentDto>, AppError> {
    let view = state
        .store
        .get_assignment(&ctx.household_id, &assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("assignment not found: {assignment_id}")))?;
    ctx.ensure_child_access(&view.assignment.child_id)?;
    Ok(Json(assignment_dto(view)?))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, assignment_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let view = state
        .store
        .get_assignment(&ctx.household_id, &assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("assignment not found: {assignment_id}")))?;
    let child_id = view.assignment.child_id;

    let child_mutex = state.child_mutex(&child_id).await;
    let mut child_guard = child_mutex.lock().await;
    state.reset_points(&mut child_guard);
    state
        .store
        .delete_assignment(&ctx.household_id, &assignment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, assignment_id)): Path<(String, String)>,
    body: Option<Json<api::CompleteReq>>,
) -> Result<(StatusCode, Json<api::CompletionDto>), AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let view = state
        .store
        .get_assignment(&ctx.household_id, &assignment_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("assignment not found: {assignment_id}")))?;
    let child_id = view.assignment.child_id;
    ctx.ensure_child_access(&child_id)?;

    let child_mutex = state.child_mutex(&child_id).await;
    let mut child_guard = child_mutex.lock().await;
    state.reset_points(&mut child_guard);
    let completion = state
        .store
        .complete_assignment(
            &ctx.household_id,
            &assignment_id,
            &ctx.user_id,
            ctx.role == Role::Child,
            optional(body.note.as_deref()),
        )
        .await?;
    tracing::info!(
        %assignment_id,
        completion_id = %completion.completion.id,
        status = %completion.completion.status,
        "assignment completed"
    );
    Ok((StatusCode::CREATED, Json(completion_dto(completion)?)))
}

pub async fn list_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Query(q): Query<api::CompletionQuery>,
) -> Result<Json<Vec<api::CompletionDto>>, AppError> {
    let child = ctx.scoped_child_filter(q.child_id)?;
    let rows = state
        .store
        .list_completions(&ctx.household_id, q.status, child.as_deref())
        .await?;
    let items = rows
        .into_iter()
        .map(completion_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub async fn get_completion(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, completion_id)): Path<(String, String)>,
) -> Result<Json<api::CompletionDto>, AppError> {
    let view = state
        .store
        .get_completion(&ctx.household_id, &completion_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("completion not found: {completion_id}")))?;
    ctx.ensure_child_access(&view.completion.child_id)?;
    Ok(Json(completion_dto(view)?))
}

pub async fn approve_completion(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, completion_id)): Path<(String, String)>,
) -> Result<Json<api::CompletionDto>, AppError> {
    review(&state, &ctx, &completion_id, true).await
}

pub async fn reject_completion(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, completion_id)): Path<(String, String)>,
) -> Result<Json<api::CompletionDto>, AppError> {
    review(&state, &ctx, &completion_id, false).await
}

async fn review(
    state: &AppState,
    ctx: &HouseholdCtx,
    completion_id: &str,
    approve: bool,
) -> Result<Json<api::CompletionDto>, AppError> {
    let current = state
        .store
        .get_completion(&ctx.household_id, completion_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("completion not found: {completion_id}")))?;
    let child_id = current.completion.child_id;

    let child_mutex = state.child_mutex(&child_id).await;
    let mut child_guard = child_mutex.lock().await;
    state.reset_points(&mut child_guard);
    let view = state
        .store
        .review_completion(&ctx.household_id, completion_id, &ctx.user_id, approve)
        .await?;
    tracing::info!(
        %completion_id,
        reviewer = %ctx.user_id,
        status = %view.completion.status,
        "completion reviewed"
    );
    Ok(Json(completion_dto(view)?))
}
