use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use diddit_shared::api;

use super::{optional, required, task_dto};
use crate::server::{AppError, AppState, HouseholdCtx};

fn validate(body: &api::TaskReq) -> Result<String, AppError> {
    if body.points < 0 {
        return Err(AppError::bad_request("points must not be negative"));
    }
    required("title", &body.title)
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<Json<Vec<api::TaskDto>>, AppError> {
    let rows = state.store.list_tasks(&ctx.household_id).await?;
    Ok(Json(rows.into_iter().map(task_dto).collect()))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::TaskReq>,
) -> Result<(StatusCode, Json<api::TaskDto>), AppError> {
    let title = validate(&body)?;
    let task = state
        .store
        .create_task(
            &ctx.household_id,
            &title,
            optional(body.description.as_deref()),
            body.points,
            body.requires_approval,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task_dto(task))))
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, task_id)): Path<(String, String)>,
) -> Result<Json<api::TaskDto>, AppError> {
    let task = state
        .store
        .get_task(&ctx.household_id, &task_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("task not found: {task_id}")))?;
    Ok(Json(task_dto(task)))
}

/// Edits apply to future completions; points already awarded stay as they were.
pub async fn update_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, task_id)): Path<(String, String)>,
    Json(body): Json<api::TaskReq>,
) -> Result<Json<api::TaskDto>, AppError> {
    let title = validate(&body)?;
    let task = state
        .store
        .update_task(
            &ctx.household_id,
            &task_id,
            &title,
            optional(body.description.as_deref()),
            body.points,
            body.requires_approval,
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("task not found: {task_id}")))?;
    Ok(Json(task_dto(task)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, task_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state.store.delete_task(&ctx.household_id, &task_id).await? {
        return Err(AppError::not_found(format!("task not found: {task_id}")));
    }
    // Assignments and their completions go with the task, for any child.
    state.invalidate_all_points().await;
    Ok(StatusCode::NO_CONTENT)
}
