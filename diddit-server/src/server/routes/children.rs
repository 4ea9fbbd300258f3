use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use diddit_shared::api;

use super::{child_dto, optional, parse_date, redemption_dto, required};
use crate::server::{AppError, AppState, HouseholdCtx};

const DEFAULT_PAGE_SIZE: usize = 10;

/// Validated body shared by create and update.
struct ChildInput {
    name: String,
    birth_date: Option<chrono::NaiveDate>,
    avatar: Option<String>,
}

impl TryFrom<api::ChildReq> for ChildInput {
    type Error = AppError;

    fn try_from(body: api::ChildReq) -> Result<Self, Self::Error> {
        Ok(Self {
            name: required("name", &body.name)?,
            birth_date: optional(body.birth_date.as_deref())
                .map(|d| parse_date("birth_date", d))
                .transpose()?,
            avatar: optional(body.avatar.as_deref()).map(str::to_string),
        })
    }
}

pub async fn list_children(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    let rows = state.store.list_children(&ctx.household_id).await?;
    let items = rows
        .into_iter()
        .filter(|c| ctx.ensure_child_access(&c.id).is_ok())
        .map(child_dto)
        .collect();
    Ok(Json(items))
}

pub async fn create_child(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::ChildReq>,
) -> Result<(StatusCode, Json<api::ChildDto>), AppError> {
    let input = ChildInput::try_from(body)?;
    let child = state
        .store
        .create_child(
            &ctx.household_id,
            &input.name,
            input.birth_date,
            input.avatar.as_deref(),
        )
        .await?;
    tracing::info!(household_id = %ctx.household_id, child_id = %child.id, "child created");
    Ok((StatusCode::CREATED, Json(child_dto(child))))
}

pub async fn get_child(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, child_id)): Path<(String, String)>,
) -> Result<Json<api::ChildDto>, AppError> {
    ctx.ensure_child_access(&child_id)?;
    let child = state
        .store
        .get_child(&ctx.household_id, &child_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {child_id}")))?;
    Ok(Json(child_dto(child)))
}

pub async fn update_child(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, child_id)): Path<(String, String)>,
    Json(body): Json<api::ChildReq>,
) -> Result<Json<api::ChildDto>, AppError> {
    let input = ChildInput::try_from(body)?;
    let child = state
        .store
        .update_child(
            &ctx.household_id,
            &child_id,
            &input.name,
            input.birth_date,
            input.avatar.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {child_id}")))?;
    Ok(Json(child_dto(child)))
}

pub async fn delete_child(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, child_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state
        .store
        .delete_child(&ctx.household_id, &child_id)
        .await?
    {
        return Err(AppError::not_found(format!("child not found: {child_id}")));
    }
    state.forget_points(&child_id).await;
    tracing::info!(household_id = %ctx.household_id, %child_id, "child deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn child_points(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, child_id)): Path<(String, String)>,
) -> Result<Json<api::PointsDto>, AppError> {
    ctx.ensure_child_access(&child_id)?;
    ensure_child_exists(&state, &ctx, &child_id).await?;

    let child_mutex = state.child_mutex(&child_id).await;
    let mut child_guard = child_mutex.lock().await;
    let totals = state.points(&child_id, &mut child_guard).await?;
    Ok(Json(api::PointsDto {
        child_id,
        earned: totals.earned,
        spent: totals.spent,
        balance: totals.balance(),
    }))
}

pub async fn child_redemptions(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, child_id)): Path<(String, String)>,
    Query(opts): Query<api::PageOpts>,
) -> Result<Json<Vec<api::RedemptionDto>>, AppError> {
    ctx.ensure_child_access(&child_id)?;
    ensure_child_exists(&state, &ctx, &child_id).await?;
    let page = opts.page.unwrap_or(1);
    let per_page = opts.per_page.unwrap_or(DEFAULT_PAGE_SIZE);
    let rows = state
        .store
        .list_redemptions_for_child(&child_id, page, per_page)
        .await?;
    Ok(Json(
        rows.into_iter().map(|r| redemption_dto(r, None)).collect(),
    ))
}

async fn ensure_child_exists(
    state: &AppState,
    ctx: &HouseholdCtx,
    child_id: &str,
) -> Result<(), AppError> {
    state
        .store
        .get_child(&ctx.household_id, child_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("child not found: {child_id}")))
}
