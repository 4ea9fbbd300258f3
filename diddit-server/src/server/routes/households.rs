use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use diddit_shared::api;
use diddit_shared::auth::Role;
use diddit_shared::domain::normalize_email;

use super::{member_dto, required, rfc3339};
use crate::server::auth::AuthCtx;
use crate::server::{AppError, AppState, HouseholdCtx};
use crate::storage::models::Household;

fn household_dto(h: Household, role: Role) -> api::HouseholdDto {
    api::HouseholdDto {
        id: h.id,
        name: h.name,
        created_by: h.created_by,
        created_at: rfc3339(h.created_at),
        role,
    }
}

pub async fn list_households(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::HouseholdDto>>, AppError> {
    let rows = state.store.list_households_for_user(auth.user_id()).await?;
    let items = rows
        .into_iter()
        .map(|(h, m)| {
            let role = m.role.parse().map_err(AppError::internal)?;
            Ok(household_dto(h, role))
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(Json(items))
}

pub async fn create_household(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::HouseholdReq>,
) -> Result<(StatusCode, Json<api::HouseholdDto>), AppError> {
    let name = required("name", &body.name)?;
    let household = state
        .store
        .create_household(&name, auth.user_id())
        .await?;
    tracing::info!(household_id = %household.id, user_id = %auth.user_id(), "household created");
    Ok((
        StatusCode::CREATED,
        Json(household_dto(household, Role::Admin)),
    ))
}

pub async fn get_household(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<Json<api::HouseholdDto>, AppError> {
    let household = state
        .store
        .get_household(&ctx.household_id)
        .await?
        .ok_or_else(|| AppError::not_found("household not found"))?;
    Ok(Json(household_dto(household, ctx.role)))
}

pub async fn update_household(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::HouseholdReq>,
) -> Result<Json<api::HouseholdDto>, AppError> {
    let name = required("name", &body.name)?;
    let household = state
        .store
        .rename_household(&ctx.household_id, &name)
        .await?
        .ok_or_else(|| AppError::not_found("household not found"))?;
    Ok(Json(household_dto(household, ctx.role)))
}

pub async fn delete_household(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<StatusCode, AppError> {
    if !state.store.delete_household(&ctx.household_id).await? {
        return Err(AppError::not_found("household not found"));
    }
    state.invalidate_all_points().await;
    tracing::info!(household_id = %ctx.household_id, "household deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<Json<Vec<api::MemberDto>>, AppError> {
    let rows = state.store.list_members(&ctx.household_id).await?;
    let items = rows
        .into_iter()
        .map(member_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::AddMemberReq>,
) -> Result<(StatusCode, Json<api::MemberDto>), AppError> {
    let email = normalize_email(&body.email);
    let user = state
        .store
        .get_user_by_email(&email)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no user registered with {email}")))?;
    let member = state
        .store
        .add_member(
            &ctx.household_id,
            &user.id,
            body.role,
            body.child_id.as_deref(),
        )
        .await?;
    tracing::info!(
        household_id = %ctx.household_id,
        member = %user.id,
        role = %body.role,
        "member added"
    );
    Ok((StatusCode::CREATED, Json(member_dto(member)?)))
}

pub async fn update_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, user_id)): Path<(String, String)>,
    Json(body): Json<api::UpdateMemberReq>,
) -> Result<Json<api::MemberDto>, AppError> {
    let member = state
        .store
        .update_member(
            &ctx.household_id,
            &user_id,
            body.role,
            body.child_id.as_deref(),
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("member not found: {user_id}")))?;
    Ok(Json(member_dto(member)?))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state
        .store
        .remove_member(&ctx.household_id, &user_id)
        .await?
    {
        return Err(AppError::not_found(format!("member not found: {user_id}")));
    }
    tracing::info!(household_id = %ctx.household_id, member = %user_id, "member removed");
    Ok(StatusCode::NO_CONTENT)
}
