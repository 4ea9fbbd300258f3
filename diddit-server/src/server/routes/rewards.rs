use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use diddit_shared::api;

use super::{optional, redemption_dto, required, reward_dto};
use crate::server::{AppError, AppState, HouseholdCtx};

fn validate(body: &api::RewardReq) -> Result<String, AppError> {
    if body.cost <= 0 {
        return Err(AppError::bad_request("cost must be positive"));
    }
    required("title", &body.title)
}

pub async fn list_rewards(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
) -> Result<Json<Vec<api::RewardDto>>, AppError> {
    let rows = state.store.list_rewards(&ctx.household_id).await?;
    Ok(Json(rows.into_iter().map(reward_dto).collect()))
}

pub async fn create_reward(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Json(body): Json<api::RewardReq>,
) -> Result<(StatusCode, Json<api::RewardDto>), AppError> {
    let title = validate(&body)?;
    let reward = state
        .store
        .create_reward(
            &ctx.household_id,
            &title,
            optional(body.description.as_deref()),
            body.cost,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reward_dto(reward))))
}

pub async fn get_reward(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, reward_id)): Path<(String, String)>,
) -> Result<Json<api::RewardDto>, AppError> {
    let reward = state
        .store
        .get_reward(&ctx.household_id, &reward_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("reward not found: {reward_id}")))?;
    Ok(Json(reward_dto(reward)))
}

pub async fn update_reward(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, reward_id)): Path<(String, String)>,
    Json(body): Json<api::RewardReq>,
) -> Result<Json<api::RewardDto>, AppError> {
    let title = validate(&body)?;
    let reward = state
        .store
        .update_reward(
            &ctx.household_id,
            &reward_id,
            &title,
            optional(body.description.as_deref()),
            body.cost,
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("reward not found: {reward_id}")))?;
    Ok(Json(reward_dto(reward)))
}

/// Past redemptions keep the reward title; only the link is cleared.
pub async fn delete_reward(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, reward_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if !state
        .store
        .delete_reward(&ctx.household_id, &reward_id)
        .await?
    {
        return Err(AppError::not_found(format!("reward not found: {reward_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn redeem_reward(
    State(state): State<AppState>,
    Extension(ctx): Extension<HouseholdCtx>,
    Path((_, reward_id)): Path<(String, String)>,
    Json(body): Json<api::RedeemReq>,
) -> Result<(StatusCode, Json<api::RedemptionDto>), AppError> {
    // Children redeem for themselves only.
    ctx.ensure_child_access(&body.child_id)?;

    // Lock the child so the balance check and the insert see the same points.
    let child_mutex = state.child_mutex(&body.child_id).await;
    let mut child_guard = child_mutex.lock().await;
    state.reset_points(&mut child_guard);
    let (redemption, after) = state
        .store
        .redeem_reward(&ctx.household_id, &reward_id, &body.child_id, &ctx.user_id)
        .await?;
    *child_guard = Some(after);
    tracing::info!(
        child_id = %body.child_id,
        %reward_id,
        cost = redemption.cost,
        balance = after.balance(),
        "reward redeemed"
    );
    Ok((
        StatusCode::CREATED,
        Json(redemption_dto(redemption, Some(after.balance()))),
    ))
}
