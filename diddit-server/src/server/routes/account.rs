use axum::{Extension, Json, extract::State, http::StatusCode};
use diddit_shared::api;
use diddit_shared::domain::normalize_email;

use super::{required, user_dto};
use crate::server::auth::{self, AuthCtx};
use crate::server::{AppError, AppState};

pub async fn health() -> &'static str {
    "ok"
}

pub async fn version() -> Json<api::VersionInfoDto> {
    Json(api::VersionInfoDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<api::RegisterReq>,
) -> Result<(StatusCode, Json<api::AuthResp>), AppError> {
    let email = normalize_email(&body.email);
    auth::validate_credentials(&email, &body.password)?;
    let display_name = required("display_name", &body.display_name)?;

    if state.store.get_user_by_email(&email).await?.is_some() {
        tracing::warn!(%email, "register: email already registered");
        return Err(AppError::conflict("email already registered"));
    }
    let hash = auth::hash_password(&body.password, state.config.bcrypt_cost).await?;
    // A concurrent registration can still win the race; the unique index turns it into 409.
    let user = state
        .store
        .create_user(&email, &display_name, &hash)
        .await?;
    tracing::info!(user_id = %user.id, "register: user created");

    let token = auth::issue_token(&state, &user.id, &user.email).await?;
    Ok((
        StatusCode::CREATED,
        Json(api::AuthResp {
            token,
            user: user_dto(user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<api::LoginReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = normalize_email(&body.email);
    let Some(user) = state.store.get_user_by_email(&email).await? else {
        tracing::warn!(%email, "login: unknown email");
        return Err(AppError::unauthorized());
    };
    if !auth::verify_password(&body.password, &user.password_hash).await? {
        tracing::warn!(user_id = %user.id, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_token(&state, &user.id, &user.email).await?;
    Ok(Json(api::AuthResp {
        token,
        user: user_dto(user),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::UserDto>, AppError> {
    let user = state
        .store
        .get_user(auth.user_id())
        .await?
        // Sessions cascade with the user, so this only happens mid-deletion.
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(user_dto(user)))
}

pub async fn renew(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .store
        .get_user(auth.user_id())
        .await?
        .ok_or_else(AppError::unauthorized)?;
    let token = auth::issue_token(&state, &user.id, &user.email).await?;
    state.store.delete_session(&auth.claims.jti).await?;
    Ok(Json(api::AuthResp {
        token,
        user: user_dto(user),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<StatusCode, AppError> {
    state.store.delete_session(&auth.claims.jti).await?;
    tracing::info!(user_id = %auth.user_id(), "logout: session deleted");
    Ok(StatusCode::NO_CONTENT)
}
