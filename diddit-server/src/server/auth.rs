use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use diddit_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

impl AuthCtx {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token.trim(), state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    let cutoff = Utc::now() - Duration::days(state.config.auth.session_idle_days);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %claims.jti,
                user_id = %claims.sub,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Creates a session for the user and returns a signed token bound to it.
pub async fn issue_token(state: &AppState, user_id: &str, email: &str) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        jti: jti.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::days(state.config.auth.token_ttl_days)).timestamp(),
    };

    state
        .store
        .create_session(&jti, user_id)
        .await
        .map_err(|e| {
            error!(user_id, error=%e, "login/register: create_session failed");
            AppError::internal(e)
        })?;
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(user_id, error=%e, "login/register: jwt encode failed");
        AppError::internal(e)
    })
}

pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), AppError> {
    let at = email.find('@');
    let valid_email = matches!(at, Some(i) if i > 0 && i + 1 < email.len())
        && !email.chars().any(char::is_whitespace);
    if !valid_email {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_need_an_email_and_a_long_enough_password() {
        assert!(validate_credentials("mom@example.com", "correct horse").is_ok());
        assert!(validate_credentials("mom.example.com", "correct horse").is_err());
        assert!(validate_credentials("@example.com", "correct horse").is_err());
        assert!(validate_credentials("mom@", "correct horse").is_err());
        assert!(validate_credentials("m om@example.com", "correct horse").is_err());
        assert!(validate_credentials("mom@example.com", "short").is_err());
    }

    #[tokio::test]
    async fn password_hash_verifies_only_the_original() {
        let hash = hash_password("hunter22", 4).await.unwrap();
        assert!(verify_password("hunter22", &hash).await.unwrap());
        assert!(!verify_password("hunter23", &hash).await.unwrap());
    }
}
