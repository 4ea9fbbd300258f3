//! Minimal REST client helpers for consumers (mobile/web companions, scripts, tests).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    /// HTTP status of a non-success response, if that is what failed.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(60))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
    req.send().await.map_err(|e| RestError::Http(e.to_string()))
}

pub async fn register(base: &str, req: &RegisterReq) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_register(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn login(base: &str, req: &LoginReq) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_login(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn me(base: &str, bearer: &str) -> Result<UserDto, RestError> {
    let res = send(mk_client().get(ep::auth_me(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn renew_token(base: &str, bearer: &str) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_renew(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

/// Renews `bearer` when it expires within `margin`. Returns `None` while the
/// token is still fresh.
pub async fn renew_if_expiring(
    base: &str,
    bearer: &str,
    margin: Duration,
) -> Result<Option<AuthResp>, RestError> {
    let claims =
        crate::jwt::decode_unverified(bearer).map_err(|e| RestError::Serde(e.to_string()))?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
    if claims.exp.saturating_sub(now) > margin {
        return Ok(None);
    }
    renew_token(base, bearer).await.map(Some)
}

pub async fn logout(base: &str, bearer: &str) -> Result<(), RestError> {
    let res = send(mk_client().post(ep::auth_logout(base)).bearer_auth(bearer)).await?;
    handle_empty(res).await
}

pub async fn server_version(base: &str) -> Result<VersionInfoDto, RestError> {
    let res = send(mk_client().get(ep::version(base))).await?;
    handle_json(res).await
}

pub async fn list_households(base: &str, bearer: &str) -> Result<Vec<HouseholdDto>, RestError> {
    let res = send(mk_client().get(ep::households(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn create_household(
    base: &str,
    bearer: &str,
    req: &HouseholdReq,
) -> Result<HouseholdDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::households(base))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_members(
    base: &str,
    household_id: &str,
    bearer: &str,
) -> Result<Vec<MemberDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::members(base, household_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn add_member(
    base: &str,
    household_id: &str,
    bearer: &str,
    req: &AddMemberReq,
) -> Result<MemberDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::members(base, household_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_children(
    base: &str,
    household_id: &str,
    bearer: &str,
) -> Result<Vec<ChildDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::children(base, household_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn create_child(
    base: &str,
    household_id: &str,
    bearer: &str,
    req: &ChildReq,
) -> Result<ChildDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::children(base, household_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn child_points(
    base: &str,
    household_id: &str,
    child_id: &str,
    bearer: &str,
) -> Result<PointsDto, RestError> {
    let res = send(
        mk_client()
            .get(ep::child_points(base, household_id, child_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_tasks(
    base: &str,
    household_id: &str,
    bearer: &str,
) -> Result<Vec<TaskDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::tasks(base, household_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn create_task(
    base: &str,
    household_id: &str,
    bearer: &str,
    req: &TaskReq,
) -> Result<TaskDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::tasks(base, household_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn create_assignment(
    base: &str,
    household_id: &str,
    bearer: &str,
    req: &AssignmentReq,
) -> Result<AssignmentDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::assignments(base, household_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_assignments(
    base: &str,
    household_id: &str,
    bearer: &str,
    query: &AssignmentQuery,
) -> Result<Vec<AssignmentDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::with_query(
                &ep::assignments(base, household_id),
                &[
                    ("child_id", query.child_id.as_deref()),
                    ("date", query.date.as_deref()),
                ],
            ))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn complete_assignment(
    base: &str,
    household_id: &str,
    assignment_id: &str,
    bearer: &str,
    req: &CompleteReq,
) -> Result<CompletionDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::assignment_complete(base, household_id, assignment_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_completions(
    base: &str,
    household_id: &str,
    bearer: &str,
    query: &CompletionQuery,
) -> Result<Vec<CompletionDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::with_query(
                &ep::completions(base, household_id),
                &[
                    ("status", query.status.map(|s| s.as_str())),
                    ("child_id", query.child_id.as_deref()),
                ],
            ))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn approve_completion(
    base: &str,
    household_id: &str,
    completion_id: &str,
    bearer: &str,
) -> Result<CompletionDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::completion_approve(base, household_id, completion_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn reject_completion(
    base: &str,
    household_id: &str,
    completion_id: &str,
    bearer: &str,
) -> Result<CompletionDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::completion_reject(base, household_id, completion_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn list_rewards(
    base: &str,
    household_id: &str,
    bearer: &str,
) -> Result<Vec<RewardDto>, RestError> {
    let res = send(
        mk_client()
            .get(ep::rewards(base, household_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn create_reward(
    base: &str,
    household_id: &str,
    bearer: &str,
    req: &RewardReq,
) -> Result<RewardDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::rewards(base, household_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn redeem_reward(
    base: &str,
    household_id: &str,
    reward_id: &str,
    bearer: &str,
    req: &RedeemReq,
) -> Result<RedemptionDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::reward_redeem(base, household_id, reward_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}
