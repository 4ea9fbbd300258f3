use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::CompletionStatus;

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_PREFIX: &str = "/api";

/// Path prefix of everything owned by one household.
pub fn household_scope(household_id: &str) -> String {
    format!(
        "{}/households/{}",
        API_PREFIX,
        percent_encoding::utf8_percent_encode(household_id, percent_encoding::NON_ALPHANUMERIC)
    )
}

// Auth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReq {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfoDto {
    pub version: String,
}

// Households
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdReq {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdDto {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: String,
    /// Role of the calling user in this household.
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDto {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub child_id: Option<String>,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberReq {
    pub email: String,
    pub role: Role,
    /// Required when `role` is `child`.
    pub child_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMemberReq {
    pub role: Role,
    pub child_id: Option<String>,
}

// Children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildReq {
    pub name: String,
    pub birth_date: Option<String>, // YYYY-MM-DD
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub birth_date: Option<String>,
    pub avatar: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsDto {
    pub child_id: String,
    pub earned: i64,
    pub spent: i64,
    pub balance: i64,
}

// Tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReq {
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: String,
    pub household_id: String,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub requires_approval: bool,
    pub created_at: String,
}

// Assignments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReq {
    pub task_id: String,
    pub child_id: String,
    pub due_date: String, // YYYY-MM-DD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDto {
    pub id: String,
    pub household_id: String,
    pub task_id: String,
    pub task_title: String,
    pub child_id: String,
    pub due_date: String,
    /// Status of the most recent completion, if any.
    pub status: Option<CompletionStatus>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentQuery {
    pub child_id: Option<String>,
    pub date: Option<String>,
}

// Completions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteReq {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionDto {
    pub id: String,
    pub assignment_id: String,
    pub task_id: String,
    pub task_title: String,
    pub child_id: String,
    pub completed_by: String,
    pub status: CompletionStatus,
    pub points_awarded: i32,
    pub note: Option<String>,
    pub completed_at: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionQuery {
    pub status: Option<CompletionStatus>,
    pub child_id: Option<String>,
}

// Rewards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardReq {
    pub title: String,
    pub description: Option<String>,
    pub cost: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardDto {
    pub id: String,
    pub household_id: String,
    pub title: String,
    pub description: Option<String>,
    pub cost: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReq {
    pub child_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionDto {
    pub id: String,
    /// `None` once the reward has been deleted.
    pub reward_id: Option<String>,
    pub reward_title: String,
    pub child_id: String,
    pub cost: i32,
    pub redeemed_by: String,
    pub redeemed_at: String,
    /// Balance left after this redemption; only set in the redeem response.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub balance_after: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageOpts {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDto {
    pub error: String,
}
