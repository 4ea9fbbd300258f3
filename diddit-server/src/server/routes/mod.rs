pub mod account;
pub mod assignments;
pub mod children;
pub mod households;
pub mod rewards;
pub mod tasks;

use chrono::{NaiveDate, NaiveDateTime};
use diddit_shared::api;
use diddit_shared::domain::CompletionStatus;

use super::AppError;
use crate::storage::models::{
    AssignmentView, Child, CompletionView, Member, Redemption, Reward, Task, User,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn rfc3339(dt: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::bad_request(format!("{field} must be a YYYY-MM-DD date")))
}

/// Trims `value` and rejects it when nothing is left.
pub(crate) fn required(field: &str, value: &str) -> Result<String, AppError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

/// Blank optional strings are stored as absent.
pub(crate) fn optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn status(raw: &str) -> Result<CompletionStatus, AppError> {
    raw.parse().map_err(AppError::internal)
}

pub(crate) fn user_dto(u: User) -> api::UserDto {
    api::UserDto {
        id: u.id,
        email: u.email,
        display_name: u.display_name,
        created_at: rfc3339(u.created_at),
    }
}

pub(crate) fn member_dto(m: Member) -> Result<api::MemberDto, AppError> {
    Ok(api::MemberDto {
        user_id: m.user.id,
        email: m.user.email,
        display_name: m.user.display_name,
        role: m.membership.role.parse().map_err(AppError::internal)?,
        child_id: m.membership.child_id,
        joined_at: rfc3339(m.membership.joined_at),
    })
}

pub(crate) fn child_dto(c: Child) -> api::ChildDto {
    api::ChildDto {
        id: c.id,
        household_id: c.household_id,
        name: c.name,
        birth_date: c.birth_date.map(|d| d.format(DATE_FORMAT).to_string()),
        avatar: c.avatar,
        created_at: rfc3339(c.created_at),
    }
}

pub(crate) fn task_dto(t: Task) -> api::TaskDto {
    api::TaskDto {
        id: t.id,
        household_id: t.household_id,
        title: t.title,
        description: t.description,
        points: t.points,
        requires_approval: t.requires_approval,
        created_at: rfc3339(t.created_at),
    }
}

pub(crate) fn assignment_dto(v: AssignmentView) -> Result<api::AssignmentDto, AppError> {
    let a = v.assignment;
    Ok(api::AssignmentDto {
        id: a.id,
        household_id: a.household_id,
        task_id: a.task_id,
        task_title: v.task.title,
        child_id: a.child_id,
        due_date: a.due_date.format(DATE_FORMAT).to_string(),
        status: v.status.as_deref().map(status).transpose()?,
        created_at: rfc3339(a.created_at),
    })
}

pub(crate) fn completion_dto(v: CompletionView) -> Result<api::CompletionDto, AppError> {
    let c = v.completion;
    Ok(api::CompletionDto {
        status: status(&c.status)?,
        id: c.id,
        assignment_id: c.assignment_id,
        task_id: v.task.id,
        task_title: v.task.title,
        child_id: c.child_id,
        completed_by: c.completed_by,
        points_awarded: c.points_awarded,
        note: c.note,
        completed_at: rfc3339(c.completed_at),
        reviewed_by: c.reviewed_by,
        reviewed_at: c.reviewed_at.map(rfc3339),
    })
}

pub(crate) fn reward_dto(r: Reward) -> api::RewardDto {
    api::RewardDto {
        id: r.id,
        household_id: r.household_id,
        title: r.title,
        description: r.description,
        cost: r.cost,
        created_at: rfc3339(r.created_at),
    }
}

pub(crate) fn redemption_dto(r: Redemption, balance_after: Option<i64>) -> api::RedemptionDto {
    api::RedemptionDto {
        id: r.id,
        reward_id: r.reward_id,
        reward_title: r.reward_title,
        child_id: r.child_id,
        cost: r.cost,
        redeemed_by: r.redeemed_by,
        redeemed_at: rfc3339(r.redeemed_at),
        balance_after,
    }
}
