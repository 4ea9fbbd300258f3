use crate::storage::schema::{
    children, household_members, households, reward_redemptions, rewards, sessions,
    task_assignments, task_completions, tasks, users,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub display_name: &'a str,
    pub password_hash: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub user_id: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub user_id: &'a str,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = households)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = households)]
pub struct NewHousehold<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub created_by: &'a str,
    pub created_at: NaiveDateTime,
}

/// `role` is stored as text; parse it with `Role::from_str`.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = household_members)]
pub struct Membership {
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub child_id: Option<String>,
    pub joined_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = household_members)]
pub struct NewMembership<'a> {
    pub household_id: &'a str,
    pub user_id: &'a str,
    pub role: &'a str,
    pub child_id: Option<&'a str>,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = children)]
pub struct Child {
    pub id: String,
    pub household_id: String,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub avatar: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub name: &'a str,
    pub birth_date: Option<NaiveDate>,
    pub avatar: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: String,
    pub household_id: String,
    pub title: String,
    pub description: Option<String>,
    pub points: i32,
    pub requires_approval: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub points: i32,
    pub requires_approval: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = task_assignments)]
#[diesel(belongs_to(Task, foreign_key = task_id))]
#[diesel(belongs_to(Child, foreign_key = child_id))]
pub struct Assignment {
    pub id: String,
    pub household_id: String,
    pub task_id: String,
    pub child_id: String,
    pub due_date: NaiveDate,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = task_assignments)]
pub struct NewAssignment<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub task_id: &'a str,
    pub child_id: &'a str,
    pub due_date: NaiveDate,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = task_completions)]
#[diesel(belongs_to(Assignment, foreign_key = assignment_id))]
pub struct Completion {
    pub id: String,
    pub assignment_id: String,
    pub child_id: String,
    pub completed_by: String,
    pub status: String,
    pub points_awarded: i32,
    pub note: Option<String>,
    pub completed_at: NaiveDateTime,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = task_completions)]
pub struct NewCompletion<'a> {
    pub id: &'a str,
    pub assignment_id: &'a str,
    pub child_id: &'a str,
    pub completed_by: &'a str,
    pub status: &'a str,
    pub points_awarded: i32,
    pub note: Option<&'a str>,
    pub completed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
pub struct Reward {
    pub id: String,
    pub household_id: String,
    pub title: String,
    pub description: Option<String>,
    pub cost: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub id: &'a str,
    pub household_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub cost: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = reward_redemptions)]
pub struct Redemption {
    pub id: String,
    pub reward_id: Option<String>,
    pub reward_title: String,
    pub child_id: String,
    pub cost: i32,
    pub redeemed_by: String,
    pub redeemed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = reward_redemptions)]
pub struct NewRedemption<'a> {
    pub id: &'a str,
    pub reward_id: Option<&'a str>,
    pub reward_title: &'a str,
    pub child_id: &'a str,
    pub cost: i32,
    pub redeemed_by: &'a str,
    pub redeemed_at: NaiveDateTime,
}

/// A membership joined with the member's user row.
#[derive(Debug, Clone)]
pub struct Member {
    pub membership: Membership,
    pub user: User,
}

/// An assignment joined with its task and the status of its latest completion.
#[derive(Debug, Clone)]
pub struct AssignmentView {
    pub assignment: Assignment,
    pub task: Task,
    pub status: Option<String>,
}

/// A completion joined with the assignment's task.
#[derive(Debug, Clone)]
pub struct CompletionView {
    pub completion: Completion,
    pub task: Task,
}

/// Earned/spent totals for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointsTotals {
    pub earned: i64,
    pub spent: i64,
}

impl PointsTotals {
    pub fn balance(&self) -> i64 {
        self.earned - self.spent
    }
}
