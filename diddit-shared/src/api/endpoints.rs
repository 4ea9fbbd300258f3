use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::{API_PREFIX, household_scope};

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

/// Appends the present `(key, value)` pairs as a query string.
pub fn with_query(url: &str, params: &[(&str, Option<&str>)]) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter_map(|(k, v)| v.map(|v| format!("{}={}", enc(k), enc(v))))
        .collect();
    if pairs.is_empty() {
        url.to_string()
    } else {
        format!("{}?{}", url, pairs.join("&"))
    }
}

fn scoped(base: &str, household_id: &str, rest: &str) -> String {
    base_join(base, &format!("{}/{}", household_scope(household_id), rest))
}

pub fn auth_register(base: &str) -> String {
    base_join(base, &format!("{}/auth/register", API_PREFIX))
}
pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_PREFIX))
}
pub fn auth_me(base: &str) -> String {
    base_join(base, &format!("{}/auth/me", API_PREFIX))
}
pub fn auth_renew(base: &str) -> String {
    base_join(base, &format!("{}/auth/renew", API_PREFIX))
}
pub fn auth_logout(base: &str) -> String {
    base_join(base, &format!("{}/auth/logout", API_PREFIX))
}
pub fn version(base: &str) -> String {
    base_join(base, &format!("{}/version", API_PREFIX))
}

pub fn households(base: &str) -> String {
    base_join(base, &format!("{}/households", API_PREFIX))
}
pub fn household(base: &str, household_id: &str) -> String {
    base_join(base, &household_scope(household_id))
}

pub fn members(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "members")
}
pub fn member(base: &str, household_id: &str, user_id: &str) -> String {
    scoped(base, household_id, &format!("members/{}", enc(user_id)))
}

pub fn children(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "children")
}
pub fn child(base: &str, household_id: &str, child_id: &str) -> String {
    scoped(base, household_id, &format!("children/{}", enc(child_id)))
}
pub fn child_points(base: &str, household_id: &str, child_id: &str) -> String {
    scoped(base, household_id, &format!("children/{}/points", enc(child_id)))
}
pub fn child_redemptions(base: &str, household_id: &str, child_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("children/{}/redemptions", enc(child_id)),
    )
}

pub fn tasks(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "tasks")
}
pub fn task(base: &str, household_id: &str, task_id: &str) -> String {
    scoped(base, household_id, &format!("tasks/{}", enc(task_id)))
}

pub fn assignments(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "assignments")
}
pub fn assignment(base: &str, household_id: &str, assignment_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("assignments/{}", enc(assignment_id)),
    )
}
pub fn assignment_complete(base: &str, household_id: &str, assignment_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("assignments/{}/complete", enc(assignment_id)),
    )
}

pub fn completions(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "completions")
}
pub fn completion_approve(base: &str, household_id: &str, completion_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("completions/{}/approve", enc(completion_id)),
    )
}
pub fn completion_reject(base: &str, household_id: &str, completion_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("completions/{}/reject", enc(completion_id)),
    )
}

pub fn rewards(base: &str, household_id: &str) -> String {
    scoped(base, household_id, "rewards")
}
pub fn reward(base: &str, household_id: &str, reward_id: &str) -> String {
    scoped(base, household_id, &format!("rewards/{}", enc(reward_id)))
}
pub fn reward_redeem(base: &str, household_id: &str, reward_id: &str) -> String {
    scoped(
        base,
        household_id,
        &format!("rewards/{}/redeem", enc(reward_id)),
    )
}
