use super::{AppError, AppState, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::Next,
};
use diddit_shared::auth::Role;
use diddit_shared::path::{child_id_from_path, household_id_from_path};
use percent_encoding::percent_decode_str;
use tracing::Span;

/// The caller's membership in the household named by the request path.
#[derive(Clone, Debug)]
pub struct HouseholdCtx {
    pub household_id: String,
    pub user_id: String,
    pub role: Role,
    /// Set for child members: the child record this user acts as.
    pub child_id: Option<String>,
}

impl HouseholdCtx {
    pub fn is_guardian(&self) -> bool {
        self.role.is_guardian()
    }

    /// Guardians see every child; a child member only itself.
    pub fn ensure_child_access(&self, child_id: &str) -> Result<(), AppError> {
        if self.is_guardian() || self.child_id.as_deref() == Some(child_id) {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }

    /// Child filter to apply on list endpoints: child members are pinned to themselves.
    pub fn scoped_child_filter(&self, requested: Option<String>) -> Result<Option<String>, AppError> {
        if self.is_guardian() {
            return Ok(requested);
        }
        let own = self.child_id.clone().ok_or_else(AppError::forbidden)?;
        match requested {
            Some(r) if r != own => Err(AppError::forbidden()),
            _ => Ok(Some(own)),
        }
    }
}

pub async fn enforce_acl(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let user_id = auth.user_id().to_string();

    let Some(household_id) = household_id_from_path(&path) else {
        tracing::warn!(%path, "ACL: path outside household scope");
        return Err(AppError::forbidden());
    };
    let segs = segmented(&path);
    // ["api", "households", "{id}", ...]
    let rest = segs.get(3..).unwrap_or_default();

    let membership = state
        .store
        .get_membership(&household_id, &user_id)
        .await
        .map_err(AppError::internal)?;
    let Some(membership) = membership else {
        tracing::warn!(%household_id, %user_id, "ACL: not a member");
        return Err(AppError::forbidden());
    };
    let role: Role = membership.role.parse().map_err(AppError::internal)?;

    let span = Span::current();
    span.record("household_id", tracing::field::display(&household_id));
    span.record("role", tracing::field::display(role));
    if let Some(cid) = child_id_from_path(&path) {
        span.record("child_id", tracing::field::display(cid));
    }

    let ctx = HouseholdCtx {
        household_id,
        user_id,
        role,
        child_id: membership.child_id,
    };

    let decision = match role {
        Role::Admin => allow_admin(&method, rest, &ctx),
        Role::Parent => allow_parent(&method, rest, &ctx),
        Role::Child => allow_child(&method, rest, &ctx),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = %ctx.user_id,
            role = %ctx.role,
            member_child = ?ctx.child_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

fn allow_admin(method: &Method, rest: &[&str], ctx: &HouseholdCtx) -> Result<(), AppError> {
    match rest {
        [] if *method == Method::PUT || *method == Method::DELETE => Ok(()),
        ["members"] if *method == Method::POST => Ok(()),
        ["members", _] if *method == Method::PUT || *method == Method::DELETE => Ok(()),
        _ => allow_parent(method, rest, ctx),
    }
}

fn allow_parent(method: &Method, rest: &[&str], ctx: &HouseholdCtx) -> Result<(), AppError> {
    let get = *method == Method::GET;
    let post = *method == Method::POST;
    let edit = *method == Method::PUT || *method == Method::DELETE;
    match rest {
        [] if get => Ok(()),
        ["members"] if get => Ok(()),
        ["children"] if get || post => Ok(()),
        ["children", _] if get || edit => Ok(()),
        ["children", _, "points" | "redemptions"] if get => Ok(()),
        ["tasks"] if get || post => Ok(()),
        ["tasks", _] if get || edit => Ok(()),
        ["assignments"] if get || post => Ok(()),
        ["assignments", _] if get || *method == Method::DELETE => Ok(()),
        ["assignments", _, "complete"] if post => Ok(()),
        ["completions"] if get => Ok(()),
        ["completions", _] if get => Ok(()),
        ["completions", _, "approve" | "reject"] if post => Ok(()),
        ["rewards"] if get || post => Ok(()),
        ["rewards", _] if get || edit => Ok(()),
        ["rewards", _, "redeem"] if post => Ok(()),
        _ => allow_member(method, rest, ctx),
    }
}

/// Rules every member gets regardless of role.
fn allow_member(method: &Method, rest: &[&str], ctx: &HouseholdCtx) -> Result<(), AppError> {
    match rest {
        // Anyone may leave a household.
        ["members", user] if *method == Method::DELETE => ensure_self(ctx, user),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(method: &Method, rest: &[&str], ctx: &HouseholdCtx) -> Result<(), AppError> {
    let get = *method == Method::GET;
    let post = *method == Method::POST;
    match rest {
        [] if get => Ok(()),
        ["members"] if get => Ok(()),
        ["children"] if get => Ok(()),
        ["children", child] if get => ensure_child(ctx, child),
        ["children", child, "points" | "redemptions"] if get => ensure_child(ctx, child),
        ["tasks"] if get => Ok(()),
        ["tasks", _] if get => Ok(()),
        // Ownership of the assignment/completion is checked by the handler.
        ["assignments"] if get => Ok(()),
        ["assignments", _] if get => Ok(()),
        ["assignments", _, "complete"] if post => Ok(()),
        ["completions"] if get => Ok(()),
        ["completions", _] if get => Ok(()),
        ["rewards"] if get => Ok(()),
        ["rewards", _] if get => Ok(()),
        ["rewards", _, "redeem"] if post => Ok(()),
        _ => allow_member(method, rest, ctx),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_child(ctx: &HouseholdCtx, seg: &str) -> Result<(), AppError> {
    let expected = ctx.child_id.as_ref().ok_or_else(AppError::forbidden)?;
    if *expected == decode(seg) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

fn ensure_self(ctx: &HouseholdCtx, seg: &str) -> Result<(), AppError> {
    if ctx.user_id == decode(seg) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}
