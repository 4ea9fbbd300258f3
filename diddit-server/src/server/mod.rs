mod acl;
pub mod auth;
mod config;
mod error;
pub mod rate_limit;
mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

pub use acl::HouseholdCtx;
use auth::AuthCtx;
pub use config::{AppConfig, AuthConfig, ConfigError, RateLimitConfig};
pub use error::AppError;
use rate_limit::RateLimits;

use crate::storage::{Store, models::PointsTotals};

type PointsCacheMap = Arc<Mutex<HashMap<String, Arc<Mutex<Option<PointsTotals>>>>>>;

/// Guard over one child's cached balance; holding it serializes writes to that child's points.
pub type PointsGuard<'a> = MutexGuard<'a, Option<PointsTotals>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    // Balance per child. None => needs recompute
    points_cache: PointsCacheMap,
    rate_limits: Option<Arc<RateLimits>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        let rate_limits = RateLimits::from_config(&config.rate_limit).map(Arc::new);
        Self {
            config,
            store,
            points_cache: Default::default(),
            rate_limits,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn rate_limits(&self) -> Option<&RateLimits> {
        self.rate_limits.as_deref()
    }

    pub(crate) async fn child_mutex(&self, child_id: &str) -> Arc<Mutex<Option<PointsTotals>>> {
        let mut map = self.points_cache.lock().await;
        map.entry(child_id.to_string())
            .or_insert_with(Default::default)
            .clone()
    }

    pub(crate) fn reset_points(&self, guard: &mut PointsGuard<'_>) {
        guard.take();
    }

    /// Removes a deleted child's cache slot entirely.
    pub(crate) async fn forget_points(&self, child_id: &str) {
        self.points_cache.lock().await.remove(child_id);
    }

    /// Drops every cached balance; used after writes that cascade across children.
    pub(crate) async fn invalidate_all_points(&self) {
        self.points_cache.lock().await.clear();
    }

    pub(crate) async fn points(
        &self,
        child_id: &str,
        guard: &mut PointsGuard<'_>,
    ) -> Result<PointsTotals, AppError> {
        if let Some(v) = **guard {
            return Ok(v);
        }
        let v = self.store.compute_points(child_id).await?;
        **guard = Some(v);
        Ok(v)
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    use routes::{account, assignments, children, households, rewards, tasks};

    let household = Router::new()
        .route(
            "/api/households/{household_id}",
            get(households::get_household)
                .put(households::update_household)
                .delete(households::delete_household),
        )
        .route(
            "/api/households/{household_id}/members",
            get(households::list_members).post(households::add_member),
        )
        .route(
            "/api/households/{household_id}/members/{user_id}",
            axum::routing::put(households::update_member).delete(households::remove_member),
        )
        .route(
            "/api/households/{household_id}/children",
            get(children::list_children).post(children::create_child),
        )
        .route(
            "/api/households/{household_id}/children/{child_id}",
            get(children::get_child)
                .put(children::update_child)
                .delete(children::delete_child),
        )
        .route(
            "/api/households/{household_id}/children/{child_id}/points",
            get(children::child_points),
        )
        .route(
            "/api/households/{household_id}/children/{child_id}/redemptions",
            get(children::child_redemptions),
        )
        .route(
            "/api/households/{household_id}/tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route(
            "/api/households/{household_id}/tasks/{task_id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/api/households/{household_id}/assignments",
            get(assignments::list_assignments).post(assignments::create_assignment),
        )
        .route(
            "/api/households/{household_id}/assignments/{assignment_id}",
            get(assignments::get_assignment).delete(assignments::delete_assignment),
        )
        .route(
            "/api/households/{household_id}/assignments/{assignment_id}/complete",
            post(assignments::complete_assignment),
        )
        .route(
            "/api/households/{household_id}/completions",
            get(assignments::list_completions),
        )
        .route(
            "/api/households/{household_id}/completions/{completion_id}",
            get(assignments::get_completion),
        )
        .route(
            "/api/households/{household_id}/completions/{completion_id}/approve",
            post(assignments::approve_completion),
        )
        .route(
            "/api/households/{household_id}/completions/{completion_id}/reject",
            post(assignments::reject_completion),
        )
        .route(
            "/api/households/{household_id}/rewards",
            get(rewards::list_rewards).post(rewards::create_reward),
        )
        .route(
            "/api/households/{household_id}/rewards/{reward_id}",
            get(rewards::get_reward)
                .put(rewards::update_reward)
                .delete(rewards::delete_reward),
        )
        .route(
            "/api/households/{household_id}/rewards/{reward_id}/redeem",
            post(rewards::redeem_reward),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            acl::enforce_acl,
        ));

    // Layers added last run first: limit, then bearer auth, then span fields, then ACL.
    let private = Router::new()
        .route("/api/auth/me", get(account::me))
        .route("/api/auth/renew", post(account::renew))
        .route("/api/auth/logout", post(account::logout))
        .route(
            "/api/households",
            get(households::list_households).post(households::create_household),
        )
        .merge(household)
        .route_layer(middleware::from_fn(set_auth_span_fields))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_api,
        ));

    let public_auth = Router::new()
        .route("/api/auth/register", post(account::register))
        .route("/api/auth/login", post(account::login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_auth,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
            household_id = tracing::field::Empty,
            role = tracing::field::Empty,
            child_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(account::health))
        .route(
            "/api/version",
            get(account::version).route_layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit::limit_api,
            )),
        )
        .merge(public_auth)
        .merge(private)
        .fallback(not_found)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    // Validated at config load
    if let Some(hv) = state
        .config
        .dev_cors_origin
        .as_deref()
        .and_then(|origin| header::HeaderValue::from_str(origin).ok())
    {
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn not_found(uri: axum::http::Uri) -> AppError {
    AppError::not_found(format!("no route for {}", uri.path()))
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
        ("cross-origin-opener-policy", "same-origin"),
        ("cross-origin-resource-policy", "same-origin"),
        // HSTS is only honored on HTTPS; harmless otherwise
        ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ] {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    // Disable caching for API and health endpoints
    if path == "/healthz" || path == "/api" || path.starts_with("/api/") {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        Span::current().record("user_id", tracing::field::display(auth.user_id()));
    }
    Ok(next.run(req).await)
}
