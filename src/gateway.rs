use crate::deny_reason::{self, DenyReason};
use crate::limit::{Limit, INF_DURATION};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::HeaderValue, HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};
use tracing::debug;

/// Tokens a request consumes. Missing or malformed => 1, non-positive => 0.
pub const COST_HEADER: &str = "x-request-cost";
pub const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";

pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/status", get(status))
        .route(
            "/*path",
            any(echo).layer(middleware::from_fn_with_state(app.clone(), admit)),
        )
        .with_state(app)
}

// ----------------------
// Admission middleware
// ----------------------
pub async fn admit(State(app): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    app.total_requests.fetch_add(1, Ordering::Relaxed);

    let cost = request_cost(req.headers());
    let route = { app.registry.read().await.resolve(req.uri().path()) };

    // A zero bound makes this a plain allow/deny decision.
    let res = route.limiter.reserve_n_within(Instant::now(), cost, route.max_wait());
    if !res.ok() {
        route.on_reject();
        let reason = res.reason().unwrap_or(DenyReason::Exhausted);
        deny_reason::set_last_denial(&route.route, reason);
        debug!(route = %route.route, cost, reason = reason.as_str(), "request rate limited");
        return rate_limited(reason, res.delay());
    }

    let wait = res.delay_from(Instant::now());
    if !wait.is_zero() {
        debug!(route = %route.route, cost, wait_ms = wait.as_millis() as u64, "holding request for reservation");
        tokio::time::sleep(wait).await;
    }
    route.on_admit();
    next.run(req).await
}

pub fn request_cost(headers: &HeaderMap) -> usize {
    headers
        .get(COST_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.max(0) as usize)
        .unwrap_or(1)
}

fn rate_limited(reason: DenyReason, wait: Duration) -> Response {
    let message = match reason {
        DenyReason::ExceedsBurst => "Request cost exceeds burst; it can never be admitted",
        DenyReason::Exhausted => "Rate limited; try later",
    };
    let body = json!({"error": {"code": 429, "reason": reason.as_str(), "message": message}});
    let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if reason.is_transient() && wait < INF_DURATION {
        let ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        resp.headers_mut().insert(RETRY_AFTER_MS_HEADER, HeaderValue::from(ms));
    }
    resp
}

// ----------------------
// Handlers
// ----------------------
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

pub async fn status(State(app): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let reg = app.registry.read().await;
    let now = Instant::now();
    let mut list = Vec::new();
    for r in reg.all() {
        let limit = match r.limiter.limit() {
            Limit::Unlimited => json!("unlimited"),
            Limit::PerSecond(rate) => json!(rate.get()),
        };
        list.push(json!({
            "route": r.route,
            "limit": limit,
            "burst": r.limiter.burst(),
            "tokens": r.limiter.tokens_at(now),
            "max_wait_ms": r.max_wait_ms.load(Ordering::Relaxed),
            "admitted": r.get_admitted(),
            "rejected": r.get_rejected(),
            "last_denial": deny_reason::last_denial_str(&r.route),
        }));
    }
    let total = app.total_requests.load(Ordering::Relaxed);
    (StatusCode::OK, Json(json!({ "total_requests": total, "routes": list })))
}

pub async fn echo(uri: Uri, headers: HeaderMap) -> Json<Value> {
    Json(json!({"path": uri.path(), "cost": request_cost(&headers)}))
}
