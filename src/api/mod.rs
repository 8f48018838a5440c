use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::access::Caller;
use crate::AppState;

pub mod handlers;

/// Build the read + maintenance API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let reads = Router::new()
        .route("/workspaces/:id/trends", get(handlers::get_trend))
        .route("/trends", get(handlers::scan_trends))
        .layer(middleware::from_fn_with_state(state.clone(), caller_auth));

    let maintenance = Router::new()
        .route(
            "/workspaces/:id/trends/invalidate",
            post(handlers::invalidate_trend),
        )
        .route("/maintenance/sweep", post(handlers::sweep_expired))
        .layer(middleware::from_fn_with_state(state, admin_auth));

    reads
        .merge(maintenance)
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: resolves the caller identity supplied by the identity
/// collaborator (`X-Caller-Id`) into a [`Caller`] with their authorized
/// workspace set, and attaches it to the request.
///
/// The identity provider in front of this service owns authentication; we
/// treat the header as authenticated input and the membership table as
/// authoritative.
async fn caller_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user_id = req
        .headers()
        .get("x-caller-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok());

    let user_id = match user_id {
        Some(id) => id,
        None => {
            tracing::warn!("read API: missing or malformed X-Caller-Id header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let workspaces = state
        .db
        .authorized_workspaces(user_id, state.config.allow_self_scope)
        .await
        .map_err(|e| {
            tracing::error!("failed to load workspace membership: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    req.extensions_mut().insert(Caller::new(user_id, workspaces));
    Ok(next.run(req).await)
}

/// Middleware: validates `X-Admin-Key` against the configured admin key.
/// Guards cache busting and the expiry sweep.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == state.config.admin_key => Ok(next.run(req).await),
        Some(k) => {
            // SECURITY: never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("maintenance API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("maintenance API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
