//! REST API surface.
//!
//! Routes are grouped the way the frontend consumes them: `/auth/*` for
//! accounts and role administration, `/api/incidents/*` for reported
//! incidents, and `/api/traffic/*` for live data, reports, predictions, and
//! routes. All routes except registration, login, and the health probe sit
//! behind token authentication; per-handler permission checks enforce the
//! role table in `auth::roles`.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::{
    auth::roles,
    runtime::Runtime,
    service::db::UserRecord,
};

pub mod auth;
pub mod incidents;
pub mod traffic;

// Errors.

/// Error type handlers return; maps onto a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden,
    NotFound(String),
    Internal(anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "You do not have permission to perform this action.".to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(err) => {
                error!("Internal error while handling request: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

// Authentication.

/// The authenticated user attached to a request by the token middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: UserRecord,
    pub token_key: String,
}

impl CurrentUser {
    pub fn username(&self) -> &str {
        &self.user.username
    }

    /// Enforce that the user holds at least one of the required permissions.
    pub fn require(&self, required: &[&str]) -> Result<(), ApiError> {
        if roles::has_permission(&self.user.roles, required) { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

/// Resolve the `Authorization: Token <key>` header to a user and attach it to the request.
async fn auth_middleware(State(runtime): State<Runtime>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Authentication credentials were not provided.".to_string()))?;

    let key = header.strip_prefix("Token ").ok_or_else(|| ApiError::Unauthorized("Invalid token header.".to_string()))?.trim().to_string();

    let token = runtime.db.get_token(&key).await?.ok_or_else(|| ApiError::Unauthorized("Invalid token.".to_string()))?;

    let user = runtime.db.get_user(&token.username).await?.ok_or_else(|| ApiError::Unauthorized("Invalid token.".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("User inactive or deleted.".to_string()));
    }

    request.extensions_mut().insert(CurrentUser { user, token_key: key });

    Ok(next.run(request).await)
}

// Router.

/// Build the application router.
pub fn router(runtime: Runtime) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/google-login", post(auth::google_login));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/profile", get(auth::profile))
        .route("/auth/profile/update", put(auth::update_profile))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/admin/roles/list_roles", get(auth::list_roles))
        .route("/auth/admin/roles/assign", post(auth::assign_roles))
        .route("/api/incidents", get(incidents::list).post(incidents::create))
        .route("/api/incidents/active", get(incidents::active))
        .route("/api/incidents/statistics", get(incidents::statistics))
        .route("/api/incidents/live", get(incidents::live))
        .route("/api/incidents/:id", get(incidents::retrieve).put(incidents::update).delete(incidents::destroy))
        .route("/api/incidents/:id/resolve", post(incidents::resolve))
        .route("/api/comments", get(incidents::list_comments).post(incidents::create_comment))
        .route("/api/comments/:id", get(incidents::retrieve_comment).delete(incidents::destroy_comment))
        .route("/api/traffic/live", get(traffic::live))
        .route("/api/traffic/summary", get(traffic::summary))
        .route("/api/traffic/incidents", get(traffic::incidents))
        .route("/api/traffic/data", get(traffic::list_data).post(traffic::create_data))
        .route("/api/traffic/predictions", get(traffic::list_predictions).post(traffic::create_prediction))
        .route(
            "/api/traffic/predictions/:id",
            get(traffic::retrieve_prediction).put(traffic::update_prediction).delete(traffic::destroy_prediction),
        )
        .route("/api/traffic/routes", get(traffic::list_routes).post(traffic::create_route))
        .route("/api/traffic/routes/optimize", post(traffic::optimize_route))
        .route("/api/traffic/routes/:id", get(traffic::retrieve_route).put(traffic::update_route).delete(traffic::destroy_route))
        .route("/api/traffic/reports", get(traffic::list_reports))
        .route("/api/traffic/reports/generate-report", post(traffic::generate_report))
        .route("/api/traffic/reports/generate-detailed-report", post(traffic::generate_detailed_report))
        .route("/api/traffic/reports/:id", get(traffic::retrieve_report))
        .layer(middleware::from_fn_with_state(runtime.clone(), auth_middleware));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(runtime)
}

/// Liveness probe.
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
