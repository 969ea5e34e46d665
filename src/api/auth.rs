//! Account, profile, and role-administration handlers.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    auth::{credentials, roles},
    runtime::Runtime,
    service::db::{AuditLogRecord, AuthTokenRecord, UserRecord},
};

use super::{ApiError, ApiResult, CurrentUser};

// Request bodies.

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    pub user_id: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

// Helpers.

fn user_json(user: &UserRecord) -> Value {
    json!({
        "id": user.username,
        "username": user.username,
        "email": user.email,
        "first_name": user.first_name,
        "last_name": user.last_name,
    })
}

async fn issue_token(runtime: &Runtime, username: &str) -> ApiResult<String> {
    // One token per user; reuse the existing one like the frontend expects.
    if let Some(existing) = runtime.db.find_user_token(username).await? {
        return Ok(existing.key);
    }

    let token = AuthTokenRecord {
        id: None,
        key: credentials::generate_token_key(),
        username: username.to_string(),
        created: Utc::now(),
    };
    runtime.db.store_token(&token).await?;

    Ok(token.key)
}

// Handlers.

/// Register a new user.
#[instrument(skip_all)]
pub async fn register(State(runtime): State<Runtime>, Json(body): Json<RegisterRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.username.is_empty() || body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("Username, email, and password are required".to_string()));
    }

    credentials::validate_password(&body.password).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if runtime.db.get_user(&body.username).await?.is_some() {
        return Err(ApiError::BadRequest("Username already exists".to_string()));
    }

    if runtime.db.find_user_by_email(&body.email).await?.is_some() {
        return Err(ApiError::BadRequest("Email already exists".to_string()));
    }

    let user = UserRecord {
        id: None,
        username: body.username.clone(),
        email: body.email.clone(),
        password_hash: credentials::hash_password(&body.password),
        first_name: body.first_name,
        last_name: body.last_name,
        is_active: true,
        roles: vec![roles::DEFAULT_ROLE.to_string()],
        date_joined: Utc::now(),
        last_login: None,
    };
    let user = runtime.db.create_user(&user).await?;

    let token = issue_token(&runtime, &user.username).await?;

    info!("Registered user `{}`.", user.username);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": user_json(&user),
            "token": token,
        })),
    ))
}

/// Login user and return token.
#[instrument(skip_all)]
pub async fn login(State(runtime): State<Runtime>, Json(body): Json<LoginRequest>) -> ApiResult<Json<Value>> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password are required".to_string()));
    }

    let Some(mut user) = runtime.db.get_user(&body.username).await? else {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    };

    if !credentials::verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".to_string()));
    }

    user.last_login = Some(Utc::now());
    let user = runtime.db.update_user(&user).await?;

    let token = issue_token(&runtime, &user.username).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "user": user_json(&user),
        "token": token,
    })))
}

/// Logout user by deleting their token.
#[instrument(skip_all)]
pub async fn logout(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    runtime.db.delete_token(&current.token_key).await?;

    Ok(Json(json!({ "message": "Logout successful" })))
}

/// Get profile information for the authenticated user.
#[instrument(skip_all)]
pub async fn profile(Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    let user = &current.user;
    let permissions = roles::effective_permissions(&user.roles);

    Ok(Json(json!({
        "user": {
            "id": user.username,
            "username": user.username,
            "email": user.email,
            "first_name": user.first_name,
            "last_name": user.last_name,
            "is_active": user.is_active,
            "date_joined": user.date_joined,
            "last_login": user.last_login,
            "roles": user.roles,
            "permissions": permissions,
        }
    })))
}

/// Update profile fields for the authenticated user.
#[instrument(skip_all)]
pub async fn update_profile(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<UpdateProfileRequest>) -> ApiResult<Json<Value>> {
    let mut user = current.user.clone();

    if let Some(first_name) = body.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = body.last_name {
        user.last_name = last_name;
    }
    if let Some(email) = body.email {
        // The address must not belong to a different account.
        if let Some(existing) = runtime.db.find_user_by_email(&email).await?
            && existing.username != user.username
        {
            return Err(ApiError::BadRequest("Email already exists".to_string()));
        }
        user.email = email;
    }

    let user = runtime.db.update_user(&user).await?;

    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": user_json(&user),
    })))
}

/// Change the authenticated user's password, rotating their token.
#[instrument(skip_all)]
pub async fn change_password(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<ChangePasswordRequest>) -> ApiResult<Json<Value>> {
    if body.current_password.is_empty() || body.new_password.is_empty() {
        return Err(ApiError::BadRequest("Current password and new password are required".to_string()));
    }

    if !credentials::verify_password(&body.current_password, &current.user.password_hash) {
        return Err(ApiError::BadRequest("Current password is incorrect".to_string()));
    }

    credentials::validate_password(&body.new_password).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut user = current.user.clone();
    user.password_hash = credentials::hash_password(&body.new_password);
    runtime.db.update_user(&user).await?;

    // Old tokens stop working immediately.
    runtime.db.delete_user_tokens(&user.username).await?;
    let token = issue_token(&runtime, &user.username).await?;

    Ok(Json(json!({
        "message": "Password changed successfully",
        "token": token,
    })))
}

/// Login or register a user with a Google ID token.
#[instrument(skip_all)]
pub async fn google_login(State(runtime): State<Runtime>, Json(body): Json<GoogleLoginRequest>) -> ApiResult<Json<Value>> {
    if body.token.is_empty() {
        return Err(ApiError::BadRequest("Google token is required".to_string()));
    }

    let Some(info) = verify_google_token(&runtime, &body.token).await else {
        return Err(ApiError::Unauthorized("Invalid Google token or authentication failed".to_string()));
    };

    let existing = runtime.db.find_user_by_email(&info.email).await?;
    let is_new_user = existing.is_none();

    let mut user = match existing {
        Some(user) => user,
        None => {
            let username = unique_username_for(&runtime, &info.email).await?;

            let user = UserRecord {
                id: None,
                username,
                email: info.email.clone(),
                password_hash: credentials::UNUSABLE_PASSWORD.to_string(),
                first_name: info.given_name,
                last_name: info.family_name,
                is_active: true,
                roles: vec![roles::DEFAULT_ROLE.to_string()],
                date_joined: Utc::now(),
                last_login: None,
            };
            runtime.db.create_user(&user).await?
        }
    };

    if user.roles.is_empty() {
        user.roles = vec![roles::DEFAULT_ROLE.to_string()];
    }

    user.last_login = Some(Utc::now());
    let user = runtime.db.update_user(&user).await?;

    let token = issue_token(&runtime, &user.username).await?;

    Ok(Json(json!({
        "message": "Google login successful",
        "user": user_json(&user),
        "token": token,
        "is_new_user": is_new_user,
    })))
}

/// List the assignable role names. Admin only.
#[instrument(skip_all)]
pub async fn list_roles(Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["admin:*"])?;

    Ok(Json(json!({ "roles": roles::role_names() })))
}

/// Replace a user's roles. Admin only; audited.
#[instrument(skip_all)]
pub async fn assign_roles(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<AssignRolesRequest>) -> ApiResult<Json<Value>> {
    current.require(&["admin:*"])?;

    if body.roles.is_empty() {
        return Err(ApiError::BadRequest("roles must be a non-empty list".to_string()));
    }

    let invalid: Vec<&String> = body.roles.iter().filter(|r| !roles::is_valid_role(r)).collect();
    if !invalid.is_empty() {
        return Err(ApiError::BadRequest(format!("Invalid roles: {invalid:?}")));
    }

    let username = body.user_id.or(body.username).ok_or_else(|| ApiError::BadRequest("Provide user_id or username".to_string()))?;

    let Some(mut user) = runtime.db.get_user(&username).await? else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    let prev_roles = user.roles.clone();
    user.roles = body.roles.clone();
    let user = runtime.db.update_user(&user).await?;

    runtime
        .db
        .add_audit_log(&AuditLogRecord {
            id: None,
            username: Some(current.username().to_string()),
            action: "role_change".to_string(),
            details: json!({ "target_user": user.username, "from": prev_roles, "to": body.roles }),
            created_at: Utc::now(),
        })
        .await?;

    Ok(Json(json!({ "success": true, "user_id": user.username, "roles": user.roles })))
}

// Google token verification.

struct GoogleUserInfo {
    email: String,
    given_name: String,
    family_name: String,
}

/// Verify a Google ID token against the tokeninfo endpoint.
///
/// Returns `None` on any failure: network, audience mismatch, or an
/// unverified email address.
async fn verify_google_token(runtime: &Runtime, token: &str) -> Option<GoogleUserInfo> {
    let response = reqwest::Client::new()
        .get("https://oauth2.googleapis.com/tokeninfo")
        .query(&[("id_token", token)])
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        warn!("Google tokeninfo returned {}.", response.status());
        return None;
    }

    let info: Value = response.json().await.ok()?;

    let audience = info.get("aud").and_then(Value::as_str).unwrap_or_default();
    if runtime.config.google_client_id.is_empty() || audience != runtime.config.google_client_id {
        warn!("Google token audience mismatch.");
        return None;
    }

    if info.get("email_verified").and_then(Value::as_str) != Some("true") {
        warn!("Google account email is not verified.");
        return None;
    }

    Some(GoogleUserInfo {
        email: info.get("email").and_then(Value::as_str)?.to_string(),
        given_name: info.get("given_name").and_then(Value::as_str).unwrap_or_default().to_string(),
        family_name: info.get("family_name").and_then(Value::as_str).unwrap_or_default().to_string(),
    })
}

/// Derive a unique username from an email address.
async fn unique_username_for(runtime: &Runtime, email: &str) -> ApiResult<String> {
    let base = email.split('@').next().unwrap_or(email).to_string();

    let mut candidate = base.clone();
    let mut counter = 1;

    while runtime.db.get_user(&candidate).await?.is_some() {
        candidate = format!("{base}{counter}");
        counter += 1;
    }

    Ok(candidate)
}
