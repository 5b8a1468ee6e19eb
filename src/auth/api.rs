//! Authentication API Endpoints
//! Mission: Login/logout, registration, profile, and admin user management

use crate::auth::{
    gate::{AuthGate, LogoutOutcome},
    jwt::TokenCodec,
    models::{
        is_valid_email, normalize_email, Identity, LoginRequest, LoginResponse, PublicProfile,
        RegisterRequest, UpdateProfileRequest, UpdateRoleRequest, UserResponse, UserRole,
        MIN_NAME_LEN, MIN_PASSWORD_LEN,
    },
    revocation::RevocationStore,
    user_store::{CredentialStore, ProfileUpdate, UserStore},
};
use crate::error::{AuthError, StoreError};
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub tokens: Arc<dyn TokenCodec>,
    pub gate: Arc<AuthGate>,
}

impl AuthState {
    pub fn new(
        user_store: Arc<UserStore>,
        tokens: Arc<dyn TokenCodec>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        let gate = Arc::new(AuthGate::new(
            tokens.clone(),
            revocations,
            user_store.clone(),
        ));
        Self {
            user_store,
            tokens,
            gate,
        }
    }
}

/// Login endpoint - POST /api/v1/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AuthApiError::MissingCredentials);
    }

    let user = state.user_store.find_by_email(&payload.email).await?;

    // Unknown email and wrong password are indistinguishable to the caller
    let Some(user) = user else {
        warn!("Failed login attempt: unknown email");
        return Err(AuthApiError::InvalidCredentials);
    };
    if !state
        .user_store
        .verify_secret(&user, &payload.password)
        .await?
    {
        warn!(user_id = %user.id, "Failed login attempt: wrong password");
        return Err(AuthApiError::InvalidCredentials);
    }

    let issued = state.tokens.issue(&user.id).map_err(|e| {
        error!(error = %e, "token issuance failed");
        AuthApiError::InternalError
    })?;

    info!(user_id = %user.id, role = %user.role, "Login successful");

    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful",
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserResponse::from_user(&user),
    }))
}

/// Logout endpoint - POST /api/v1/auth/logout
///
/// Blacklists the presented bearer token. Repeating the call with the same
/// token still succeeds.
pub async fn logout(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());

    let outcome = state.gate.logout(header).await.map_err(|e| match e {
        AuthError::MissingToken => AuthApiError::NoTokenProvided,
        other => AuthApiError::Auth(other),
    })?;

    if outcome == LogoutOutcome::AlreadyRevoked {
        info!("logout repeated for an already revoked token");
    }

    Ok(Json(json!({
        "success": true,
        "message": "Logout successful",
        "tokenBlacklisted": true,
        "instruction": "Please remove the token from client-side storage",
    })))
}

/// Get current user info - GET /api/v1/auth/me
pub async fn get_current_user(
    State(state): State<AuthState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let user = state
        .user_store
        .find_by_id(&identity.id)
        .await?
        .ok_or(AuthApiError::Auth(AuthError::UnknownSubject))?;

    Ok(Json(json!({
        "success": true,
        "user": UserResponse::from_user(&user),
    })))
}

/// Register endpoint - POST /api/v1/users/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuthApiError> {
    validate_registration(&payload)?;

    let user = state
        .user_store
        .create_user(
            &payload.name,
            &payload.email,
            &payload.password,
            UserRole::User,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "user": UserResponse::from_user(&user),
        })),
    ))
}

/// Public profile - GET /api/v1/users/:id
pub async fn get_user(
    State(state): State<AuthState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let id = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;
    let user = state
        .user_store
        .find_by_id(&id)
        .await?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(json!({
        "success": true,
        "data": PublicProfile::from_user(&user),
    })))
}

/// Update own profile - PUT /api/v1/users/me
pub async fn update_current_user(
    State(state): State<AuthState>,
    identity: Identity,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    if let Some(name) = &payload.name {
        validate_name(name)?;
    }
    if let Some(email) = &payload.email {
        validate_email(email)?;
    }
    if let Some(password) = &payload.password {
        validate_password(password)?;
    }

    let user = state
        .user_store
        .update_profile(
            &identity.id,
            ProfileUpdate {
                name: payload.name,
                email: payload.email,
                password: payload.password,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated",
        "user": UserResponse::from_user(&user),
    })))
}

/// Bootstrap the first admin - POST /api/v1/admin/create-admin
///
/// Open only while no admin exists.
pub async fn create_admin(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuthApiError> {
    validate_registration(&payload)?;

    let admin = state
        .user_store
        .create_first_admin(&payload.name, &payload.email, &payload.password)
        .await?
        .ok_or(AuthApiError::AdminAlreadyProvisioned)?;

    info!(user_id = %admin.id, "Admin user created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Admin user created successfully",
            "user": UserResponse::from_user(&admin),
        })),
    ))
}

/// List all users - GET /api/v1/admin/users (Admin only)
pub async fn list_users(
    State(state): State<AuthState>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let users = state.user_store.list_users().await?;
    let data: Vec<UserResponse> = users.iter().map(UserResponse::from_user).collect();

    Ok(Json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    })))
}

/// Change a user's role - PUT /api/v1/admin/users/:id/role (Admin only)
pub async fn update_user_role(
    State(state): State<AuthState>,
    identity: Identity,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let id = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;
    let role = UserRole::parse(&payload.role).ok_or(AuthApiError::InvalidRole)?;

    let user = state.user_store.update_role(&id, role).await?;
    info!(admin_id = %identity.id, user_id = %user.id, role = %role, "User role updated");

    Ok(Json(json!({
        "success": true,
        "message": format!("User role updated to {role}"),
        "data": UserResponse::from_user(&user),
    })))
}

/// Delete user - DELETE /api/v1/admin/users/:id (Admin only)
pub async fn delete_user(
    State(state): State<AuthState>,
    identity: Identity,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let id = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;

    // Don't allow deleting yourself
    if id == identity.id {
        warn!(admin_id = %identity.id, "Admin attempted to delete own account");
        return Err(AuthApiError::CannotDeleteSelf);
    }

    state.user_store.delete_user(&id).await?;
    info!(admin_id = %identity.id, user_id = %id, "User deleted");

    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully",
        "data": { "id": id },
    })))
}

/// System statistics - GET /api/v1/admin/stats (Admin only)
pub async fn get_system_stats(
    State(state): State<AuthState>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, AuthApiError> {
    let counts = state.user_store.role_counts().await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "totalUsers": counts.total_users,
            "adminUsers": counts.admin_users,
            "regularUsers": counts.regular_users,
            "currentUserRole": identity.role,
        },
    })))
}

/// Liveness probe - GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), AuthApiError> {
    validate_name(&payload.name)?;
    validate_email(&payload.email)?;
    validate_password(&payload.password)
}

fn validate_name(name: &str) -> Result<(), AuthApiError> {
    if name.trim().chars().count() < MIN_NAME_LEN {
        return Err(AuthApiError::Validation(format!(
            "Name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AuthApiError> {
    if !is_valid_email(&normalize_email(email)) {
        return Err(AuthApiError::Validation(
            "Please enter a valid email".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AuthApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Auth API errors
#[derive(Debug, Error)]
pub enum AuthApiError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email or password missing")]
    MissingCredentials,
    #[error("no token provided for logout")]
    NoTokenProvided,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("email already registered")]
    UserAlreadyExists,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid user id")]
    InvalidUserId,
    #[error("invalid role")]
    InvalidRole,
    #[error("admin tried to delete own account")]
    CannotDeleteSelf,
    #[error("an admin already exists")]
    AdminAlreadyProvisioned,
    #[error(transparent)]
    Auth(AuthError),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error")]
    InternalError,
}

impl From<StoreError> for AuthApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthApiError::UserAlreadyExists,
            StoreError::NotFound => AuthApiError::UserNotFound,
            StoreError::Unavailable(reason) => AuthApiError::StoreUnavailable(reason),
            StoreError::DuplicateRevocation | StoreError::Corrupt(_) => {
                error!(error = %err, "unexpected store error");
                AuthApiError::InternalError
            }
        }
    }
}

impl From<AuthError> for AuthApiError {
    fn from(err: AuthError) -> Self {
        AuthApiError::Auth(err)
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::Auth(err) => return err.into_response(),
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }
            AuthApiError::MissingCredentials => (
                StatusCode::BAD_REQUEST,
                "Please provide email and password".to_string(),
            ),
            AuthApiError::NoTokenProvided => (
                StatusCode::BAD_REQUEST,
                "No token provided for logout".to_string(),
            ),
            AuthApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            AuthApiError::UserAlreadyExists => (
                StatusCode::CONFLICT,
                "User with this email already exists".to_string(),
            ),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
            AuthApiError::InvalidUserId => {
                (StatusCode::BAD_REQUEST, "Invalid user ID format".to_string())
            }
            AuthApiError::InvalidRole => (
                StatusCode::BAD_REQUEST,
                "Invalid role. Must be 'user' or 'admin'".to_string(),
            ),
            AuthApiError::CannotDeleteSelf => (
                StatusCode::BAD_REQUEST,
                "Cannot delete your own account".to_string(),
            ),
            AuthApiError::AdminAlreadyProvisioned => (
                StatusCode::FORBIDDEN,
                "An admin account already exists".to_string(),
            ),
            AuthApiError::StoreUnavailable(reason) => {
                warn!(reason = %reason, "store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            AuthApiError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
