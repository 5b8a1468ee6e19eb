//! Router assembly.
//!
//! Every group sits behind the general limiter. Within a group the limiter
//! and the gates run in the order listed at each `route_layer` block (the
//! last layer added runs first).

use crate::auth::{
    api as auth_api,
    middleware::{optional_auth, require_admin, require_auth},
    AuthState,
};
use crate::middleware::{enforce_quota, request_logging, Limiters};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub const API_PREFIX: &str = "/api/v1";

pub fn build_router(state: AuthState, limiters: Limiters, cors_allow_any: bool) -> Router {
    let gate = state.gate.clone();

    // Login and admin bootstrap: auth limiter
    let credential_routes = Router::new()
        .route("/auth/login", post(auth_api::login))
        .route("/admin/create-admin", post(auth_api::create_admin))
        .route_layer(middleware::from_fn_with_state(
            limiters.auth.clone(),
            enforce_quota,
        ));

    // Logout must stay reachable with an already revoked token, so no gate
    let logout_routes = Router::new().route("/auth/logout", post(auth_api::logout));

    let registration_routes = Router::new()
        .route("/users/register", post(auth_api::register))
        .route_layer(middleware::from_fn_with_state(
            limiters.registration.clone(),
            enforce_quota,
        ));

    // optional_auth -> public_api quota
    let public_routes = Router::new()
        .route("/users/:id", get(auth_api::get_user))
        .route_layer(middleware::from_fn_with_state(
            limiters.public_api.clone(),
            enforce_quota,
        ))
        .route_layer(middleware::from_fn_with_state(gate.clone(), optional_auth));

    // optional_auth -> public_api quota -> require_auth
    let account_routes = Router::new()
        .route("/auth/me", get(auth_api::get_current_user))
        .route("/users/me", put(auth_api::update_current_user))
        .route_layer(middleware::from_fn_with_state(gate.clone(), require_auth))
        .route_layer(middleware::from_fn_with_state(
            limiters.public_api.clone(),
            enforce_quota,
        ))
        .route_layer(middleware::from_fn_with_state(gate.clone(), optional_auth));

    // admin quota -> require_auth -> require_admin
    let admin_routes = Router::new()
        .route("/admin/users", get(auth_api::list_users))
        .route("/admin/users/:id", delete(auth_api::delete_user))
        .route("/admin/users/:id/role", put(auth_api::update_user_role))
        .route("/admin/stats", get(auth_api::get_system_stats))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(gate, require_auth))
        .route_layer(middleware::from_fn_with_state(
            limiters.admin.clone(),
            enforce_quota,
        ));

    let api = Router::new()
        .merge(credential_routes)
        .merge(logout_routes)
        .merge(registration_routes)
        .merge(public_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            limiters.general.clone(),
            enforce_quota,
        ));

    let cors = if cors_allow_any {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(auth_api::health))
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
