// src/routes.rs

use std::sync::Arc;

use axum::{
    Json, Router,
    http::Method,
    middleware,
    routing::{get, post, put},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, enrollments, simulations},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, simulations, enrollments, admin).
/// * Applies global middleware (Trace, CORS, rate limit).
/// * Injects global state (pool + config).
pub fn create_router(state: AppState) -> Router {
    let origin = state
        .config
        .frontend_url
        .parse()
        .expect("FRONTEND_URL is not a valid origin");

    let cors = CorsLayer::new()
        .allow_origin([origin])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(100)
        .finish()
        .expect("invalid rate limit configuration");

    let governor_conf = Arc::new(governor_conf);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        // Protected profile routes
        .merge(
            Router::new()
                .route("/me", get(auth::me))
                .route("/profile", put(auth::update_profile))
                .route("/change-password", put(auth::change_password))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        );

    let simulation_routes = Router::new()
        .route("/", get(simulations::list_simulations))
        .route("/featured/list", get(simulations::featured_simulations))
        .route("/category/{category}", get(simulations::list_by_category))
        .route("/{id}", get(simulations::get_simulation))
        // Stats require enrollment or admin role, so auth comes first
        .merge(
            Router::new()
                .route("/{id}/stats", get(simulations::simulation_stats))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        );

    let enrollment_routes = Router::new()
        .route("/", post(enrollments::enroll))
        .route("/my", get(enrollments::list_my_enrollments))
        .route(
            "/{id}",
            get(enrollments::get_enrollment).delete(enrollments::withdraw),
        )
        .route("/{id}/progress", put(enrollments::update_progress))
        .route("/{id}/complete", put(enrollments::complete_enrollment))
        .route("/{id}/feedback", put(enrollments::submit_feedback))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/dashboard", get(admin::dashboard))
        .route("/analytics", get(admin::analytics))
        .route("/users", get(admin::list_users))
        .route(
            "/users/{id}",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::deactivate_user),
        )
        .route(
            "/simulations",
            get(admin::list_all_simulations).post(admin::create_simulation),
        )
        .route(
            "/simulations/{id}",
            put(admin::update_simulation).delete(admin::deactivate_simulation),
        )
        .route("/enrollments", get(admin::list_enrollments))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/auth", auth_routes)
        .nest("/api/simulations", simulation_routes)
        .nest("/api/enrollments", enrollment_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(GovernorLayer::new(governor_conf))
        .with_state(state)
}
