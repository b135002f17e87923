//! API route definitions

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the full application router. The authorize endpoint accepts GET
/// and POST only; axum answers 405 for every other method on the route.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // OAuth2 surface
        .route(
            "/oauth2/authorize",
            get(handlers::authorize::authorize).post(handlers::authorize::authorize),
        )
        .route(
            "/oauth2/choose_identity_provider",
            get(handlers::chooser::choose_identity_provider),
        )
        .route(
            "/oauth2/login",
            get(handlers::login::login_page).post(handlers::login::login_submit),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
