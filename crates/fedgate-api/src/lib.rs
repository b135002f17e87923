//! Fedgate API - the OAuth2 authorization endpoint and supporting HTTP
//! surface (provider chooser, login page, health checks)

pub mod handlers;
pub mod oauth;
pub mod request_state;
pub mod routes;
pub mod state;

pub use routes::create_app;
pub use state::AppState;
