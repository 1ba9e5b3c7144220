//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring and cross-aggregate orchestration
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: AppConfig) -> Router {
    let services = Arc::new(services::build_services(&config));
    build_app_with(services, &config.jwt_secret)
}

/// Router over pre-built services; tests use this to seed the catalog
/// before requests arrive.
pub fn build_app_with(services: Arc<services::AppServices>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(counterflow_auth::Hs256JwtValidator::new(
        jwt_secret.as_bytes(),
    ));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require auth + tenant context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
