use axum::{routing::get, Router};

pub mod common;
pub mod orders;
pub mod reconciliation;
pub mod remittances;
pub mod sessions;
pub mod stock;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/orders", orders::router())
        .nest("/sessions", sessions::router())
        .nest("/remittances", remittances::router())
        .nest("/stock", stock::router())
        .nest("/reconciliation", reconciliation::router())
}
