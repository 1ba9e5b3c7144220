use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use counterflow_cash::RemittanceId;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_remittance))
        .route("/:id/accept", post(accept_remittance))
}

pub async fn get_remittance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "sessions.read") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "remittance") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.remittance_get(tenant.tenant_id(), &RemittanceId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::remittance_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "remittance not found"),
    }
}

pub async fn accept_remittance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "remittances.accept") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "remittance") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.accept_remittance(tenant.tenant_id(), RemittanceId::new(agg), principal.actor())
    {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": agg.to_string(), "status": "received"})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
