use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use counterflow_cash::SessionId;
use counterflow_core::UserId;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_session))
        .route("/:id", get(get_session))
        .route("/:id/movements", post(record_movement))
        .route("/:id/close", post(close_session))
        .route("/:id/remittances", post(create_remittance))
}

pub async fn open_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::OpenSessionRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "sessions.open") {
        return resp;
    }

    match services.open_session(tenant.tenant_id(), principal.actor(), body.opening_balance) {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"id": session_id.0.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "sessions.read") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "session") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.session_get(tenant.tenant_id(), &SessionId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::session_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "session not found"),
    }
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::MovementRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "sessions.movement") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "session") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let movement_type = match dto::parse_movement_type(&body.movement_type) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = match dto::parse_movement_category(&body.category) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.record_movement(
        tenant.tenant_id(),
        SessionId::new(agg),
        movement_type,
        category,
        body.amount,
        body.description.unwrap_or_default(),
        principal.actor(),
    ) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn close_session(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CloseSessionRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "sessions.close") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "session") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.close_session(
        tenant.tenant_id(),
        SessionId::new(agg),
        body.declared_balance,
        body.notes.unwrap_or_default(),
        principal.actor(),
    ) {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "report": dto::report_to_json(report),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_remittance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CreateRemittanceRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "remittances.create") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "session") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to_supervisor: UserId = match body.to_supervisor.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_id",
                "invalid supervisor id",
            )
        }
    };

    match services.create_remittance(
        tenant.tenant_id(),
        SessionId::new(agg),
        to_supervisor,
        body.amount,
        principal.actor(),
    ) {
        Ok(remittance_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"id": remittance_id.0.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
