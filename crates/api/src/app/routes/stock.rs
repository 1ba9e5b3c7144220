use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use counterflow_orders::OrderId;

use crate::app::routes::common::{parse_aggregate_id, require};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stock))
        .route("/reversals", post(reverse_order))
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "stock.read") {
        return resp;
    }
    let items = services
        .stock_list(tenant.tenant_id())
        .into_iter()
        .map(dto::stock_level_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

/// Explicit compensation: negate an order's applied stock deltas. Rejecting
/// an order never reverses stock by itself; this is the operator-driven
/// counterpart.
pub async fn reverse_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::ReverseOrderRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "stock.reverse") {
        return resp;
    }
    let agg = match parse_aggregate_id(&body.order_id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.reverse_order_stock(tenant.tenant_id(), OrderId::new(agg), principal.actor()) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "order_id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
