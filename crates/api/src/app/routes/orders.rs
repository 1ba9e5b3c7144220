use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use counterflow_auth::Capability;
use counterflow_catalog::ProductId;
use counterflow_orders::{OrderId, OrderLine, SettlementStatus, SubmitOrder};

use crate::app::routes::common::{parse_aggregate_id, require, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/fulfillment", post(fulfillment_action))
        .route("/:id/settlement", post(settlement_action))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let kind = match dto::parse_order_kind(&body.kind) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let mode = match dto::parse_settlement_mode(body.mode.as_deref(), kind) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    // Lines are priced server-side against the catalog; client-side figures
    // are never trusted.
    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        let product_agg = match parse_aggregate_id(&line.product_id, "product") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let product_id = ProductId::new(product_agg);
        let Some((unit_value, tax_percent)) =
            services.price_line(tenant.tenant_id(), product_id, kind)
        else {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "unknown_product",
                format!("product {} is not in the catalog", line.product_id),
            );
        };
        lines.push(OrderLine {
            product_id,
            quantity: line.quantity,
            unit_value,
            tax_percent,
        });
    }

    let order_id = OrderId::new(counterflow_core::AggregateId::new());
    let cmd = SubmitOrder {
        tenant_id: tenant.tenant_id(),
        order_id,
        kind,
        mode,
        counterparty: body.counterparty,
        lines,
        actor: principal.actor(),
        occurred_at: Utc::now(),
    };

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Capability::from_static("orders.create")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services.submit_order(tenant.tenant_id(), cmd_auth.inner) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": order_id.0.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn fulfillment_action(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::FulfillmentActionRequest>,
) -> axum::response::Response {
    let agg = match parse_aggregate_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = OrderId::new(agg);

    if body.action == "reject" {
        if let Err(resp) = require(&tenant, &principal, "orders.reject") {
            return resp;
        }
        let reason = body.reason.unwrap_or_default();
        return match services.reject_order(tenant.tenant_id(), order_id, reason, principal.actor())
        {
            Ok(_) => (
                StatusCode::OK,
                Json(serde_json::json!({"id": agg.to_string(), "fulfillment": "cancelled"})),
            )
                .into_response(),
            Err(e) => errors::dispatch_error_to_response(e),
        };
    }

    let (kind, current) = match services.order_fulfillment_state(tenant.tenant_id(), order_id) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    // "approve" is the first advance (pending/submitted only); every later
    // step is "advance". Each moves exactly one state.
    let capability = match body.action.as_str() {
        "approve" => {
            if current != kind.initial_fulfillment() {
                return errors::json_error(
                    StatusCode::CONFLICT,
                    "state_conflict",
                    format!("approve not permitted from {current}"),
                );
            }
            "orders.approve"
        }
        "advance" => "orders.advance",
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_action",
                "action must be one of: approve, advance, reject",
            )
        }
    };
    if let Err(resp) = require(&tenant, &principal, capability) {
        return resp;
    }

    // A retried advance at the goods-movement state replays as a no-op
    // (the aggregate decides zero events and the stock leg is idempotent).
    let target = if current.is_goods_movement() {
        current
    } else {
        match current.successor(kind) {
            Some(t) => t,
            None => {
                return errors::json_error(
                    StatusCode::CONFLICT,
                    "state_conflict",
                    format!("advance not permitted from {current}"),
                )
            }
        }
    };

    match services.advance_fulfillment(tenant.tenant_id(), order_id, target, principal.actor()) {
        Ok(fulfillment) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "fulfillment": fulfillment.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn settlement_action(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SettlementActionRequest>,
) -> axum::response::Response {
    let agg = match parse_aggregate_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = OrderId::new(agg);

    let (capability, target) = match body.action.as_str() {
        "process" => ("orders.settle.process", SettlementStatus::Processing),
        "confirm" => ("orders.settle.confirm", SettlementStatus::Confirmed),
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_action",
                "action must be one of: process, confirm",
            )
        }
    };
    if let Err(resp) = require(&tenant, &principal, capability) {
        return resp;
    }

    let tender = match dto::parse_tender(body.tender.as_deref()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.advance_settlement(
        tenant.tenant_id(),
        order_id,
        target,
        tender,
        principal.actor(),
    ) {
        Ok(settlement) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "settlement": settlement.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "orders.read") {
        return resp;
    }
    let agg = match parse_aggregate_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.orders_get(tenant.tenant_id(), &OrderId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::order_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "orders.read") {
        return resp;
    }
    let items = services
        .orders_list(tenant.tenant_id())
        .into_iter()
        .map(dto::order_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
