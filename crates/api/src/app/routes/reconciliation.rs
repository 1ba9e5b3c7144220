use std::sync::Arc;

use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};

use counterflow_cash::reconciliation;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::dto;

pub fn router() -> Router {
    Router::new().route("/statement", post(evaluate_statement))
}

/// Pure evaluation against an external statement balance; persists nothing.
pub async fn evaluate_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::StatementRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&tenant, &principal, "reconciliation.evaluate") {
        return resp;
    }

    let report = reconciliation::evaluate_statement(
        body.opening_balance,
        body.cash_in,
        body.cash_out,
        body.statement_balance,
        body.tolerance.unwrap_or_else(|| services.cash_tolerance()),
    );

    (StatusCode::OK, Json(dto::report_to_json(report))).into_response()
}
