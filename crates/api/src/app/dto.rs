use serde::Deserialize;

use counterflow_cash::{MovementCategory, MovementType, ReconciliationReport, TenderType};
use counterflow_infra::projections::{
    CashSessionReadModel, OrderReadModel, RemittanceReadModel, StockLevelReadModel,
};
use counterflow_orders::{OrderKind, SettlementMode};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub kind: String,
    /// Settlement mode; defaults to `direct` for sales, `manual` for purchases.
    pub mode: Option<String>,
    pub counterparty: String,
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentActionRequest {
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettlementActionRequest {
    pub action: String,
    /// Tender captured on confirm; defaults to cash.
    pub tender: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub opening_balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct MovementRequest {
    pub movement_type: String,
    pub category: String,
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseSessionRequest {
    pub declared_balance: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRemittanceRequest {
    pub to_supervisor: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReverseOrderRequest {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatementRequest {
    pub opening_balance: i64,
    pub cash_in: i64,
    pub cash_out: i64,
    pub statement_balance: i64,
    pub tolerance: Option<i64>,
}

// -------------------------
// Request parsing helpers
// -------------------------

pub fn parse_order_kind(s: &str) -> Result<OrderKind, axum::response::Response> {
    match s {
        "sale" => Ok(OrderKind::Sale),
        "purchase" => Ok(OrderKind::Purchase),
        _ => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_kind",
            "kind must be one of: sale, purchase",
        )),
    }
}

pub fn parse_settlement_mode(
    s: Option<&str>,
    kind: OrderKind,
) -> Result<SettlementMode, axum::response::Response> {
    match s {
        None => Ok(match kind {
            OrderKind::Sale => SettlementMode::Direct,
            OrderKind::Purchase => SettlementMode::Manual,
        }),
        Some("direct") => Ok(SettlementMode::Direct),
        Some("manual") => Ok(SettlementMode::Manual),
        Some(_) => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_mode",
            "mode must be one of: direct, manual",
        )),
    }
}

pub fn parse_tender(s: Option<&str>) -> Result<TenderType, axum::response::Response> {
    match s {
        None | Some("cash") => Ok(TenderType::Cash),
        Some("card") => Ok(TenderType::Card),
        Some("mobile") => Ok(TenderType::Mobile),
        Some(_) => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_tender",
            "tender must be one of: cash, card, mobile",
        )),
    }
}

pub fn parse_movement_type(s: &str) -> Result<MovementType, axum::response::Response> {
    match s {
        "in" => Ok(MovementType::In),
        "out" => Ok(MovementType::Out),
        _ => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_movement_type",
            "movement_type must be one of: in, out",
        )),
    }
}

pub fn parse_movement_category(s: &str) -> Result<MovementCategory, axum::response::Response> {
    match s {
        "expense" => Ok(MovementCategory::Expense),
        "deposit" => Ok(MovementCategory::Deposit),
        "withdrawal" => Ok(MovementCategory::Withdrawal),
        "adjustment" => Ok(MovementCategory::Adjustment),
        _ => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_category",
            "category must be one of: expense, deposit, withdrawal, adjustment",
        )),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn order_to_json(rm: OrderReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.order_id.0.to_string(),
        "reference": rm.reference,
        "kind": match rm.kind { OrderKind::Sale => "sale", OrderKind::Purchase => "purchase" },
        "mode": match rm.mode { SettlementMode::Direct => "direct", SettlementMode::Manual => "manual" },
        "counterparty": rm.counterparty,
        "lines": rm.lines.into_iter().map(|l| serde_json::json!({
            "product_id": l.product_id.0.to_string(),
            "quantity": l.quantity,
            "unit_value": l.unit_value,
            "tax_percent": l.tax_percent,
        })).collect::<Vec<_>>(),
        "subtotal": rm.subtotal,
        "tax": rm.tax,
        "total": rm.total,
        "fulfillment": rm.fulfillment.as_str(),
        "settlement": rm.settlement.as_str(),
        "submitted_by": rm.submitted_by.to_string(),
    })
}

pub fn stock_level_to_json(rm: StockLevelReadModel) -> serde_json::Value {
    serde_json::json!({
        "product_id": rm.product_id.0.to_string(),
        "on_hand": rm.on_hand,
        "flagged": rm.flagged,
    })
}

pub fn session_to_json(rm: CashSessionReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.session_id.0.to_string(),
        "operator": rm.operator.to_string(),
        "status": format!("{:?}", rm.status).to_lowercase(),
        "opened_at": rm.opened_at.to_rfc3339(),
        "opening_balance": rm.opening_balance,
        "cash_in": rm.cash_in,
        "cash_out": rm.cash_out,
        "cash_balance": rm.cash_balance(),
        "tender_totals": {
            "cash": rm.cash_tender_total,
            "card": rm.card_tender_total,
            "mobile": rm.mobile_tender_total,
        },
        "transaction_count": rm.transaction_count,
        "closed_at": rm.closed_at.map(|t| t.to_rfc3339()),
        "closing_balance": rm.closing_balance,
        "report": rm.report.map(report_to_json),
    })
}

pub fn remittance_to_json(rm: RemittanceReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.remittance_id.0.to_string(),
        "reference": rm.reference,
        "from_operator": rm.from_operator.to_string(),
        "from_session": rm.from_session.0.to_string(),
        "to_supervisor": rm.to_supervisor.to_string(),
        "amount": rm.amount,
        "status": format!("{:?}", rm.status).to_lowercase(),
        "created_at": rm.created_at.to_rfc3339(),
        "received_at": rm.received_at.map(|t| t.to_rfc3339()),
    })
}

pub fn report_to_json(report: ReconciliationReport) -> serde_json::Value {
    serde_json::json!({
        "expected_balance": report.expected_balance,
        "declared_balance": report.declared_balance,
        "discrepancy": report.discrepancy,
        "is_balanced": report.is_balanced,
    })
}
