use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use counterflow_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::StateConflict { current, attempted } => json_error(
            StatusCode::CONFLICT,
            "state_conflict",
            format!("{attempted} not permitted from {current}"),
        ),
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::InsufficientStock {
            product,
            available,
            requested,
        } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_stock",
            format!("{product}: available {available}, requested {requested}"),
        ),
        DispatchError::InsufficientCustody {
            available,
            requested,
        } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_custody",
            format!("available {available}, requested {requested}"),
        ),
        DispatchError::Unauthorized => {
            json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized")
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg)
        }
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
