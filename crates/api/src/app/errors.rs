use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use binflow_core::DomainError;
use binflow_infra::command_dispatcher::DispatchError;

/// Exhaustive domain-error-to-HTTP mapping. Conflict-like rejections are
/// 409, caller mistakes 400, resource limits 429, invariant breaches 422.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::AlreadyClaimed { .. } => {
            json_error(StatusCode::CONFLICT, "already_claimed", message)
        }
        DomainError::AlreadyComplete { .. } => {
            json_error(StatusCode::CONFLICT, "already_complete", message)
        }
        DomainError::NothingToUndo { .. } => {
            json_error(StatusCode::CONFLICT, "nothing_to_undo", message)
        }
        DomainError::StateChanged { .. } => {
            json_error(StatusCode::CONFLICT, "state_changed", message)
        }
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DomainError::InsufficientStock { .. } => {
            json_error(StatusCode::CONFLICT, "insufficient_stock", message)
        }
        DomainError::ReasonRequired { .. } => {
            json_error(StatusCode::BAD_REQUEST, "reason_required", message)
        }
        DomainError::InvalidQuantity(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_quantity", message)
        }
        DomainError::UnresolvedVariances { .. } => {
            json_error(StatusCode::BAD_REQUEST, "unresolved_variances", message)
        }
        DomainError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::TooManyActiveOrders { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "too_many_active_orders", message)
        }
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Domain(e) => domain_error_to_response(e),
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
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
