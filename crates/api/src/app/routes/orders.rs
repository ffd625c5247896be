use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use binflow_core::{AggregateId, BinLocation, Sku};
use binflow_orders::{
    Cancel, Claim, ConfirmPacked, ConfirmPicked, CreateOrder, LineItemId, NewLineItem,
    OrderCommand, OrderId, Ship, Skip, UndoVerification, Unclaim, Unskip, Verify,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/claim", post(claim))
        .route("/:id/unclaim", post(unclaim))
        .route("/:id/verify", post(verify))
        .route("/:id/undo-verification", post(undo_verification))
        .route("/:id/skip", post(skip))
        .route("/:id/unskip", post(unskip))
        .route("/:id/confirm-picked", post(confirm_picked))
        .route("/:id/confirm-packed", post(confirm_packed))
        .route("/:id/ship", post(ship))
        .route("/:id/cancel", post(cancel))
}

fn parse_id(id: &str) -> Result<AggregateId, axum::response::Response> {
    id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
    })
}

/// Mutations respond with the order as it stands after the command, read
/// back from the projection the dispatch already synced.
fn order_response(services: &AppServices, agg: AggregateId) -> axum::response::Response {
    match services.order(OrderId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::order_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

/// Scan endpoints respond with just the line item they touched.
fn line_item_response(
    services: &AppServices,
    agg: AggregateId,
    line_item_id: LineItemId,
) -> axum::response::Response {
    let Some(rm) = services.order(OrderId::new(agg)) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found");
    };
    match rm.order.items().iter().find(|i| i.id == line_item_id) {
        Some(item) => (StatusCode::OK, Json(dto::line_item_to_json(item))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "line item not found"),
    }
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let mut items = Vec::with_capacity(body.items.len());
    for item in body.items {
        let sku = match Sku::new(&item.sku) {
            Ok(v) => v,
            Err(e) => return errors::domain_error_to_response(e),
        };
        let bin_location = match BinLocation::new(&item.bin_location) {
            Ok(v) => v,
            Err(e) => return errors::domain_error_to_response(e),
        };
        items.push(NewLineItem {
            sku,
            bin_location,
            required_quantity: item.required_quantity,
        });
    }

    let agg = AggregateId::new();
    let order_id = OrderId::new(agg);

    let result = services.dispatch_order(
        agg,
        OrderCommand::CreateOrder(CreateOrder {
            order_id,
            priority: body.priority,
            items,
            occurred_at: Utc::now(),
        }),
    );
    if let Err(e) = result {
        return errors::dispatch_error_to_response(e);
    }

    match services.order(order_id) {
        Some(rm) => (StatusCode::CREATED, Json(dto::order_to_json(&rm))).into_response(),
        None => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let orders: Vec<_> = services.orders().iter().map(dto::order_to_json).collect();
    (StatusCode::OK, Json(serde_json::json!({ "orders": orders }))).into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.order(OrderId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::order_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

pub async fn claim(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ClaimRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.claim_order(
        agg,
        Claim {
            order_id: OrderId::new(agg),
            worker_id: body.worker_id,
            role: body.role,
            occurred_at: Utc::now(),
        },
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn unclaim(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UnclaimRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Unclaim(Unclaim {
            order_id: OrderId::new(agg),
            worker_id: body.worker_id,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn verify(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::VerifyRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Verify(Verify {
            order_id: OrderId::new(agg),
            line_item_id: body.line_item_id,
            worker_id: body.worker_id,
            quantity: body.quantity,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => line_item_response(&services, agg, body.line_item_id),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn undo_verification(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UndoVerificationRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::UndoVerification(UndoVerification {
            order_id: OrderId::new(agg),
            line_item_id: body.line_item_id,
            worker_id: body.worker_id,
            quantity: body.quantity,
            reason: body.reason,
            expected: body.expected,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => line_item_response(&services, agg, body.line_item_id),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn skip(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SkipRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Skip(Skip {
            order_id: OrderId::new(agg),
            line_item_id: body.line_item_id,
            worker_id: body.worker_id,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => line_item_response(&services, agg, body.line_item_id),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn unskip(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::UnskipRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Unskip(Unskip {
            order_id: OrderId::new(agg),
            line_item_id: body.line_item_id,
            worker_id: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => line_item_response(&services, agg, body.line_item_id),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn confirm_picked(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmPickedRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::ConfirmPicked(ConfirmPicked {
            order_id: OrderId::new(agg),
            worker_id: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn confirm_packed(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmPackedRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::ConfirmPacked(ConfirmPacked {
            order_id: OrderId::new(agg),
            worker_id: body.worker_id,
            accept_skipped: body.accept_skipped,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn ship(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ShipRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Ship(Ship {
            order_id: OrderId::new(agg),
            actor: body.worker_id,
            carrier: body.carrier,
            weight_grams: body.weight_grams,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_order(
        agg,
        OrderCommand::Cancel(Cancel {
            order_id: OrderId::new(agg),
            actor: body.worker_id,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(_) => order_response(&services, agg),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
