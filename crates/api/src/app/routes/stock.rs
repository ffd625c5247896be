use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use binflow_core::{BinLocation, Sku};
use binflow_ledger::ApplyMovement;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/movements", post(apply_movement))
        .route("/levels", get(list_levels))
}

pub async fn apply_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::MovementRequest>,
) -> axum::response::Response {
    let sku = match Sku::new(&body.sku) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let bin_location = match BinLocation::new(&body.bin_location) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let movement = ApplyMovement {
        sku: sku.clone(),
        bin_location: bin_location.clone(),
        delta_on_hand: body.delta_on_hand,
        delta_reserved: body.delta_reserved,
        kind: body.kind,
        reason: body.reason,
        actor: body.worker_id,
        override_availability: body.override_availability,
        occurred_at: Utc::now(),
    };

    let (committed, snapshots) = match services.apply_movement(movement) {
        Ok(v) => v,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let level = services
        .stock_level(&sku, &bin_location)
        .map(|rm| dto::stock_level_to_json(&rm));

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "events_committed": committed.len(),
            "stream_version": committed.last().map(|e| e.sequence_number).unwrap_or(0),
            "stock_level": level,
            "capacity": snapshots,
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LevelsQuery {
    pub bin: Option<String>,
}

pub async fn list_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<LevelsQuery>,
) -> axum::response::Response {
    let bin = match query.bin {
        Some(raw) => match BinLocation::new(&raw) {
            Ok(v) => Some(v),
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => None,
    };

    let levels: Vec<_> = services
        .stock_levels(bin.as_ref())
        .iter()
        .map(dto::stock_level_to_json)
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "levels": levels }))).into_response()
}
