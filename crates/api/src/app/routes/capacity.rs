use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use binflow_capacity::{AlertId, BinProfile, CapacityRule, CapacityType, RuleId, SkuSpec};
use binflow_core::{BinLocation, Sku};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/locations", get(list_locations))
        .route("/rules", post(create_rule).get(list_rules))
        .route("/rules/:id", put(update_rule).delete(delete_rule))
        .route("/bins", post(register_bin))
        .route("/skus", post(register_sku))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
}

fn parse_capacity_type(s: &str) -> Result<CapacityType, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "quantity" => Ok(CapacityType::Quantity),
        "weight" => Ok(CapacityType::Weight),
        "volume" => Ok(CapacityType::Volume),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_capacity_type",
            "type must be one of: quantity, weight, volume",
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationsQuery {
    #[serde(rename = "type")]
    pub capacity_type: Option<String>,
    #[serde(default)]
    pub alerts_only: bool,
}

pub async fn list_locations(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<LocationsQuery>,
) -> axum::response::Response {
    let capacity_type = match query.capacity_type.as_deref() {
        Some(raw) => match parse_capacity_type(raw) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let snapshots = services.evaluator().snapshots(capacity_type, query.alerts_only);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "locations": snapshots })),
    )
        .into_response()
}

fn rule_from_request(id: RuleId, body: dto::CapacityRuleRequest) -> CapacityRule {
    CapacityRule {
        id,
        scope: body.scope,
        capacity_type: body.capacity_type,
        maximum_capacity: body.maximum_capacity,
        warning_threshold_pct: body.warning_threshold_pct,
        allow_overfill: body.allow_overfill,
        overfill_threshold_pct: body.overfill_threshold_pct,
        priority: body.priority,
    }
}

pub async fn create_rule(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CapacityRuleRequest>,
) -> axum::response::Response {
    match services.evaluator().upsert_rule(rule_from_request(RuleId::new(), body)) {
        Ok(rule) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn list_rules(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "rules": services.evaluator().rules() })),
    )
        .into_response()
}

pub async fn update_rule(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CapacityRuleRequest>,
) -> axum::response::Response {
    let rule_id = match id.parse::<Uuid>() {
        Ok(v) => RuleId(v),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid rule id"),
    };
    match services.evaluator().upsert_rule(rule_from_request(rule_id, body)) {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_rule(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let rule_id = match id.parse::<Uuid>() {
        Ok(v) => RuleId(v),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid rule id"),
    };
    match services.evaluator().remove_rule(rule_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn register_bin(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BinProfileRequest>,
) -> axum::response::Response {
    let location = match BinLocation::new(&body.location) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let profile = BinProfile {
        location,
        zone: body.zone,
        location_type: body.location_type,
    };
    services.evaluator().register_bin(profile.clone());
    (StatusCode::CREATED, Json(profile)).into_response()
}

pub async fn register_sku(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SkuSpecRequest>,
) -> axum::response::Response {
    let sku = match Sku::new(&body.sku) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let spec = SkuSpec {
        sku,
        unit_weight_kg: body.unit_weight_kg,
        unit_volume_l: body.unit_volume_l,
    };
    services.evaluator().register_sku(spec.clone());
    (StatusCode::CREATED, Json(spec)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub include_acknowledged: bool,
}

pub async fn list_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<AlertsQuery>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "alerts": services.evaluator().alerts(query.include_acknowledged),
        })),
    )
        .into_response()
}

pub async fn acknowledge_alert(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id = match id.parse::<Uuid>() {
        Ok(v) => AlertId(v),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid alert id"),
    };
    match services.evaluator().acknowledge(alert_id) {
        Ok(alert) => (StatusCode::OK, Json(alert)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}
