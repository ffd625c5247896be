use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use binflow_core::{AggregateId, BinLocation, Sku};
use binflow_counts::{
    CancelPlan, CompletePlan, CountScope, CreatePlan, EntryId, PlanCommand, PlanId, RecordEntry,
    Reconcile, ResolveVariance, StartPlan,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_plan).get(list_plans))
        .route("/:id", get(get_plan))
        .route("/:id/start", post(start_plan))
        .route("/:id/entries", post(record_entry))
        .route("/:id/complete", post(complete_plan))
        .route("/:id/entries/:eid/variance", put(resolve_variance))
        .route("/:id/reconcile", post(reconcile_plan))
        .route("/:id/cancel", post(cancel_plan))
}

fn parse_id(id: &str) -> Result<AggregateId, axum::response::Response> {
    id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid plan id")
    })
}

fn committed_response(agg: AggregateId, committed: &[binflow_infra::event_store::StoredEvent])
    -> axum::response::Response
{
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
            "stream_version": committed.last().map(|e| e.sequence_number).unwrap_or(0),
        })),
    )
        .into_response()
}

pub async fn create_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreatePlanRequest>,
) -> axum::response::Response {
    let bin_location = match body.bin_location {
        Some(raw) => match BinLocation::new(&raw) {
            Ok(v) => Some(v),
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => None,
    };
    let sku = match body.sku {
        Some(raw) => match Sku::new(&raw) {
            Ok(v) => Some(v),
            Err(e) => return errors::domain_error_to_response(e),
        },
        None => None,
    };

    let agg = AggregateId::new();
    let plan_id = PlanId::new(agg);

    let result = services.dispatch_plan(
        agg,
        PlanCommand::CreatePlan(CreatePlan {
            plan_id,
            scope: CountScope { bin_location, sku },
            assigned_to: body.assigned_to,
            occurred_at: Utc::now(),
        }),
    );
    if let Err(e) = result {
        return errors::dispatch_error_to_response(e);
    }

    match services.plan(plan_id) {
        Some(plan) => (StatusCode::CREATED, Json(dto::plan_to_json(&plan))).into_response(),
        None => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
    }
}

pub async fn list_plans(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let plans: Vec<_> = services.plans().iter().map(dto::plan_to_json).collect();
    (StatusCode::OK, Json(serde_json::json!({ "plans": plans }))).into_response()
}

pub async fn get_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.plan(PlanId::new(agg)) {
        Some(plan) => (StatusCode::OK, Json(dto::plan_to_json(&plan))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "plan not found"),
    }
}

pub async fn start_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::StartPlanRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::StartPlan(StartPlan {
            plan_id: PlanId::new(agg),
            actor: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn record_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CountEntryRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sku = match Sku::new(&body.sku) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let bin_location = match BinLocation::new(&body.bin_location) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::RecordEntry(RecordEntry {
            plan_id: PlanId::new(agg),
            sku,
            bin_location,
            system_quantity: body.system_quantity,
            counted_quantity: body.counted_quantity,
            actor: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn complete_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CompletePlanRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::CompletePlan(CompletePlan {
            plan_id: PlanId::new(agg),
            actor: body.worker_id,
            auto_adjust_tolerance: body.auto_adjust_tolerance,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn resolve_variance(
    Extension(services): Extension<Arc<AppServices>>,
    Path((id, eid)): Path<(String, String)>,
    Json(body): Json<dto::VarianceResolutionRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let entry_id = match eid.parse::<Uuid>() {
        Ok(v) => EntryId(v),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid entry id")
        }
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::ResolveVariance(ResolveVariance {
            plan_id: PlanId::new(agg),
            entry_id,
            resolution: body.status,
            actor: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn reconcile_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReconcileRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::Reconcile(Reconcile {
            plan_id: PlanId::new(agg),
            actor: body.worker_id,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn cancel_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelPlanRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatch_plan(
        agg,
        PlanCommand::CancelPlan(CancelPlan {
            plan_id: PlanId::new(agg),
            actor: body.worker_id,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    ) {
        Ok(committed) => committed_response(agg, &committed),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
