//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store/bus, dispatcher,
//!   projections, capacity evaluator) and the workflow logic that spans
//!   more than one aggregate (claim cap, post-movement capacity checks,
//!   variance application).
//! - `routes/`: HTTP routes + handlers, one file per domain area.
//! - `dto.rs`: request DTOs and read-model JSON mapping.
//! - `errors.rs`: consistent error responses.

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app() -> Router {
    let services = Arc::new(services::build_services());

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
