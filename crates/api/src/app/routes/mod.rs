use axum::Router;

pub mod capacity;
pub mod cycle_counts;
pub mod orders;
pub mod stock;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .nest("/orders", orders::router())
        .nest("/stock", stock::router())
        .nest("/capacity", capacity::router())
        .nest("/cycle-counts", cycle_counts::router())
}
