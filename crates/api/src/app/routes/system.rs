use axum::http::StatusCode;
use axum::response::IntoResponse;

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, "ok").into_response()
}
