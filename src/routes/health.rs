use axum::{http::StatusCode, response::Json};
use serde_json::json;

/// Unauthenticated liveness probe. Not enveloped; load balancers read it.
pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") })),
    )
}
