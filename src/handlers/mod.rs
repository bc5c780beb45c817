pub mod protected;
pub mod public;

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Asset Tenancy API",
            "version": version,
            "description": "Tenant database routing for the asset management API",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "register_db": "/register_db (public - prepare a tenant database alias)",
                "tenant": "/api/tenant, /api/tenant/ping, /api/tenant/refresh (protected)",
            }
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let now = chrono::Utc::now();
    let tenants = state.registry().len().await;

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "status": "ok",
                "timestamp": now,
                "registered_tenants": tenants
            }
        })),
    )
}
