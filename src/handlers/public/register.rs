// handlers/public/register.rs - POST /register_db handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::TenantLookup;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterDbRequest {
    /// Accepted as a number or a string of digits
    #[serde(default)]
    pub client_id: Option<Value>,
    #[serde(default)]
    pub client_username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterDbResponse {
    pub detail: &'static str,
    pub alias: String,
}

fn parse_client_id(value: Option<Value>) -> Result<Option<i64>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("client_id must be an integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::bad_request("client_id must be an integer")),
        Some(_) => Err(ApiError::bad_request("client_id must be an integer")),
    }
}

/// Prepare the database alias of one client without routing a request to it.
///
/// Body: `{"client_id": 1845}` or `{"client_username": "acme"}`; exactly one.
/// Responds 201 `{"detail": "Alias ready", "alias": "client_1845"}`.
pub async fn register_db(
    State(state): State<AppState>,
    Json(payload): Json<RegisterDbRequest>,
) -> ApiResult<RegisterDbResponse> {
    let client_id = parse_client_id(payload.client_id)?;
    let lookup = TenantLookup::from_parts(client_id, payload.client_username)?;

    let tenant = state.resolver.ensure_lookup(&lookup).await?;
    tracing::info!("Alias {} ready for {}", tenant.alias, lookup);

    Ok(ApiResponse::created(RegisterDbResponse {
        detail: "Alias ready",
        alias: tenant.alias,
    }))
}
