// handlers/protected/tenant.rs - /api/tenant handlers

use axum::{extract::State, Extension};
use serde::Serialize;

use crate::app::AppState;
use crate::database::context::TenantContext;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::TenantError;

#[derive(Debug, Serialize)]
pub struct TenantInfo {
    pub alias: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

fn current_info(context: &TenantContext) -> Result<TenantInfo, ApiError> {
    let tenant = context.get().ok_or(TenantError::NoActiveTenant)?;
    let connection = &tenant.database.connection;

    Ok(TenantInfo {
        alias: tenant.alias.clone(),
        database: connection.database.clone(),
        host: connection.host.clone(),
        port: connection.port,
        user: connection.user.clone(),
        registered_at: tenant.database.registered_at,
    })
}

/// GET /api/tenant - the database this request was routed to
pub async fn tenant_show(Extension(context): Extension<TenantContext>) -> ApiResult<TenantInfo> {
    Ok(ApiResponse::success(current_info(&context)?))
}

/// GET /api/tenant/ping - round trip through the tenant pool
pub async fn tenant_ping(Extension(context): Extension<TenantContext>) -> ApiResult<TenantInfo> {
    let pool = context.pool()?;

    sqlx::query("SELECT 1").execute(&pool).await.map_err(|e| {
        tracing::error!("Tenant ping failed for {:?}: {}", context.alias(), e);
        ApiError::service_unavailable("Tenant database unavailable")
    })?;

    Ok(ApiResponse::success(current_info(&context)?))
}

/// POST /api/tenant/refresh - re-fetch credentials and re-register the alias
pub async fn tenant_refresh(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Extension(context): Extension<TenantContext>,
) -> ApiResult<TenantInfo> {
    let tenant = state.resolver.refresh_claims(auth_user.tenant.as_ref()).await?;

    // The rest of this request uses the new pool
    context.set(tenant);

    Ok(ApiResponse::success(current_info(&context)?))
}
