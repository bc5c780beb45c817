use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::app::AppState;
use crate::database::context::TenantContext;
use crate::error::ApiError;

/// Routes the request to its tenant database.
///
/// Runs after `jwt_auth_middleware`. The alias is made ready before any
/// handler runs, and the `TenantContext` handed to handlers is cleared once
/// the response has been produced, or when the request future is dropped.
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before tenant resolution"))?;

    let tenant = state.resolver.ensure(auth_user.tenant.as_ref()).await?;
    tracing::debug!("Request for {} routed to alias {}", auth_user.sub, tenant.alias);

    let context = TenantContext::new();
    let scope = context.scope(tenant);
    request.extensions_mut().insert(context);

    let response = next.run(request).await;
    drop(scope);

    Ok(response)
}
