use std::sync::{Arc, RwLock};

use sqlx::PgPool;

use super::connection::TenantDatabase;
use crate::services::tenant_error::TenantError;

/// The tenant a request has been routed to
#[derive(Debug, Clone)]
pub struct ActiveTenant {
    pub alias: String,
    pub database: Arc<TenantDatabase>,
}

impl ActiveTenant {
    pub fn new(database: Arc<TenantDatabase>) -> Self {
        Self {
            alias: database.alias().to_string(),
            database,
        }
    }
}

/// Request-scoped holder of the active tenant.
///
/// Each request gets its own context, handed to handlers through request
/// extensions. Clones share the same slot, so clearing it through one clone
/// is visible to every holder within that request and to nothing outside it.
#[derive(Debug, Clone, Default)]
pub struct TenantContext {
    slot: Arc<RwLock<Option<ActiveTenant>>>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant: ActiveTenant) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(tenant);
    }

    pub fn get(&self) -> Option<ActiveTenant> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn alias(&self) -> Option<String> {
        self.get().map(|t| t.alias)
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Pool of the active tenant; the only way handlers reach a tenant database
    pub fn pool(&self) -> Result<PgPool, TenantError> {
        self.get()
            .map(|t| t.database.pool.clone())
            .ok_or(TenantError::NoActiveTenant)
    }

    /// Set the tenant and return a guard that clears it when dropped
    pub fn scope(&self, tenant: ActiveTenant) -> TenantScope {
        self.set(tenant);
        TenantScope { context: self.clone() }
    }
}

/// Clears its context on drop, whatever path the unit of work took
#[must_use = "the tenant is cleared as soon as the scope is dropped"]
pub struct TenantScope {
    context: TenantContext,
}

impl TenantScope {
    pub fn context(&self) -> &TenantContext {
        &self.context
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        self.context.clear();
    }
}
