use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::TenantClaims;
use crate::config::DatabaseConfig;
use crate::database::connection::{TenantConnection, TenantDatabase};
use crate::database::context::ActiveTenant;
use crate::database::probe::ConnectivityProbe;
use crate::database::registry::{AliasRegistry, RegistryError};
use crate::services::decryptor::SecretDecryptor;
use crate::services::directory::{CredentialRecord, DirectoryClient, Password, TenantLookup};
use crate::services::tenant_error::TenantError;

/// What a request's claims say about its tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity {
    /// Alias the token was issued for, if any
    pub alias: Option<String>,
    /// How to find the tenant in the directory when the alias is not registered
    pub lookup: Option<TenantLookup>,
}

impl TenantIdentity {
    pub fn from_claims(claims: Option<&TenantClaims>) -> Result<Self, TenantError> {
        let claims = claims.ok_or_else(|| TenantError::AuthenticationFailed("Tenant missing in token".to_string()))?;

        let alias = claims
            .alias
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let username = claims
            .client_username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let lookup = if let Some(username) = username {
            Some(TenantLookup::Username(username.to_string()))
        } else if let Some(id) = claims.client_id {
            Some(TenantLookup::ClientId(id))
        } else {
            alias.as_deref().and_then(client_id_from_alias).map(TenantLookup::ClientId)
        };

        if alias.is_none() && lookup.is_none() {
            return Err(TenantError::AuthenticationFailed(
                "Token carries no tenant alias, client id or username".to_string(),
            ));
        }

        Ok(Self { alias, lookup })
    }
}

/// A token naming one alias must not be routed to another
fn check_alias(lookup: &TenantLookup, expected: Option<&str>, resolved: &str) -> Result<(), TenantError> {
    match expected {
        Some(alias) if alias != resolved => {
            warn!("Token alias {} does not match directory alias {} for {}", alias, resolved, lookup);
            Err(TenantError::AuthenticationFailed(
                "Token tenant alias does not match the accounts directory".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// `client_1845` -> 1845
fn client_id_from_alias(alias: &str) -> Option<i64> {
    let digits = alias.strip_prefix("client_")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Makes sure a tenant's database alias is registered and hands back the
/// tenant a request should be routed to.
pub struct TenantResolver {
    registry: Arc<AliasRegistry>,
    directory: Arc<dyn DirectoryClient>,
    decryptor: Arc<SecretDecryptor>,
    probe: Arc<dyn ConnectivityProbe>,
    database: DatabaseConfig,
    /// Alias each directory lookup last resolved to
    known: RwLock<HashMap<TenantLookup, String>>,
}

impl TenantResolver {
    pub fn new(
        registry: Arc<AliasRegistry>,
        directory: Arc<dyn DirectoryClient>,
        decryptor: Arc<SecretDecryptor>,
        probe: Arc<dyn ConnectivityProbe>,
        database: DatabaseConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            decryptor,
            probe,
            database,
            known: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AliasRegistry> {
        &self.registry
    }

    /// Resolve the tenant named by a request's claims
    pub async fn ensure(&self, claims: Option<&TenantClaims>) -> Result<ActiveTenant, TenantError> {
        let identity = TenantIdentity::from_claims(claims)?;

        if let Some(alias) = &identity.alias {
            if let Some(database) = self.registry.get(alias).await {
                debug!("Alias {} already registered", alias);
                return Ok(ActiveTenant::new(database));
            }
        }

        let lookup = identity.lookup.ok_or_else(|| {
            TenantError::AuthenticationFailed("Unable to resolve tenant DB from token".to_string())
        })?;
        let expected = identity.alias.as_deref();

        if let Some(tenant) = self.known_tenant(&lookup, expected).await {
            return Ok(tenant);
        }
        self.resolve(&lookup, expected).await
    }

    /// Register the tenant found by `lookup` unless its alias is already known
    pub async fn ensure_lookup(&self, lookup: &TenantLookup) -> Result<ActiveTenant, TenantError> {
        if let Some(tenant) = self.known_tenant(lookup, None).await {
            return Ok(tenant);
        }
        self.resolve(lookup, None).await
    }

    /// Drop any registration for the tenant and build it again from fresh
    /// directory credentials, probing even when the alias was registered.
    pub async fn refresh(&self, lookup: &TenantLookup) -> Result<ActiveTenant, TenantError> {
        self.rebuild(lookup, None).await
    }

    /// Refresh the tenant named by a request's claims
    pub async fn refresh_claims(&self, claims: Option<&TenantClaims>) -> Result<ActiveTenant, TenantError> {
        let identity = TenantIdentity::from_claims(claims)?;
        let lookup = identity.lookup.ok_or_else(|| {
            TenantError::AuthenticationFailed("Token does not identify a client to refresh".to_string())
        })?;
        self.rebuild(&lookup, identity.alias.as_deref()).await
    }

    /// Registered tenant a lookup resolved to before, without asking the directory
    async fn known_tenant(&self, lookup: &TenantLookup, expected: Option<&str>) -> Option<ActiveTenant> {
        let alias = self.known.read().await.get(lookup).cloned()?;
        if expected.is_some_and(|e| e != alias) {
            return None;
        }

        let database = self.registry.get(&alias).await?;
        debug!("{} resolves to registered alias {}", lookup, alias);
        Some(ActiveTenant::new(database))
    }

    async fn resolve(&self, lookup: &TenantLookup, expected: Option<&str>) -> Result<ActiveTenant, TenantError> {
        let record = self.directory.fetch(lookup).await?;
        check_alias(lookup, expected, &record.alias)?;

        let _guard = self.registry.lock(&record.alias).await;
        if let Some(database) = self.registry.get(&record.alias).await {
            debug!("Alias {} already registered", record.alias);
            self.remember(lookup, &record.alias).await;
            return Ok(ActiveTenant::new(database));
        }

        let database = self.prepare(record).await?;
        let tenant = self.commit(database).await?;
        self.remember(lookup, &tenant.alias).await;
        Ok(tenant)
    }

    async fn rebuild(&self, lookup: &TenantLookup, expected: Option<&str>) -> Result<ActiveTenant, TenantError> {
        let record = self.directory.fetch(lookup).await?;
        check_alias(lookup, expected, &record.alias)?;

        let _guard = self.registry.lock(&record.alias).await;
        if let Some(previous) = self.registry.evict(&record.alias).await {
            previous.pool.close().await;
            info!("Closed pool for refreshed alias {}", record.alias);
        }
        self.forget(&record.alias).await;

        let database = self.prepare(record).await?;
        let tenant = self.commit(database).await?;
        self.remember(lookup, &tenant.alias).await;
        Ok(tenant)
    }

    async fn remember(&self, lookup: &TenantLookup, alias: &str) {
        self.known.write().await.insert(lookup.clone(), alias.to_string());
    }

    async fn forget(&self, alias: &str) {
        self.known.write().await.retain(|_, known| known.as_str() != alias);
    }

    /// Decrypt and probe; nothing is registered here
    async fn prepare(&self, record: CredentialRecord) -> Result<TenantDatabase, TenantError> {
        let password = match record.password {
            Password::Encrypted(token) => self.decryptor.decrypt(&token)?,
            Password::Plain(plain) => plain,
        };

        let connection = TenantConnection::new(
            record.alias,
            record.db_name,
            record.db_user,
            record.db_host,
            record.db_port,
            password,
        );

        self.probe.probe(&connection).await?;
        Ok(TenantDatabase::open(connection, &self.database))
    }

    async fn commit(&self, database: TenantDatabase) -> Result<ActiveTenant, TenantError> {
        match self.registry.register(database).await {
            Ok(database) => Ok(ActiveTenant::new(database)),
            Err(RegistryError::AlreadyRegistered(alias)) => {
                // Someone else won the race; use their entry
                match self.registry.get(&alias).await {
                    Some(existing) => {
                        debug!("Alias {} registered concurrently, reusing it", alias);
                        Ok(ActiveTenant::new(existing))
                    }
                    None => {
                        warn!("Alias {} vanished right after a duplicate registration", alias);
                        Err(RegistryError::AlreadyRegistered(alias).into())
                    }
                }
            }
        }
    }
}
