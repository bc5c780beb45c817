use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Connection parameters for one tenant database.
///
/// The password is the decrypted secret and lives only in process memory: it
/// is skipped by `Serialize` and redacted by `Debug`.
#[derive(Clone, Serialize)]
pub struct TenantConnection {
    pub alias: String,
    pub database: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    #[serde(skip)]
    password: String,
}

impl TenantConnection {
    pub fn new(
        alias: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            database: database.into(),
            user: user.into(),
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// `user@host:port/database`, safe to log
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("alias", &self.alias)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A registered tenant: its connection parameters plus the pool that every
/// query for the tenant goes through.
#[derive(Debug)]
pub struct TenantDatabase {
    pub connection: TenantConnection,
    pub pool: PgPool,
    pub registered_at: DateTime<Utc>,
}

impl TenantDatabase {
    /// Builds the pool lazily; no connection is opened until the first query.
    /// Must be called from within a Tokio runtime.
    pub fn open(connection: TenantConnection, settings: &DatabaseConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout())
            .connect_lazy_with(connection.connect_options());

        Self {
            connection,
            pool,
            registered_at: Utc::now(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.connection.alias
    }
}
