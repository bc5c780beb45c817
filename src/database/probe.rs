use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::{debug, error, info};

use super::connection::TenantConnection;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("connection to {target} failed: {cause}")]
    Connect { target: String, cause: String },
}

/// One-shot connectivity check run before a tenant alias is registered.
/// Implementations never retry.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, connection: &TenantConnection) -> Result<(), ProbeError>;
}

/// Opens a single PostgreSQL connection and closes it straight away
pub struct PgProbe {
    timeout: Duration,
}

impl PgProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ConnectivityProbe for PgProbe {
    async fn probe(&self, connection: &TenantConnection) -> Result<(), ProbeError> {
        let target = connection.describe();
        info!("Testing DB connection to {}", target);

        let options = connection.connect_options();
        let conn = match tokio::time::timeout(self.timeout, PgConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!("DB connection FAILED for {}: {}", target, e);
                return Err(ProbeError::Connect { target, cause: e.to_string() });
            }
            Err(_) => {
                error!("DB connection to {} timed out after {:?}", target, self.timeout);
                return Err(ProbeError::Timeout { target, timeout: self.timeout });
            }
        };

        info!("DB connection OK for {}", target);

        // A failed close still drops the socket; the probe itself succeeded.
        if let Err(e) = conn.close().await {
            debug!("Probe connection to {} did not close cleanly: {}", target, e);
        } else {
            debug!("Probe connection to {} closed", target);
        }
        Ok(())
    }
}
